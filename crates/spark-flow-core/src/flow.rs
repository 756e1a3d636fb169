//! 推式流协议：订阅、请求与取消。
//!
//! # 模块定位（Why）
//! - 算子只需要一个最小的“推送 + 需求”协议即可与上下游协作：上游通过 [`Subscriber`] 推送元素，
//!   下游通过 [`Subscription`] 声明需求或取消；
//! - 协议方法统一使用 `&self` 接收者，实现方自行通过原子量或无锁结构维护内部状态，
//!   以便同一对象可被生产线程、定时器线程与下游线程同时调用。
//!
//! # 契约说明（What）
//! - `on_subscribe` 在整个生命周期内最多调用一次，且先于其它信号；
//! - `on_next` 调用之间互不重叠（由上游协议保证），但可能来自不同线程；
//! - `on_error` 与 `on_complete` 互斥且最多出现一次；
//! - `request(n)` 中的 `n` 表示新增需求，`n == 0` 视为空操作，累加结果在 [`UNBOUNDED`] 处饱和。

use std::sync::Arc;

use crate::error::FlowError;

/// 表示“无界需求”的哨兵值。
pub const UNBOUNDED: u64 = u64::MAX;

/// 上游持有的控制句柄，下游通过它声明需求或取消。
pub trait Subscription: Send + Sync {
    /// 追加 `n` 个单位的需求。
    fn request(&self, n: u64);

    /// 取消订阅；重复调用必须是空操作。
    fn cancel(&self);
}

/// 推式流的消费端。
pub trait Subscriber<T>: Send + Sync {
    /// 接收控制句柄。
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);

    /// 接收一个元素。
    fn on_next(&self, item: T);

    /// 以错误终止。
    fn on_error(&self, error: FlowError);

    /// 正常终止。
    fn on_complete(&self);
}

/// 在饱和语义下累加需求。
///
/// 任一操作数为 [`UNBOUNDED`] 或结果溢出时返回 [`UNBOUNDED`]。
pub fn add_cap(current: u64, n: u64) -> u64 {
    if current == UNBOUNDED {
        return UNBOUNDED;
    }
    current.saturating_add(n)
}

/// 在饱和语义下相乘，用于把“批次需求”折算为“元素需求”。
pub fn multiply_cap(lhs: u64, rhs: u64) -> u64 {
    if lhs == UNBOUNDED || rhs == UNBOUNDED {
        return UNBOUNDED;
    }
    lhs.saturating_mul(rhs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_saturate_at_unbounded() {
        assert_eq!(add_cap(UNBOUNDED, 1), UNBOUNDED);
        assert_eq!(add_cap(UNBOUNDED - 1, 5), UNBOUNDED);
        assert_eq!(add_cap(3, 4), 7);
        assert_eq!(multiply_cap(2, 5), 10);
        assert_eq!(multiply_cap(u64::MAX / 2, 3), UNBOUNDED);
    }
}
