//! 定时器服务契约与两种实现。
//!
//! # 模块定位（Why）
//! - 按时间分批的算子需要“延迟一次执行、可取消、可能被拒绝”的调度能力；
//!   通过 [`TimerService`] 显式注入，避免任何全局/环境调度器；
//! - [`ThreadTimer`] 以一个独占工作线程驱动真实时间，[`VirtualTimer`] 以手动推进的虚拟时间
//!   驱动确定性测试。
//!
//! # 契约说明（What）
//! - `schedule` 返回的 [`TimerHandle`] 取消后，对应任务保证不会开始执行；
//!   若任务已开始执行，取消不会打断它；
//! - 服务关闭后，`schedule` 必须返回 [`TimerRejected`]，不得静默吞掉任务。

mod cancel;
mod thread;
mod virtual_time;

use std::borrow::Cow;
use std::time::Duration;

use crate::error::TimerRejected;

pub use cancel::CancelFlag;
pub use thread::ThreadTimer;
pub use virtual_time::VirtualTimer;

/// 定时任务的统一形态。
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// 可注入的定时器服务。
///
/// # 接口约束（What）
/// - `schedule`：在 `delay` 之后恰好执行一次 `task`，或返回拒绝；
/// - `worker_name`：返回执行任务的工作单元标识，用于诊断面展示。
pub trait TimerService: Send + Sync + 'static {
    /// 调度一次性任务。
    fn schedule(&self, delay: Duration, task: TimerTask) -> Result<TimerHandle, TimerRejected>;

    /// 执行任务的工作单元名称。
    fn worker_name(&self) -> Cow<'static, str>;
}

/// 已调度任务的取消句柄。
///
/// 与排队条目共享一个 [`CancelFlag`]，取消是幂等的：首次调用返回 `true`，之后返回 `false`。
#[derive(Clone, Debug, Default)]
pub struct TimerHandle {
    cancellation: CancelFlag,
}

impl TimerHandle {
    /// 基于给定取消令牌构造句柄，供定时器实现与任务条目共享同一原子位。
    pub fn new(cancellation: CancelFlag) -> Self {
        Self { cancellation }
    }

    /// 取消任务。
    pub fn cancel(&self) -> bool {
        self.cancellation.cancel()
    }

    /// 任务是否已被取消。
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
