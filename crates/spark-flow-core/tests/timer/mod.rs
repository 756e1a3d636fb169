//! 定时器服务集成测试入口。
//!
//! # 模块目的（Why）
//! - 缓冲算子的时间触发完全依赖注入的 [`TimerService`]，这里集中验证两种实现共同遵守的契约：
//!   取消后不执行、关闭后拒绝、按截止时间顺序执行；
//!
//! # 结构概览（What）
//! - `tests::timer::virtual_clock`：虚拟时间下的确定性顺序与重入调度；
//! - `tests::timer::worker_thread`：真实工作线程的执行、取消与关闭拒绝。

pub mod tests {
    //! 集成测试命名空间，便于按 `tests::timer::*` 过滤。
    pub mod timer {
        pub mod virtual_clock {
            include!("virtual_clock.rs");
        }
        pub mod worker_thread {
            include!("worker_thread.rs");
        }
    }
}
