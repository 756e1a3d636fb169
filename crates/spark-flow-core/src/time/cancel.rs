use std::sync::Arc;

#[cfg(not(any(loom, spark_loom)))]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(any(loom, spark_loom))]
use loom::sync::atomic::{AtomicBool, Ordering};

/// 定时任务取消位：调度方持有的 [`TimerHandle`](super::TimerHandle) 与定时器内部排队的任务条目
/// 共享同一个原子位。
///
/// # 设计背景（Why）
/// - 缓冲算子在刷新时取消旧定时器，而定时器线程可能正要弹出同一条目；两侧只需一个原子位即可
///   约定“取消先于出队观测到，则任务不运行”；
/// - 手动上游订阅桩同样借用它记录是否收到过取消。
///
/// # 契约说明（What）
/// - `cancel` 只有第一次返回 `true`，便于调用方区分“由我取消”与“早已取消”；
/// - 取消不会打断已开始执行的任务。
#[derive(Clone, Debug)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// 交给任务条目的另一份引用，与 `self` 观测同一取消位。
    pub fn share(&self) -> Self {
        Self(Arc::clone(&self.0))
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// 置位取消；已取消时返回 `false`。
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}
