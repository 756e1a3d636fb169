//! 终止协调：完成、错误与取消三条路径恰好生效一次。
//!
//! # 设计背景（Why）
//! - 上游完成/错误由排空循环按信号顺序处理，下游取消则需要立即生效；
//!   三者可能在不同线程上同时到达，必须通过一次原子状态跃迁裁决唯一胜者；
//! - 所有已缓冲却未交付的元素都要交给丢弃钩子，不允许静默丢弃。
//!
//! # 契约说明（What）
//! - 状态只允许从 [`TerminalState::Active`] 单向跃迁到其它三个状态之一，之后不再变化；
//! - 胜出的路径负责向下游发出唯一的终止信号（取消路径不向下游发信号，而是向上游传播取消）；
//! - 落败路径一律视为空操作，迟到的上游错误只记录日志。

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;
use spark_flow_core::FlowError;
use tracing::{debug, warn};

use crate::emitter::FlushTrigger;
use crate::stage::{BatchArena, BufferTimeoutStage};

/// 算子的终止状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Active,
    Cancelled,
    Completed,
    Errored,
}

impl TerminalState {
    const fn encode(self) -> u8 {
        match self {
            TerminalState::Active => 0,
            TerminalState::Cancelled => 1,
            TerminalState::Completed => 2,
            TerminalState::Errored => 3,
        }
    }

    const fn decode(raw: u8) -> Self {
        match raw {
            0 => TerminalState::Active,
            1 => TerminalState::Cancelled,
            2 => TerminalState::Completed,
            _ => TerminalState::Errored,
        }
    }

    /// 是否为错误或完成。
    pub const fn is_terminated(self) -> bool {
        matches!(self, TerminalState::Completed | TerminalState::Errored)
    }
}

/// 单向终止标记。
#[derive(Debug)]
pub(crate) struct TerminalFlag {
    state: AtomicU8,
}

impl TerminalFlag {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(TerminalState::Active.encode()),
        }
    }

    pub(crate) fn state(&self) -> TerminalState {
        TerminalState::decode(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state() == TerminalState::Active
    }

    /// 从 `Active` 跃迁到 `to`；只有首个调用者返回 `true`。
    pub(crate) fn try_transition(&self, to: TerminalState) -> bool {
        self.state
            .compare_exchange(
                TerminalState::Active.encode(),
                to.encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// 终止错误的来源，决定是否需要反向取消上游。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FailureOrigin {
    /// 上游自身报告的错误，上游已终止。
    Upstream,
    /// 算子内部判定的致命错误，需要取消上游。
    Stage,
}

impl<T: Send + 'static> BufferTimeoutStage<T> {
    /// 处理上游完成：先做最后一次刷新，再向下游传播完成。
    pub(crate) fn complete(&self, arena: &mut BatchArena<T>) {
        if !self.terminal.is_active() {
            return;
        }
        arena.cancel_timer();
        if !arena.batch.is_empty() {
            let batch = self.take_batch(arena);
            if !self.emit(arena, batch, FlushTrigger::Completion) {
                return;
            }
        }
        if self.terminal.try_transition(TerminalState::Completed) {
            debug!("buffer timeout stage completed");
            self.downstream.on_complete();
        }
    }

    /// 以错误终止：取消定时器、丢弃缓冲元素、向下游传播错误。
    pub(crate) fn fail(&self, arena: &mut BatchArena<T>, error: FlowError, origin: FailureOrigin) {
        if !self.terminal.try_transition(TerminalState::Errored) {
            debug!(code = error.code(), "error dropped after termination");
            return;
        }
        arena.cancel_timer();
        let leftovers = self.take_batch(arena);
        self.discard.discard_all(leftovers);
        if origin == FailureOrigin::Stage {
            warn!(code = error.code(), message = error.message(), "buffer timeout stage failed");
            self.cancel_upstream();
        }
        self.downstream.on_error(error);
    }

    /// 排空循环观察到取消后的清理：取消定时器并丢弃活动批次。
    pub(crate) fn release_after_cancel(&self, arena: &mut BatchArena<T>) {
        arena.cancel_timer();
        let leftovers = self.take_batch(arena);
        if !leftovers.is_empty() {
            debug!(discarded = leftovers.len(), "buffer discarded on cancel");
        }
        self.discard.discard_all(leftovers);
    }

    /// 下游取消：立即生效，随后由排空循环释放缓冲。
    pub(crate) fn cancel_stage(&self) {
        if self.terminal.try_transition(TerminalState::Cancelled) {
            self.cancel_upstream();
            self.enqueue_cancelled();
        }
    }

    fn cancel_upstream(&self) {
        if let Some(upstream) = self.upstream.get() {
            upstream.cancel();
        }
    }
}

#[cfg(all(test, not(any(loom, spark_loom))))]
mod tests {
    use super::*;

    #[test]
    fn only_first_transition_wins() {
        let flag = TerminalFlag::new();
        assert!(flag.is_active());
        assert!(flag.try_transition(TerminalState::Cancelled));
        assert!(!flag.try_transition(TerminalState::Errored));
        assert!(!flag.try_transition(TerminalState::Completed));
        assert_eq!(flag.state(), TerminalState::Cancelled);
        assert!(!flag.state().is_terminated());
    }
}
