//! 批次交接与下游投递。
//!
//! # 契约说明（What）
//! - 交接顺序固定为：递增代号 → 取消旧定时器 → 取走批次 → 调度下一次定时器 → 扣减需求 → 投递；
//! - 调度被拒绝时，刚取走的批次交给丢弃钩子，算子以定时器拒绝错误终止；
//! - 需求不足时，新定时器被取消，批次交给丢弃钩子，算子以需求不足错误终止；
//! - 成功投递的批次不会再进入丢弃钩子。

use std::fmt;
use std::mem;
use std::sync::atomic::Ordering;

use spark_flow_core::{FlowError, TimerHandle, TimerRejected};
use tracing::debug;

use crate::stage::{BatchArena, BufferTimeoutStage};
use crate::termination::FailureOrigin;

/// 触发刷新的原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlushTrigger {
    /// 批次达到 `max_size`。
    Size,
    /// 批次开始后经过了 `time_span`。
    Time,
    /// 上游完成时的最后一次刷新。
    Completion,
}

impl FlushTrigger {
    pub const fn as_str(self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Time => "time",
            FlushTrigger::Completion => "completion",
        }
    }
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<T: Send + 'static> BufferTimeoutStage<T> {
    /// 关闭当前批次，开启新批次与新定时器，然后投递旧批次。
    pub(crate) fn flush(&self, arena: &mut BatchArena<T>, trigger: FlushTrigger) {
        arena.generation = arena.generation.wrapping_add(1);
        self.publish_generation(arena.generation);
        arena.cancel_timer();
        let batch = self.hand_off(arena);

        match self.schedule_tick(arena.generation) {
            Ok(handle) => arena.timer = Some(handle),
            Err(rejection) => {
                self.discard.discard_all(batch);
                self.fail(arena, FlowError::timer_rejected(rejection), FailureOrigin::Stage);
                return;
            }
        }
        self.emit(arena, batch, trigger);
    }

    /// 把批次交给下游；返回 `false` 表示批次未投递（已丢弃）。
    pub(crate) fn emit(
        &self,
        arena: &mut BatchArena<T>,
        batch: Vec<T>,
        trigger: FlushTrigger,
    ) -> bool {
        if !self.terminal.is_active() {
            self.discard.discard_all(batch);
            return false;
        }
        if !self.ledger.try_consume_one() {
            arena.cancel_timer();
            self.discard.discard_all(batch);
            self.fail(arena, FlowError::insufficient_demand(), FailureOrigin::Stage);
            return false;
        }
        debug!(
            trigger = trigger.as_str(),
            batch_len = batch.len(),
            generation = arena.generation,
            "buffer flushed"
        );
        self.downstream.on_next(batch);
        true
    }

    /// 为当前代号调度定时器；被拒绝时以定时器拒绝错误终止。
    pub(crate) fn arm_timer(&self, arena: &mut BatchArena<T>) {
        match self.schedule_tick(arena.generation) {
            Ok(handle) => arena.timer = Some(handle),
            Err(rejection) => {
                self.fail(arena, FlowError::timer_rejected(rejection), FailureOrigin::Stage)
            }
        }
    }

    /// 取走活动批次并换上预分配的新批次。
    pub(crate) fn hand_off(&self, arena: &mut BatchArena<T>) -> Vec<T> {
        let fresh = Vec::with_capacity(self.initial_capacity());
        self.take_with(arena, fresh)
    }

    /// 取走活动批次，不再为新批次预分配内存。
    pub(crate) fn take_batch(&self, arena: &mut BatchArena<T>) -> Vec<T> {
        self.take_with(arena, Vec::new())
    }

    fn take_with(&self, arena: &mut BatchArena<T>, fresh: Vec<T>) -> Vec<T> {
        let batch = mem::replace(&mut arena.batch, fresh);
        self.buffered.store(0, Ordering::Release);
        batch
    }

    fn schedule_tick(&self, generation: u64) -> Result<TimerHandle, TimerRejected> {
        let stage = self.weak();
        self.timer.schedule(
            self.config.time_span(),
            Box::new(move || {
                if let Some(stage) = stage.upgrade() {
                    stage.flush_callback(generation);
                }
            }),
        )
    }
}
