//! 只读诊断面。
//!
//! # 设计背景（Why）
//! - 外部监控需要观察算子的需求、缓冲量与终止状态，但不能为此进入排空循环或持有任何锁；
//! - 诊断值全部来自原子镜像：`buffered` 与活动批次在同一次交接中归零，
//!   因此跨越一次刷新时不会读到“旧批次长度 + 新代号”这类混合快照。
//!
//! # 契约说明（What）
//! - `cancelled` 与 `terminated` 互斥：取消只置前者，完成或错误只置后者；
//! - `run_on` 为注入的定时器工作单元名称，`upstream_attached` 表示是否已收到上游订阅；
//! - 快照可序列化为 JSON，便于直接导出到监控端点。

use std::borrow::Cow;
use std::sync::atomic::Ordering;

use serde::Serialize;

use crate::stage::BufferTimeoutStage;
use crate::termination::TerminalState;

/// 算子的执行方式：批次可能在定时器工作单元上异步投递。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum RunStyle {
    Async,
}

/// 某一时刻的诊断快照。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BufferTimeoutDiagnostics {
    /// 下游尚未满足的批次需求，`u64::MAX` 表示无界。
    pub requested_from_downstream: u64,
    /// 活动批次中的元素数。
    pub buffered: usize,
    /// 单批次上限，即 `max_size`。
    pub capacity: usize,
    pub cancelled: bool,
    pub terminated: bool,
    pub run_on: Cow<'static, str>,
    pub upstream_attached: bool,
    pub state: TerminalState,
}

impl<T: Send + 'static> BufferTimeoutStage<T> {
    /// 采集诊断快照。
    pub fn diagnostics(&self) -> BufferTimeoutDiagnostics {
        let state = self.state();
        BufferTimeoutDiagnostics {
            requested_from_downstream: self.ledger.requested(),
            buffered: self.buffered.load(Ordering::Acquire),
            capacity: self.config.max_size(),
            cancelled: state == TerminalState::Cancelled,
            terminated: state.is_terminated(),
            run_on: self.timer.worker_name(),
            upstream_attached: self.upstream.get().is_some(),
            state,
        }
    }

    pub fn run_style(&self) -> RunStyle {
        RunStyle::Async
    }
}
