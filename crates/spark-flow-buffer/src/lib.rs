#![deny(unsafe_code)]

//! `spark-flow-buffer` 提供按“最大批量或时间跨度”分批的背压缓冲算子。
//!
//! # 模块定位（Why）
//! - 上游逐个推送元素，下游按批次声明需求；算子需要把两者对齐，
//!   同时接受第三个独立时序的参与者：在定时器线程上触发的时间刷新；
//! - 三个参与者最终汇聚到同一个活动批次上，必须做到不重复发射、不丢失元素、不超出下游需求。
//!
//! # 设计概要（How）
//! - [`demand`]：下游需求与上游额度的原子账本；
//! - [`stage`]：缓冲状态机，所有批次变更都在一个无锁排空循环内完成；
//! - [`emitter`]：批次交接与下游投递，以及下一次定时器的重新调度；
//! - [`termination`]：完成、错误与取消三条终止路径的“恰好一次”协调，未交付元素交给丢弃钩子；
//! - [`diagnostics`]：只读诊断面；[`config`]：可反序列化的算子配置。
//!
//! # 使用示例
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use spark_flow_buffer::{BufferTimeoutConfig, BufferTimeoutStage};
//! use spark_flow_core::test_stubs::{ManualSubscription, RecordingSubscriber};
//! use spark_flow_core::{Subscriber, VirtualTimer};
//!
//! let timer = VirtualTimer::new();
//! let downstream = RecordingSubscriber::<Vec<u32>>::unbounded();
//! let stage = BufferTimeoutStage::<u32>::new(
//!     BufferTimeoutConfig::new(2, Duration::from_millis(100)),
//!     downstream.clone(),
//!     Arc::new(timer.clone()),
//! )
//! .expect("valid config");
//!
//! stage.on_subscribe(ManualSubscription::new());
//! stage.on_next(1);
//! stage.on_next(2);
//! stage.on_next(3);
//! timer.advance(Duration::from_millis(100));
//!
//! assert_eq!(downstream.items(), vec![vec![1, 2], vec![3]]);
//! ```

pub mod config;
pub mod demand;
pub mod diagnostics;
pub mod emitter;
pub mod stage;
pub mod termination;

use std::sync::Arc;
use std::time::Duration;

use spark_flow_core::{Subscriber, TimerService};

pub use config::{BufferTimeoutConfig, ConfigError, UpstreamDemand};
pub use demand::DemandLedger;
pub use diagnostics::{BufferTimeoutDiagnostics, RunStyle};
pub use emitter::FlushTrigger;
pub use stage::BufferTimeoutStage;
pub use termination::TerminalState;

/// 以默认策略（无界上游需求、无丢弃钩子）构造缓冲算子。
pub fn buffer_timeout<T: Send + 'static>(
    max_size: usize,
    time_span: Duration,
    downstream: Arc<dyn Subscriber<Vec<T>>>,
    timer: Arc<dyn TimerService>,
) -> Result<Arc<BufferTimeoutStage<T>>, ConfigError> {
    BufferTimeoutStage::new(BufferTimeoutConfig::new(max_size, time_span), downstream, timer)
}
