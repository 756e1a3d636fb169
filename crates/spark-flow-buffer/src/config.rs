//! 缓冲算子配置。
//!
//! # 契约说明（What）
//! - `max_size`：单个批次的最大元素数，必须为正；
//! - `time_span`：批次开始后允许等待的最长时间，必须为正；序列化为毫秒字段 `time_span_ms`；
//! - `upstream_demand`：向上游请求额度的策略，缺省为 [`UpstreamDemand::Unbounded`]。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 向上游请求额度的策略。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamDemand {
    /// 订阅时一次性请求无界额度，背压完全由算子自身的需求账本承担。
    #[default]
    Unbounded,
    /// 维持上游未到达额度不低于 `下游需求 × max_size`，超额推送视为协议违例。
    Prefetch,
}

/// `BufferTimeoutConfig` 描述一个缓冲算子实例的分批参数。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferTimeoutConfig {
    max_size: usize,
    #[serde(rename = "time_span_ms", with = "duration_ms")]
    time_span: Duration,
    #[serde(default)]
    upstream_demand: UpstreamDemand,
}

impl BufferTimeoutConfig {
    /// 以无界上游策略构造配置；合法性在 [`validate`](Self::validate) 中检查。
    pub const fn new(max_size: usize, time_span: Duration) -> Self {
        Self {
            max_size,
            time_span,
            upstream_demand: UpstreamDemand::Unbounded,
        }
    }

    /// 替换上游额度策略。
    pub fn with_upstream_demand(mut self, upstream_demand: UpstreamDemand) -> Self {
        self.upstream_demand = upstream_demand;
        self
    }

    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    pub const fn time_span(&self) -> Duration {
        self.time_span
    }

    pub const fn upstream_demand(&self) -> UpstreamDemand {
        self.upstream_demand
    }

    /// 校验配置。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        if self.time_span.is_zero() {
            return Err(ConfigError::ZeroTimeSpan);
        }
        Ok(())
    }
}

/// 配置校验错误。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("buffer_timeout.max_size must be greater than zero")]
    ZeroMaxSize,
    #[error("buffer_timeout.time_span must be greater than zero")]
    ZeroTimeSpan,
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
