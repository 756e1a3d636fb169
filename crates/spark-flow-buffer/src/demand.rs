//! 需求账本：下游批次需求与上游元素额度。
//!
//! # 设计背景（Why）
//! - 下游需求可能在任意线程上增加，同时生产线程与定时器线程在发射批次时扣减；
//!   三方并发下既不能丢失更新，也不能让计数变为负数；
//! - 全部使用乐观 CAS 循环，不持有任何锁。
//!
//! # 契约说明（What）
//! - `requested` 为下游尚未满足的批次需求，饱和于 [`UNBOUNDED`]；无界时扣减不生效；
//! - `outstanding` 为已向上游请求、尚未到达的元素额度；[`UpstreamDemand::Unbounded`] 策略下恒为无界；
//! - 向上游请求的数量永远为正，且只在需求账本确认存在缺口时才发出。

#[cfg(not(any(loom, spark_loom)))]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(any(loom, spark_loom))]
use loom::sync::atomic::{AtomicU64, Ordering};

use spark_flow_core::UNBOUNDED;
use spark_flow_core::flow::{add_cap, multiply_cap};

use crate::config::UpstreamDemand;

/// 上游在额度耗尽后仍推送元素。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnrequestedElement;

/// 需求账本。
///
/// # 逻辑解析（How）
/// - `add_demand`/`try_consume_one` 针对 `requested` 做 CAS 累加/扣减；
/// - `upstream_shortfall` 在 `Prefetch` 策略下把 `outstanding` CAS 抬升到
///   `requested × batch_size`，返回抬升量作为本次应向上游请求的数量；
/// - `on_item_received` 扣减一个上游额度，额度为零时报告 [`UnrequestedElement`]。
#[derive(Debug)]
pub struct DemandLedger {
    requested: AtomicU64,
    outstanding: AtomicU64,
    policy: UpstreamDemand,
    batch_size: u64,
}

impl DemandLedger {
    /// 创建账本，初始下游需求为零。
    pub fn new(policy: UpstreamDemand, batch_size: usize) -> Self {
        let outstanding = match policy {
            UpstreamDemand::Unbounded => UNBOUNDED,
            UpstreamDemand::Prefetch => 0,
        };
        Self {
            requested: AtomicU64::new(0),
            outstanding: AtomicU64::new(outstanding),
            policy,
            batch_size: u64::try_from(batch_size).unwrap_or(UNBOUNDED),
        }
    }

    /// 当前下游需求。
    pub fn requested(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }

    /// 当前已请求、未到达的上游额度。
    pub fn outstanding(&self) -> u64 {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn policy(&self) -> UpstreamDemand {
        self.policy
    }

    /// 追加下游需求并返回累加后的值；`n == 0` 为空操作。
    pub fn add_demand(&self, n: u64) -> u64 {
        let mut current = self.requested.load(Ordering::Acquire);
        loop {
            if n == 0 || current == UNBOUNDED {
                return current;
            }
            let next = add_cap(current, n);
            match self.requested.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// 尝试为一个批次扣减需求；需求为零时返回 `false` 且保持不变。
    pub fn try_consume_one(&self) -> bool {
        let mut current = self.requested.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return true;
            }
            if current == 0 {
                return false;
            }
            match self.requested.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// 订阅建立时应立即向上游请求的数量。
    ///
    /// `Unbounded` 策略固定返回无界额度；`Prefetch` 策略按订阅前已累积的下游需求计算缺口。
    pub fn initial_upstream_request(&self) -> Option<u64> {
        match self.policy {
            UpstreamDemand::Unbounded => Some(UNBOUNDED),
            UpstreamDemand::Prefetch => self.upstream_shortfall(),
        }
    }

    /// 计算并占用上游额度缺口。
    ///
    /// 返回 `Some(n)` 时 `n > 0`，调用方必须恰好向上游请求 `n`；返回 `None` 表示无需请求。
    pub fn upstream_shortfall(&self) -> Option<u64> {
        if self.policy == UpstreamDemand::Unbounded {
            return None;
        }
        let limit = multiply_cap(self.requested(), self.batch_size);
        let mut current = self.outstanding.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED || limit <= current {
                return None;
            }
            match self.outstanding.compare_exchange_weak(
                current,
                limit,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) if limit == UNBOUNDED => return Some(UNBOUNDED),
                Ok(_) => return Some(limit - current),
                Err(actual) => current = actual,
            }
        }
    }

    /// 记录一个到达的上游元素。
    pub fn on_item_received(&self) -> Result<(), UnrequestedElement> {
        let mut current = self.outstanding.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return Ok(());
            }
            if current == 0 {
                return Err(UnrequestedElement);
            }
            match self.outstanding.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }
}
