//! 记录型测试桩：下游订阅者、上游订阅句柄与丢弃钩子。
//!
//! # 使用方式（How）
//! - 算子测试把 [`RecordingSubscriber`] 作为下游、[`ManualSubscription`] 作为上游句柄、
//!   [`RecordingDiscard`] 作为丢弃钩子，随后对三者的记录做断言；
//! - 所有记录均使用 `std::sync::Mutex` 保护，可在生产线程与定时器线程间共享。
//!
//! # 契约说明（What）
//! - 桩对象只记录，不做协议校验；协议违例由被测算子自行报告。

use std::sync::{Arc, Mutex, MutexGuard};

use crate::time::CancelFlag;
use crate::discard::DiscardHook;
use crate::error::FlowError;
use crate::flow::{Subscriber, Subscription, UNBOUNDED, add_cap};

/// 下游收到的信号。
#[derive(Clone, Debug)]
pub enum Signal<T> {
    Subscribed,
    Next(T),
    Error(FlowError),
    Complete,
}

/// 记录所有信号的下游订阅者。
pub struct RecordingSubscriber<T> {
    initial_request: u64,
    cancel_after: Option<usize>,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    signals: Mutex<Vec<Signal<T>>>,
}

impl<T> RecordingSubscriber<T> {
    /// 订阅时不请求任何需求。
    pub fn new() -> Arc<Self> {
        Self::with_initial_request(0)
    }

    /// 订阅时立即请求无界需求。
    pub fn unbounded() -> Arc<Self> {
        Self::with_initial_request(UNBOUNDED)
    }

    /// 订阅时立即请求 `n` 个需求。
    pub fn with_initial_request(n: u64) -> Arc<Self> {
        Arc::new(Self {
            initial_request: n,
            cancel_after: None,
            subscription: Mutex::new(None),
            signals: Mutex::new(Vec::new()),
        })
    }

    /// 在收到第 `count` 个元素后，于 `on_next` 内部重入取消。
    pub fn cancelling_after(initial_request: u64, count: usize) -> Arc<Self> {
        Arc::new(Self {
            initial_request,
            cancel_after: Some(count),
            subscription: Mutex::new(None),
            signals: Mutex::new(Vec::new()),
        })
    }

    fn lock_signals(&self) -> MutexGuard<'_, Vec<Signal<T>>> {
        self.signals.lock().expect("recording subscriber lock poisoned")
    }

    fn current_subscription(&self) -> Option<Arc<dyn Subscription>> {
        self.subscription
            .lock()
            .expect("recording subscription lock poisoned")
            .clone()
    }

    /// 向上游追加需求。
    pub fn request(&self, n: u64) {
        if let Some(subscription) = self.current_subscription() {
            subscription.request(n);
        }
    }

    /// 取消上游。
    pub fn cancel(&self) {
        if let Some(subscription) = self.current_subscription() {
            subscription.cancel();
        }
    }

    /// 是否已收到 `on_subscribe`。
    pub fn is_subscribed(&self) -> bool {
        self.current_subscription().is_some()
    }

    /// 已收到的元素数量。
    pub fn next_count(&self) -> usize {
        self.lock_signals()
            .iter()
            .filter(|signal| matches!(signal, Signal::Next(_)))
            .count()
    }

    /// 是否已收到 `on_complete`。
    pub fn is_completed(&self) -> bool {
        self.lock_signals()
            .iter()
            .any(|signal| matches!(signal, Signal::Complete))
    }

    /// 收到的终止错误（若有）。
    pub fn error(&self) -> Option<FlowError> {
        self.lock_signals().iter().find_map(|signal| match signal {
            Signal::Error(err) => Some(err.clone()),
            _ => None,
        })
    }

    /// 终止信号数量（`on_error` + `on_complete`）。
    pub fn terminal_count(&self) -> usize {
        self.lock_signals()
            .iter()
            .filter(|signal| matches!(signal, Signal::Error(_) | Signal::Complete))
            .count()
    }
}

impl<T: Clone> RecordingSubscriber<T> {
    /// 按到达顺序返回所有元素。
    pub fn items(&self) -> Vec<T> {
        self.lock_signals()
            .iter()
            .filter_map(|signal| match signal {
                Signal::Next(item) => Some(item.clone()),
                _ => None,
            })
            .collect()
    }

    /// 返回完整信号序列。
    pub fn signals(&self) -> Vec<Signal<T>> {
        self.lock_signals().clone()
    }
}

impl<T: Send> Subscriber<T> for RecordingSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        *self
            .subscription
            .lock()
            .expect("recording subscription lock poisoned") = Some(Arc::clone(&subscription));
        self.lock_signals().push(Signal::Subscribed);
        if self.initial_request > 0 {
            subscription.request(self.initial_request);
        }
    }

    fn on_next(&self, item: T) {
        let received = {
            let mut signals = self.lock_signals();
            signals.push(Signal::Next(item));
            signals
                .iter()
                .filter(|signal| matches!(signal, Signal::Next(_)))
                .count()
        };
        if self.cancel_after == Some(received) {
            self.cancel();
        }
    }

    fn on_error(&self, error: FlowError) {
        self.lock_signals().push(Signal::Error(error));
    }

    fn on_complete(&self) {
        self.lock_signals().push(Signal::Complete);
    }
}

/// 手动驱动的上游订阅句柄：记录每一次 `request` 与 `cancel`。
#[derive(Debug, Default)]
pub struct ManualSubscription {
    requests: Mutex<Vec<u64>>,
    cancellation: CancelFlag,
}

impl ManualSubscription {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 按调用顺序返回所有请求量。
    pub fn requests(&self) -> Vec<u64> {
        self.requests
            .lock()
            .expect("manual subscription lock poisoned")
            .clone()
    }

    /// 累计请求量（饱和于 [`UNBOUNDED`]）。
    pub fn requested_total(&self) -> u64 {
        self.requests().into_iter().fold(0, add_cap)
    }

    /// 是否收到过取消。
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Subscription for ManualSubscription {
    fn request(&self, n: u64) {
        self.requests
            .lock()
            .expect("manual subscription lock poisoned")
            .push(n);
    }

    fn cancel(&self) {
        self.cancellation.cancel();
    }
}

/// 记录所有被丢弃元素的钩子。
#[derive(Debug)]
pub struct RecordingDiscard<T> {
    items: Mutex<Vec<T>>,
}

impl<T> RecordingDiscard<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(Vec::new()),
        })
    }

    /// 已丢弃元素数量。
    pub fn len(&self) -> usize {
        self.items.lock().expect("recording discard lock poisoned").len()
    }

    /// 是否尚未丢弃任何元素。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> RecordingDiscard<T> {
    /// 按丢弃顺序返回元素。
    pub fn items(&self) -> Vec<T> {
        self.items
            .lock()
            .expect("recording discard lock poisoned")
            .clone()
    }
}

impl<T: Send> DiscardHook<T> for RecordingDiscard<T> {
    fn discard(&self, item: T) {
        self.items
            .lock()
            .expect("recording discard lock poisoned")
            .push(item);
    }
}
