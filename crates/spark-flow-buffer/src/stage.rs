//! 缓冲状态机：按大小或时间跨度把上游元素聚合为批次。
//!
//! # 设计背景（Why）
//! - 三个参与者会同时触碰同一个活动批次：生产线程的 `on_next`、定时器线程的刷新回调、
//!   以及下游线程的取消；若用阻塞锁保护批次，慢速的定时器回调会拖住生产线程，反之亦然；
//! - 因此本模块把所有批次变更串行化到一个“排空循环”中：每个参与者只把信号压入无锁队列，
//!   然后尝试抢占排空权；抢占失败的一方立即返回，由当前持有者代为处理其信号。
//!
//! # 逻辑解析（How）
//! - `wip` 计数从 0 变为 1 的调用者获得排空权，其余调用者只负责累加计数；
//!   持有者处理完队列后按 `missed` 回退计数，若期间有新信号到达则继续下一轮；
//! - 活动批次、批次代号与定时器句柄存放在 [`BatchArena`] 中，只有排空权持有者会锁定它，
//!   因此这把自旋锁在正常路径上永远不会发生争用；
//! - 每次交接批次都会递增代号；定时器回调携带调度时的代号，代号过期的回调被直接忽略，
//!   从而保证同一批次只做出一次刷新决策。
//!
//! # 契约说明（What）
//! - 元素按上游推送顺序进入批次，批次长度永不超过 `max_size`；
//! - 定时器触发时若批次为空，只重新调度，不发射空批次；
//! - 所有排空循环之外的读取（诊断面、`flush_now`）只访问原子镜像，不会与排空循环争用。

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use crossbeam_queue::SegQueue;
use spark_flow_core::{
    DiscardHook, FlowError, NoopDiscard, Subscriber, Subscription, TimerHandle, TimerService,
    codes,
};
use tracing::{error, trace};

use crate::config::{BufferTimeoutConfig, ConfigError};
use crate::demand::DemandLedger;
use crate::emitter::FlushTrigger;
use crate::termination::{FailureOrigin, TerminalFlag, TerminalState};

/// 预分配批次容量的上限，避免 `max_size` 极大时一次性申请过多内存。
const INITIAL_BATCH_CAPACITY: usize = 1024;

/// 排空循环处理的信号。
pub(crate) enum StageSignal<T> {
    /// 订阅建立，调度首个定时器。
    Start,
    Item(T),
    /// 定时器到期，携带调度时的批次代号。
    Tick(u64),
    Complete,
    Error(FlowError, FailureOrigin),
    /// 下游已取消，释放缓冲。
    Cancelled,
}

/// 活动批次及其伴随状态，仅由排空权持有者访问。
pub(crate) struct BatchArena<T> {
    pub(crate) batch: Vec<T>,
    pub(crate) generation: u64,
    pub(crate) timer: Option<TimerHandle>,
}

impl<T> BatchArena<T> {
    pub(crate) fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.cancel();
        }
    }
}

/// 按“最大批量或时间跨度”分批的缓冲算子。
///
/// # 使用方式（How）
/// - 通过 [`new`](Self::new) 或 [`with_discard`](Self::with_discard) 构造，得到 `Arc<Self>`；
/// - 把它作为上游的 [`Subscriber<T>`] 交给生产者；下游通过 `on_subscribe` 收到的
///   [`Subscription`] 声明批次需求或取消；
/// - 定时器服务在构造时显式注入，算子不查找任何全局调度器。
///
/// # 风险提示（Trade-offs）
/// - 取消立即生效，但若另一线程上的排空循环已经把批次交给下游，该批次仍可能在取消返回后到达；
///   在 `on_next` 内部重入取消则能保证不再有后续批次。
pub struct BufferTimeoutStage<T> {
    pub(crate) config: BufferTimeoutConfig,
    pub(crate) ledger: DemandLedger,
    pub(crate) terminal: TerminalFlag,
    pub(crate) downstream: Arc<dyn Subscriber<Vec<T>>>,
    pub(crate) timer: Arc<dyn TimerService>,
    pub(crate) discard: Arc<dyn DiscardHook<T>>,
    pub(crate) upstream: OnceLock<Arc<dyn Subscription>>,
    pub(crate) buffered: AtomicUsize,
    generation: AtomicU64,
    signals: SegQueue<StageSignal<T>>,
    wip: AtomicUsize,
    arena: spin::Mutex<BatchArena<T>>,
    this: Weak<Self>,
}

impl<T: Send + 'static> BufferTimeoutStage<T> {
    /// 构造算子，未交付元素随 `Drop` 释放。
    pub fn new(
        config: BufferTimeoutConfig,
        downstream: Arc<dyn Subscriber<Vec<T>>>,
        timer: Arc<dyn TimerService>,
    ) -> Result<Arc<Self>, ConfigError> {
        Self::with_discard(config, downstream, timer, Arc::new(NoopDiscard))
    }

    /// 构造算子，并把所有未交付元素交给 `discard`。
    pub fn with_discard(
        config: BufferTimeoutConfig,
        downstream: Arc<dyn Subscriber<Vec<T>>>,
        timer: Arc<dyn TimerService>,
        discard: Arc<dyn DiscardHook<T>>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let ledger = DemandLedger::new(config.upstream_demand(), config.max_size());
        let capacity = config.max_size().min(INITIAL_BATCH_CAPACITY);
        Ok(Arc::new_cyclic(|this| Self {
            config,
            ledger,
            terminal: TerminalFlag::new(),
            downstream,
            timer,
            discard,
            upstream: OnceLock::new(),
            buffered: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            signals: SegQueue::new(),
            wip: AtomicUsize::new(0),
            arena: spin::Mutex::new(BatchArena {
                batch: Vec::with_capacity(capacity),
                generation: 0,
                timer: None,
            }),
            this: this.clone(),
        }))
    }

    pub fn config(&self) -> &BufferTimeoutConfig {
        &self.config
    }

    /// 当前终止状态。
    pub fn state(&self) -> TerminalState {
        self.terminal.state()
    }

    /// 已绑定的上游订阅句柄。
    pub fn upstream(&self) -> Option<Arc<dyn Subscription>> {
        self.upstream.get().cloned()
    }

    /// 定时器回调入口：为代号为 `generation` 的批次请求一次时间刷新。
    ///
    /// 代号已过期（该批次已被大小触发或更早的回调交接）时为空操作。
    pub fn flush_callback(&self, generation: u64) {
        self.signal(StageSignal::Tick(generation));
    }

    /// 立即对当前批次执行一次时间刷新，等价于当前代号的定时器提前到期。
    pub fn flush_now(&self) {
        self.flush_callback(self.generation.load(Ordering::Acquire));
    }

    /// 下游追加 `n` 个批次的需求。
    pub(crate) fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.ledger.add_demand(n);
        if !self.terminal.is_active() {
            return;
        }
        if let Some(upstream) = self.upstream.get()
            && let Some(credit) = self.ledger.upstream_shortfall()
        {
            upstream.request(credit);
        }
    }

    pub(crate) fn enqueue_cancelled(&self) {
        self.signal(StageSignal::Cancelled);
    }

    pub(crate) fn initial_capacity(&self) -> usize {
        self.config.max_size().min(INITIAL_BATCH_CAPACITY)
    }

    pub(crate) fn publish_generation(&self, generation: u64) {
        self.generation.store(generation, Ordering::Release);
    }

    pub(crate) fn weak(&self) -> Weak<Self> {
        self.this.clone()
    }

    fn signal(&self, signal: StageSignal<T>) {
        self.signals.push(signal);
        self.drain();
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            {
                let mut arena = self.arena.lock();
                while let Some(signal) = self.signals.pop() {
                    self.dispatch(&mut arena, signal);
                }
            }
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }

    fn dispatch(&self, arena: &mut BatchArena<T>, signal: StageSignal<T>) {
        match signal {
            StageSignal::Start => self.start(arena),
            StageSignal::Item(item) => self.accept(arena, item),
            StageSignal::Tick(generation) => self.tick(arena, generation),
            StageSignal::Complete => self.complete(arena),
            StageSignal::Error(error, origin) => self.fail(arena, error, origin),
            StageSignal::Cancelled => self.release_after_cancel(arena),
        }
    }

    fn start(&self, arena: &mut BatchArena<T>) {
        if !self.terminal.is_active() || arena.timer.is_some() {
            return;
        }
        self.arm_timer(arena);
    }

    fn accept(&self, arena: &mut BatchArena<T>, item: T) {
        if !self.terminal.is_active() {
            self.discard.discard(item);
            return;
        }
        if self.ledger.on_item_received().is_err() {
            self.discard.discard(item);
            self.fail(arena, FlowError::unrequested_element(), FailureOrigin::Stage);
            return;
        }
        arena.batch.push(item);
        let len = arena.batch.len();
        self.buffered.store(len, Ordering::Release);
        if len >= self.config.max_size() {
            self.flush(arena, FlushTrigger::Size);
        }
    }

    fn tick(&self, arena: &mut BatchArena<T>, generation: u64) {
        if !self.terminal.is_active() {
            return;
        }
        if generation != arena.generation {
            trace!(generation, current = arena.generation, "stale timer tick ignored");
            return;
        }
        if arena.batch.is_empty() {
            trace!(generation, "empty batch on timer tick, rescheduling");
            arena.cancel_timer();
            self.arm_timer(arena);
            return;
        }
        self.flush(arena, FlushTrigger::Time);
    }
}

impl<T: Send + 'static> Subscriber<T> for BufferTimeoutStage<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.upstream.set(Arc::clone(&subscription)).is_err() {
            subscription.cancel();
            error!(
                code = codes::DUPLICATE_SUBSCRIPTION,
                "on_subscribe called more than once"
            );
            self.signal(StageSignal::Error(
                FlowError::duplicate_subscription(),
                FailureOrigin::Stage,
            ));
            return;
        }

        let handle: Arc<dyn Subscription> = Arc::new(StageSubscription {
            stage: self.this.clone(),
        });
        self.downstream.on_subscribe(handle);
        self.signal(StageSignal::Start);

        if self.terminal.is_active()
            && let Some(credit) = self.ledger.initial_upstream_request()
        {
            subscription.request(credit);
        }
    }

    fn on_next(&self, item: T) {
        self.signal(StageSignal::Item(item));
    }

    fn on_error(&self, error: FlowError) {
        self.signal(StageSignal::Error(error, FailureOrigin::Upstream));
    }

    fn on_complete(&self) {
        self.signal(StageSignal::Complete);
    }
}

impl<T> Drop for BufferTimeoutStage<T> {
    fn drop(&mut self) {
        self.arena.get_mut().cancel_timer();
    }
}

/// 交给下游的订阅句柄。
///
/// 只持有算子的弱引用：下游通常长期持有该句柄，而算子又持有下游，强引用会形成环。
struct StageSubscription<T> {
    stage: Weak<BufferTimeoutStage<T>>,
}

impl<T: Send + 'static> Subscription for StageSubscription<T> {
    fn request(&self, n: u64) {
        if let Some(stage) = self.stage.upgrade() {
            stage.request(n);
        }
    }

    fn cancel(&self) {
        if let Some(stage) = self.stage.upgrade() {
            stage.cancel_stage();
        }
    }
}
