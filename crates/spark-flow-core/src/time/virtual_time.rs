use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{TimerHandle, TimerService, TimerTask};
use super::CancelFlag;
use crate::error::TimerRejected;

const VIRTUAL_WORKER: &str = "virtual-timer";

/// 虚拟时间定时器：通过手动推进时间在测试中复现确定性的触发序列。
///
/// # 设计动机（Why）
/// - 按时间分批的场景（例如“每 300ms 一个元素、2000ms 超时”）在真实时间下极易抖动；
/// - 虚拟时间允许测试显式控制时间推进，并在调用线程上立即执行到期任务。
///
/// # 行为概览（How）
/// - 内部维护 `now`（自构造起的虚拟偏移）与按 `(截止点, 序号)` 排序的任务表；
/// - `advance` 逐个取出截止点不晚于目标时间的任务，先把 `now` 推进到该截止点再执行，
///   因此任务内部新调度、且在目标时间内到期的任务也会在同一次推进中执行；
/// - 执行任务时不持有内部锁，任务可以重入 `schedule`。
///
/// # 契约说明（What）
/// - 同一截止点的任务按调度顺序执行；
/// - `advance(Duration::ZERO)` 会执行所有已到期任务（包括零延迟任务）；
/// - `shutdown` 之后的调度一律返回 [`TimerRejected`]。
#[derive(Clone)]
pub struct VirtualTimer {
    inner: Arc<Mutex<VirtualState>>,
}

struct VirtualState {
    now: Duration,
    next_seq: u64,
    tasks: BTreeMap<(Duration, u64), VirtualEntry>,
    shutdown: bool,
}

struct VirtualEntry {
    cancellation: CancelFlag,
    task: TimerTask,
}

impl VirtualTimer {
    /// 创建虚拟时间为零的定时器。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VirtualState {
                now: Duration::ZERO,
                next_seq: 0,
                tasks: BTreeMap::new(),
                shutdown: false,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VirtualState> {
        self.inner.lock().expect("virtual-timer state lock poisoned")
    }

    /// 当前虚拟时间。
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// 推进虚拟时间，并执行所有在目标时间之前到期的任务。
    pub fn advance(&self, delta: Duration) {
        let target = self.lock().now.saturating_add(delta);
        loop {
            let entry = {
                let mut state = self.lock();
                let due = state
                    .tasks
                    .first_key_value()
                    .map(|(key, _)| *key)
                    .filter(|(deadline, _)| *deadline <= target);
                match due {
                    Some(key) => {
                        state.now = state.now.max(key.0);
                        state.tasks.remove(&key)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            match entry {
                Some(entry) => {
                    if !entry.cancellation.is_cancelled() {
                        (entry.task)();
                    }
                }
                None => return,
            }
        }
    }

    /// 推进到绝对虚拟时间；若目标早于当前时间则只执行已到期任务。
    pub fn advance_to(&self, instant: Duration) {
        let now = self.now();
        self.advance(instant.saturating_sub(now));
    }

    /// 尚未执行且未取消的任务数量。
    pub fn pending(&self) -> usize {
        self.lock()
            .tasks
            .values()
            .filter(|entry| !entry.cancellation.is_cancelled())
            .count()
    }

    /// 关闭定时器：丢弃所有未执行任务，之后的调度均被拒绝。
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shutdown = true;
        state.tasks.clear();
    }

    /// 定时器是否已关闭。
    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }
}

impl Default for VirtualTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService for VirtualTimer {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Result<TimerHandle, TimerRejected> {
        let cancellation = CancelFlag::new();
        let mut state = self.lock();
        if state.shutdown {
            return Err(TimerRejected::shutdown(VIRTUAL_WORKER));
        }
        let deadline = state.now.saturating_add(delay);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.tasks.insert(
            (deadline, seq),
            VirtualEntry {
                cancellation: cancellation.share(),
                task,
            },
        );
        Ok(TimerHandle::new(cancellation))
    }

    fn worker_name(&self) -> Cow<'static, str> {
        Cow::Borrowed(VIRTUAL_WORKER)
    }
}

impl fmt::Debug for VirtualTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("VirtualTimer")
            .field("now", &state.now)
            .field("scheduled", &state.tasks.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}
