// 教案级说明：真实时间的定时器实现，依赖 `std::thread` 与 `Condvar`。
//
// - **意图 (Why)**：算子的时间触发回调需要运行在独立于生产线程的执行上下文上；
//   这里为每个服务实例启动一个具名工作线程，所有到期任务都在该线程上串行执行。
// - **契约 (What)**：工作线程只在“取出到期任务”时持有内部锁，执行任务前释放锁，
//   因此任务内部可以再次调用 `schedule`；`shutdown` 之后的调度一律返回拒绝。
use std::borrow::Cow;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{TimerHandle, TimerService, TimerTask};
use super::CancelFlag;
use crate::error::TimerRejected;

/// 以单个具名工作线程驱动的定时器服务。
///
/// # 行为概览（How）
/// - 内部维护按截止时间排序的最小堆，工作线程在 `Condvar` 上等待最早的截止点；
/// - `schedule` 压入新条目并唤醒工作线程，使更早的截止点能及时生效；
/// - `shutdown` 清空堆、通知工作线程退出并等待其结束（若在工作线程内部调用则不等待）。
///
/// # 契约说明（What）
/// - 同一截止时间的任务按调度顺序执行；
/// - 被取消的任务在到期时被跳过；
/// - `Drop` 时自动执行 `shutdown`。
pub struct ThreadTimer {
    inner: Arc<TimerInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

struct TimerInner {
    name: Cow<'static, str>,
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

struct TimerState {
    queue: BinaryHeap<TimerEntry>,
    next_seq: u64,
    shutdown: bool,
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    cancellation: CancelFlag,
    task: TimerTask,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // `BinaryHeap` 是最大堆，反转比较使最早截止点位于堆顶。
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl ThreadTimer {
    /// 启动一个名为 `name` 的定时器工作线程。
    ///
    /// 线程创建失败属于进程级资源耗尽，直接 panic，与 `std::thread::spawn` 的语义一致。
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        let name = name.into();
        let inner = Arc::new(TimerInner {
            name: name.clone(),
            state: Mutex::new(TimerState {
                queue: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        });
        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _exit = WorkerExit(&worker_inner);
                worker_inner.run();
            })
            .expect("failed to spawn timer worker thread");
        let worker_id = worker.thread().id();
        debug!(worker = %name, "timer worker started");
        Self {
            inner,
            worker: Mutex::new(Some(worker)),
            worker_id,
        }
    }

    /// 关闭服务：丢弃所有未执行任务，之后的 `schedule` 均返回拒绝。
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.lock_state();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.queue.clear();
        }
        self.inner.wakeup.notify_all();
        debug!(worker = %self.inner.name, "timer worker shutting down");

        if thread::current().id() == self.worker_id {
            return;
        }
        let handle = self
            .worker
            .lock()
            .expect("timer worker handle lock poisoned")
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!(worker = %self.inner.name, "timer worker terminated by panic");
        }
    }

    /// 服务是否已关闭。
    pub fn is_shutdown(&self) -> bool {
        self.inner.lock_state().shutdown
    }

    /// 尚未执行且未取消的任务数量。
    pub fn pending(&self) -> usize {
        self.inner
            .lock_state()
            .queue
            .iter()
            .filter(|entry| !entry.cancellation.is_cancelled())
            .count()
    }
}

impl TimerInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, TimerState> {
        self.state.lock().expect("timer state lock poisoned")
    }

    fn run(&self) {
        let mut state = self.lock_state();
        loop {
            if state.shutdown {
                return;
            }
            let now = Instant::now();
            let next_deadline = state.queue.peek().map(|entry| entry.deadline);
            match next_deadline {
                None => {
                    state = self.wakeup.wait(state).expect("timer state lock poisoned");
                }
                Some(deadline) if deadline > now => {
                    let (guard, _) = self
                        .wakeup
                        .wait_timeout(state, deadline - now)
                        .expect("timer state lock poisoned");
                    state = guard;
                }
                Some(_) => {
                    let Some(entry) = state.queue.pop() else {
                        continue;
                    };
                    drop(state);
                    if !entry.cancellation.is_cancelled()
                        && panic::catch_unwind(AssertUnwindSafe(entry.task)).is_err()
                    {
                        warn!(worker = %self.name, "timer task panicked; worker keeps running");
                    }
                    state = self.lock_state();
                }
            }
        }
    }
}

/// 工作线程退出时把服务标记为关闭，使之后的调度得到拒绝而不是被静默吞掉。
struct WorkerExit<'a>(&'a TimerInner);

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        let abandoned = {
            let mut state = self.0.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.shutdown = true;
            std::mem::take(&mut state.queue)
        };
        drop(abandoned);
    }
}

impl TimerService for ThreadTimer {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Result<TimerHandle, TimerRejected> {
        let Some(deadline) = Instant::now().checked_add(delay) else {
            return Err(TimerRejected::delay_out_of_range(self.inner.name.clone()));
        };
        let cancellation = CancelFlag::new();
        {
            let mut state = self.inner.lock_state();
            if state.shutdown {
                return Err(TimerRejected::shutdown(self.inner.name.clone()));
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(TimerEntry {
                deadline,
                seq,
                cancellation: cancellation.share(),
                task,
            });
        }
        self.inner.wakeup.notify_one();
        Ok(TimerHandle::new(cancellation))
    }

    fn worker_name(&self) -> Cow<'static, str> {
        self.inner.name.clone()
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadTimer")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}
