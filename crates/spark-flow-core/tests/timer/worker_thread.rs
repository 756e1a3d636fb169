use std::sync::mpsc;
use std::time::Duration;

use spark_flow_core::{ThreadTimer, TimerService};

#[test]
fn runs_task_on_named_worker() {
    let timer = ThreadTimer::new("flow-timer-test");
    let (tx, rx) = mpsc::channel();

    timer
        .schedule(
            Duration::from_millis(5),
            Box::new(move || {
                let name = std::thread::current().name().map(str::to_owned);
                tx.send(name).expect("接收端仍然存活");
            }),
        )
        .expect("运行中的定时器必须接受调度");

    let worker = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("任务必须在超时前执行");
    assert_eq!(worker.as_deref(), Some("flow-timer-test"));
    assert_eq!(timer.worker_name(), "flow-timer-test");
}

#[test]
fn cancelled_task_is_skipped() {
    let timer = ThreadTimer::new("flow-timer-cancel");
    let (tx, rx) = mpsc::channel::<&'static str>();

    let cancelled_tx = tx.clone();
    let handle = timer
        .schedule(
            Duration::from_millis(20),
            Box::new(move || {
                let _ = cancelled_tx.send("cancelled");
            }),
        )
        .unwrap();
    assert!(handle.cancel());

    timer
        .schedule(
            Duration::from_millis(60),
            Box::new(move || {
                let _ = tx.send("kept");
            }),
        )
        .unwrap();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok("kept"));
}

#[test]
fn shutdown_rejects_later_schedules() {
    let timer = ThreadTimer::new("flow-timer-shutdown");
    timer.shutdown();
    assert!(timer.is_shutdown());

    let rejection = timer
        .schedule(Duration::ZERO, Box::new(|| {}))
        .expect_err("关闭后必须拒绝调度");
    assert_eq!(rejection.worker, "flow-timer-shutdown");
    assert_eq!(timer.pending(), 0);
}

#[test]
fn unrepresentable_delay_is_rejected_without_poisoning() {
    let timer = ThreadTimer::new("flow-timer-far-future");

    let rejection = timer
        .schedule(Duration::MAX, Box::new(|| {}))
        .expect_err("超出时钟范围的延迟必须被拒绝");
    assert_eq!(rejection.worker, "flow-timer-far-future");
    assert!(!timer.is_shutdown());
    assert_eq!(timer.pending(), 0);

    let (tx, rx) = mpsc::channel();
    timer
        .schedule(
            Duration::from_millis(1),
            Box::new(move || {
                let _ = tx.send(());
            }),
        )
        .expect("被拒绝的调度不应影响后续调度");
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(()));
}

#[test]
fn panicking_task_does_not_stop_worker() {
    let timer = ThreadTimer::new("flow-timer-panic");
    let (tx, rx) = mpsc::channel::<&'static str>();

    timer
        .schedule(Duration::from_millis(1), Box::new(|| panic!("task failure")))
        .expect("运行中的定时器必须接受调度");
    timer
        .schedule(
            Duration::from_millis(20),
            Box::new(move || {
                let _ = tx.send("after panic");
            }),
        )
        .expect("运行中的定时器必须接受调度");

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok("after panic"));
    assert!(!timer.is_shutdown());
    timer.shutdown();
    assert!(timer.is_shutdown());
}
