use std::sync::{Arc, Mutex};
use std::time::Duration;

use spark_flow_core::{TimerService, VirtualTimer};

fn recorder() -> Arc<Mutex<Vec<(&'static str, Duration)>>> {
    Arc::new(Mutex::new(Vec::new()))
}

#[test]
fn tasks_run_in_deadline_order_with_fifo_ties() {
    let timer = VirtualTimer::new();
    let log = recorder();

    for (label, millis) in [("late", 300), ("first", 100), ("second", 100)] {
        let log = Arc::clone(&log);
        let clock = timer.clone();
        timer
            .schedule(
                Duration::from_millis(millis),
                Box::new(move || log.lock().unwrap().push((label, clock.now()))),
            )
            .expect("虚拟定时器未关闭时必须接受调度");
    }

    timer.advance(Duration::from_millis(250));
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            ("first", Duration::from_millis(100)),
            ("second", Duration::from_millis(100)),
        ]
    );
    assert_eq!(timer.now(), Duration::from_millis(250));
    assert_eq!(timer.pending(), 1);

    timer.advance(Duration::from_millis(50));
    assert_eq!(log.lock().unwrap().len(), 3);
}

#[test]
fn task_scheduled_by_task_runs_within_same_advance() {
    //
    // 教案级说明：缓冲算子在定时器回调里重新调度下一次定时器，
    // 一次较长的 `advance` 必须连续触发这条链上所有到期的任务。
    let timer = VirtualTimer::new();
    let log = recorder();

    let inner_log = Arc::clone(&log);
    let inner_timer = timer.clone();
    timer
        .schedule(
            Duration::from_millis(100),
            Box::new(move || {
                let log = Arc::clone(&inner_log);
                let clock = inner_timer.clone();
                inner_timer
                    .schedule(
                        Duration::from_millis(100),
                        Box::new(move || log.lock().unwrap().push(("chained", clock.now()))),
                    )
                    .expect("重入调度必须成功");
            }),
        )
        .unwrap();

    timer.advance(Duration::from_millis(250));
    assert_eq!(
        *log.lock().unwrap(),
        vec![("chained", Duration::from_millis(200))]
    );
}

#[test]
fn cancelled_task_never_runs() {
    let timer = VirtualTimer::new();
    let log = recorder();
    let task_log = Arc::clone(&log);

    let handle = timer
        .schedule(
            Duration::from_millis(10),
            Box::new(move || task_log.lock().unwrap().push(("cancelled", Duration::ZERO))),
        )
        .unwrap();
    assert!(handle.cancel());
    assert!(!handle.cancel(), "重复取消必须返回 false");

    timer.advance(Duration::from_millis(20));
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn shutdown_rejects_with_worker_name() {
    let timer = VirtualTimer::new();
    timer.shutdown();

    let rejection = timer
        .schedule(Duration::from_millis(1), Box::new(|| {}))
        .expect_err("关闭后必须拒绝调度");
    assert_eq!(rejection.worker, "virtual-timer");
    assert_eq!(timer.worker_name(), "virtual-timer");
}
