//! 缓冲算子的端到端时序场景。
//!
//! 所有场景都在 [`VirtualTimer`] 上推进时间，因此断言中的毫秒值是精确的触发时刻。

use std::sync::Arc;
use std::time::Duration;

use spark_flow_buffer::{BufferTimeoutConfig, BufferTimeoutStage, TerminalState, buffer_timeout};
use spark_flow_core::test_stubs::{ManualSubscription, RecordingDiscard, RecordingSubscriber};
use spark_flow_core::{ErrorCategory, FlowError, Subscriber, UNBOUNDED, VirtualTimer, codes};
use tracing_test::traced_test;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

struct Fixture {
    timer: VirtualTimer,
    downstream: Arc<RecordingSubscriber<Vec<u32>>>,
    upstream: Arc<ManualSubscription>,
    discard: Arc<RecordingDiscard<u32>>,
    stage: Arc<BufferTimeoutStage<u32>>,
}

fn subscribed(max_size: usize, time_span: Duration, initial_request: u64) -> Fixture {
    let timer = VirtualTimer::new();
    let downstream = RecordingSubscriber::with_initial_request(initial_request);
    let upstream = ManualSubscription::new();
    let discard = RecordingDiscard::new();
    let stage = BufferTimeoutStage::<u32>::with_discard(
        BufferTimeoutConfig::new(max_size, time_span),
        downstream.clone(),
        Arc::new(timer.clone()),
        discard.clone(),
    )
    .expect("合法配置");
    stage.on_subscribe(upstream.clone());
    Fixture {
        timer,
        downstream,
        upstream,
        discard,
        stage,
    }
}

#[test]
fn size_trigger_then_time_trigger() {
    // 元素每 300ms 到达一个，bufferTimeout(5, 2000ms)：
    // 第一批在 1500ms 因大小触发，第二批在 3500ms 因时间触发。
    let f = subscribed(5, ms(2000), UNBOUNDED);

    for item in 1..=5 {
        f.timer.advance(ms(300));
        f.stage.on_next(item);
    }
    assert_eq!(f.timer.now(), ms(1500));
    assert_eq!(f.downstream.items(), vec![vec![1, 2, 3, 4, 5]]);

    f.timer.advance(ms(300));
    f.stage.on_next(6);

    f.timer.advance_to(ms(3499));
    assert_eq!(f.downstream.next_count(), 1, "时间跨度从上一次交接重新计时");

    f.timer.advance_to(ms(3500));
    assert_eq!(f.downstream.items(), vec![vec![1, 2, 3, 4, 5], vec![6]]);
    assert!(f.discard.is_empty());
}

#[test]
fn lack_of_requests_fails_second_flush() {
    // bufferTimeout(5, 100ms)，元素每 300ms 到达；下游在第一个元素到达前才请求 1 个批次。
    let f = subscribed(5, ms(100), 0);

    f.timer.advance(ms(300));
    assert!(f.downstream.items().is_empty());
    f.downstream.request(1);
    f.stage.on_next(1);
    f.timer.advance(ms(100));
    assert_eq!(f.downstream.items(), vec![vec![1]]);

    f.timer.advance(ms(200));
    f.stage.on_next(2);
    f.timer.advance(ms(100));

    let error = f.downstream.error().expect("第二次刷新必须以错误终止");
    assert_eq!(error.code(), codes::INSUFFICIENT_DEMAND);
    assert_eq!(error.category(), ErrorCategory::InsufficientDemand);
    assert_eq!(error.message(), "Could not emit buffer due to lack of requests");
    assert_eq!(f.downstream.items(), vec![vec![1]]);
    assert_eq!(f.discard.items(), vec![2]);
    assert!(f.upstream.is_cancelled());
    assert_eq!(f.stage.state(), TerminalState::Errored);
    assert_eq!(f.timer.pending(), 0, "终止后不再保留定时器");
}

#[test]
fn empty_ticks_only_reschedule() {
    let f = subscribed(3, ms(100), UNBOUNDED);

    f.timer.advance(ms(1000));

    assert_eq!(f.downstream.next_count(), 0);
    assert_eq!(f.timer.pending(), 1, "空批次只重新调度一个定时器");

    f.stage.on_next(9);
    f.timer.advance(ms(100));
    assert_eq!(f.downstream.items(), vec![vec![9]]);
}

#[test]
fn completion_flushes_partial_batch_once() {
    let f = subscribed(4, ms(500), UNBOUNDED);
    f.stage.on_next(1);
    f.stage.on_next(2);

    f.stage.on_complete();
    f.stage.on_complete();

    assert_eq!(f.downstream.items(), vec![vec![1, 2]]);
    assert!(f.downstream.is_completed());
    assert_eq!(f.downstream.terminal_count(), 1);
    assert_eq!(f.timer.pending(), 0);

    f.timer.advance(ms(1000));
    assert_eq!(f.downstream.next_count(), 1);
}

#[test]
fn completion_without_demand_reports_lack_of_requests() {
    let f = subscribed(4, ms(500), 0);
    f.stage.on_next(1);

    f.stage.on_complete();

    assert!(!f.downstream.is_completed());
    assert_eq!(
        f.downstream.error().map(|error| error.code()),
        Some(codes::INSUFFICIENT_DEMAND)
    );
    assert_eq!(f.discard.items(), vec![1]);
}

#[test]
fn upstream_error_after_completion_is_dropped() {
    let f = subscribed(2, ms(100), UNBOUNDED);
    f.stage.on_complete();
    f.stage.on_error(FlowError::new(codes::UPSTREAM, "late failure"));

    assert!(f.downstream.is_completed());
    assert!(f.downstream.error().is_none());
    assert_eq!(f.stage.state(), TerminalState::Completed);
}

#[test]
fn diagnostics_follow_the_state_machine() {
    let f = subscribed(3, ms(100), 4);

    let before = f.stage.diagnostics();
    assert_eq!(before.requested_from_downstream, 4);
    assert_eq!(before.capacity, 3);
    assert_eq!(before.buffered, 0);
    assert!(before.upstream_attached);
    assert_eq!(before.run_on, "virtual-timer");

    f.stage.on_next(1);
    f.stage.on_next(2);
    assert_eq!(f.stage.diagnostics().buffered, 2);

    f.stage.on_next(3);
    let after = f.stage.diagnostics();
    assert_eq!(after.buffered, 0);
    assert_eq!(after.requested_from_downstream, 3);

    f.downstream.cancel();
    let cancelled = f.stage.diagnostics();
    assert!(cancelled.cancelled);
    assert!(!cancelled.terminated);

    let upstream = f.stage.upstream().expect("订阅后必须能取回上游句柄");
    let expected: Arc<dyn spark_flow_core::Subscription> = f.upstream.clone();
    assert!(Arc::ptr_eq(&upstream, &expected));
}

#[test]
fn terminated_flag_is_set_by_error() {
    let f = subscribed(3, ms(100), UNBOUNDED);
    f.stage.on_error(FlowError::new(codes::UPSTREAM, "boom"));

    let snapshot = f.stage.diagnostics();
    assert!(snapshot.terminated);
    assert!(!snapshot.cancelled);
    assert!(!f.upstream.is_cancelled(), "上游错误无需反向取消上游");
}

#[test]
fn duplicate_subscription_is_fatal() {
    let f = subscribed(3, ms(100), UNBOUNDED);
    let second = ManualSubscription::new();

    f.stage.on_subscribe(second.clone());

    assert!(second.is_cancelled());
    assert!(f.upstream.is_cancelled());
    let error = f.downstream.error().expect("重复订阅必须终止算子");
    assert_eq!(error.code(), codes::DUPLICATE_SUBSCRIPTION);
    assert_eq!(error.category(), ErrorCategory::ProtocolViolation);
    assert!(second.requests().is_empty());
}

#[test]
fn unbounded_policy_requests_upstream_once() {
    let f = subscribed(3, ms(100), 2);
    f.downstream.request(5);

    assert_eq!(f.upstream.requests(), vec![UNBOUNDED]);
}

#[test]
fn zero_demand_request_is_a_noop() {
    let f = subscribed(1, ms(100), 0);
    f.downstream.request(0);
    assert_eq!(f.stage.diagnostics().requested_from_downstream, 0);

    f.downstream.request(1);
    f.stage.on_next(5);
    assert_eq!(f.downstream.items(), vec![vec![5]]);
}

#[test]
fn convenience_constructor_validates_config() {
    let timer = VirtualTimer::new();
    let downstream = RecordingSubscriber::<Vec<u8>>::unbounded();

    let build = |max_size: usize, time_span: Duration| {
        buffer_timeout::<u8>(max_size, time_span, downstream.clone(), Arc::new(timer.clone()))
    };

    assert!(build(0, ms(10)).is_err());
    assert!(build(2, Duration::ZERO).is_err());
    assert!(build(2, ms(10)).is_ok());
}

#[traced_test]
#[test]
fn flushes_are_logged_with_trigger() {
    let f = subscribed(2, ms(100), UNBOUNDED);
    f.stage.on_next(1);
    f.stage.on_next(2);
    f.stage.on_next(3);
    f.timer.advance(ms(100));

    assert!(logs_contain("buffer flushed"));
    assert!(logs_contain("trigger=\"size\""));
    assert!(logs_contain("trigger=\"time\""));
}
