/// Validate that the scheduler follows the test plan, and that metrics reflect every
/// completed iteration.
use serial_test::serial;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

mod common;

use skein::prelude::*;
use skein::test_plan::TestPlanStepAction;

// Confirm the active population never exceeded the target of the running stage.
fn validate_history(report: &RunReport) {
    for step in &report.history {
        if step.stage.is_some() {
            assert!(
                step.users <= step.target,
                "{} users with a target of {}",
                step.users,
                step.target
            );
        }
    }
    let last = report.history.last().expect("history is empty");
    assert_eq!(last.action, TestPlanStepAction::Finished);
    assert_eq!(last.users, 0);
}

#[test]
#[serial]
/// Ramp up, quiesce, then ramp up again, against a transport that always succeeds.
fn three_stage_schedule() {
    let transport = common::FixedLatency::new(Duration::from_millis(50));
    let state = transport.state.clone();

    let configuration = common::build_stub_configuration(vec![
        "--test-plan",
        "10,2s;0,1s;5,2s",
        "--pacing",
        "100ms",
        "--threshold",
        "http_req_duration:p(95)<500",
        "--threshold",
        "http_req_duration:avg<100",
        "--threshold",
        "errors:rate<0.1",
    ]);
    let report = common::run_load_test(
        common::build_load_test(configuration).set_transport(transport),
    );

    assert!(report.total_requests > 0);
    assert_eq!(report.total_requests as usize, report.iterations);
    assert_eq!(
        report.total_requests as usize,
        state.requests.load(Ordering::SeqCst)
    );
    assert_eq!(report.error_rate, 0.0);
    assert!(report.errors.is_empty());
    assert!(report.failures.values().all(|count| *count == 0));

    // The stub reports its latency exactly.
    assert_eq!(report.latency.avg, 50.0);
    assert_eq!(report.latency.p95, 50.0);
    assert!(report.query_latency.avg >= 50.0);

    assert_eq!(report.thresholds.len(), 3);
    assert!(report.passed);
    assert_eq!(report.aborted_users, 0);

    // Never more requests in flight than the largest target.
    assert!(state.max_in_flight.load(Ordering::SeqCst) <= 10);

    validate_history(&report);
    let increasing: Vec<_> = report
        .history
        .iter()
        .filter(|step| step.action == TestPlanStepAction::Increasing)
        .collect();
    assert_eq!(increasing.len(), 2);
    assert_eq!((increasing[0].stage, increasing[0].users), (Some(0), 10));
    assert_eq!((increasing[1].stage, increasing[1].users), (Some(2), 5));
    assert!(report.history.iter().any(|step| {
        step.action == TestPlanStepAction::Decreasing && step.stage == Some(1) && step.users == 0
    }));
}

#[test]
#[serial]
/// Every other request fails, so the error rate is one half.
fn alternating_failures() {
    let transport = common::Alternating::default();

    let configuration = common::build_stub_configuration(vec![
        "--test-plan",
        "5,2s",
        "--pacing",
        "10ms",
        "--threshold",
        "errors:rate<0.1",
    ]);
    let report = common::run_load_test(
        common::build_load_test(configuration).set_transport(transport),
    );

    assert!(report.total_requests >= 100);
    assert!((report.error_rate - 0.5).abs() < 0.01);
    let failed = report.failures.get(&FailureKind::Status).copied().unwrap_or(0);
    assert_eq!(failed, report.total_requests / 2);
    assert_eq!(
        report.errors.get("500 Internal Server Error").copied(),
        Some(failed as usize)
    );

    assert_eq!(report.thresholds[0].verdict, ThresholdVerdict::Fail);
    assert!(!report.passed);
}

#[test]
#[serial]
/// Users are launched at most --ramp-step per tick, but retired all at once when the
/// target drops.
fn ramp_step() {
    let transport = common::FixedLatency::new(Duration::from_millis(10));

    let configuration = common::build_stub_configuration(vec![
        "--test-plan",
        "10,2s;0,1s",
        "--ramp-step",
        "2",
        "--tick",
        "100ms",
    ]);
    let report = common::run_load_test(
        common::build_load_test(configuration).set_transport(transport),
    );

    // Never more users than the target, even while the target drops.
    validate_history(&report);
    let mut previous = 0;
    for step in report.history.iter().filter(|step| step.stage.is_some()) {
        if step.users > previous {
            assert!(step.users - previous <= 2);
        }
        previous = step.users;
    }

    // Five ticks to reach 10 users.
    let increasing = report
        .history
        .iter()
        .filter(|step| step.action == TestPlanStepAction::Increasing)
        .count();
    assert_eq!(increasing, 5);
    assert!(report
        .history
        .iter()
        .any(|step| step.stage == Some(0) && step.users == 10));

    // A single tick retires all 10 users.
    let decreasing: Vec<_> = report
        .history
        .iter()
        .filter(|step| step.action == TestPlanStepAction::Decreasing)
        .collect();
    assert_eq!(decreasing.len(), 1);
    assert_eq!((decreasing[0].stage, decreasing[0].users), (Some(1), 0));
}

#[test]
#[serial]
/// A canceled load test stops early and still reports what was recorded.
fn cancel_handle() {
    let transport = common::FixedLatency::new(Duration::from_millis(10));

    let configuration = common::build_stub_configuration(vec!["--test-plan", "5,30s"]);
    let skein_attack = common::build_load_test(configuration).set_transport(transport);
    let cancel = skein_attack.cancel_handle();

    let canceler = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(500));
        cancel.cancel();
    });

    let started = Instant::now();
    let report = common::run_load_test(skein_attack);
    canceler.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(report.total_requests > 0);
    assert_eq!(report.total_requests as usize, report.iterations);
    assert!(report
        .history
        .iter()
        .any(|step| step.action == TestPlanStepAction::Canceling));
    validate_history(&report);
}

#[test]
#[serial]
/// Users still running when the drain timeout expires are aborted, and their in-flight
/// requests are discarded.
fn drain_timeout() {
    let transport = common::FixedLatency::new(Duration::from_secs(3));
    let state = transport.state.clone();

    let configuration = common::build_stub_configuration(vec![
        "--test-plan",
        "2,500ms",
        "--drain-timeout",
        "200ms",
    ]);
    let started = Instant::now();
    let report = common::run_load_test(
        common::build_load_test(configuration).set_transport(transport),
    );

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(state.requests.load(Ordering::SeqCst), 2);
    assert_eq!(report.aborted_users, 2);
    assert_eq!(report.total_requests, 0);
    assert_eq!(report.iterations, 0);
}

#[test]
#[serial]
/// A quiescent stage runs no users and sends no requests.
fn zero_target() {
    let transport = common::FixedLatency::new(Duration::from_millis(10));
    let state = transport.state.clone();

    let configuration = common::build_stub_configuration(vec!["--test-plan", "0,500ms"]);
    let report = common::run_load_test(
        common::build_load_test(configuration).set_transport(transport),
    );

    assert_eq!(state.requests.load(Ordering::SeqCst), 0);
    assert_eq!(report.total_requests, 0);
    assert_eq!(report.latency.count, 0);
    validate_history(&report);
}
