use std::time::Duration;

use cyclebench_config::logging::init_test_tracing;
use cyclebench_core::{
    adjust_timeout,
    scenario::{Builder, ScenarioError},
};
use serial_test::serial;
use tests_workflows::{RecoveryReport, ScenarioBuilderExt as _, run_in_process};

const ALIAS: &str = "co_cycle_delay_bursty";

#[tokio::test(start_paused = true)]
#[serial]
async fn waittime_builds_up_and_recovers() {
    init_test_tracing();
    let report = RecoveryReport::default();
    let mut scenario = Builder::new()
        .with_run_duration(adjust_timeout(Duration::from_secs(120)))
        .cycle_delay_bursty()
        .report(report.clone())
        .require_backlog(true)
        .apply()
        .build()
        .expect("scenario should build");

    let handle = run_in_process(&mut scenario)
        .await
        .expect("waittime should recover");

    let state = report.snapshot();
    assert!(!state.aborted);
    assert_eq!(state.backlog_samples.len(), 5);
    let recovered_on = state.recovered_on.expect("recovery iteration recorded");
    assert!(
        (2..=7).contains(&recovered_on),
        "recovered on iteration {recovered_on}"
    );

    let threshold = 50_000_000.0;
    assert!(state.step1_waittime.unwrap_or_default() > threshold);
    assert!(state.step2_waittime.unwrap_or(f64::MAX) < threshold);

    let transcript = state.transcript;
    assert_eq!(transcript.first().map(String::as_str), Some("starting activity co_cycle_delay_bursty"));
    assert_eq!(
        transcript.iter().filter(|line| line.starts_with("backlogging, cycles=")).count(),
        5
    );
    assert!(transcript.iter().any(|line| line.starts_with("step1 metrics.waittime=")));
    assert!(transcript.iter().any(|line| line.starts_with("recovering, cycles=")));
    assert!(transcript.iter().any(|line| line
        == &format!("waittime trended back down as expected, exiting on iteration {recovered_on}")));
    assert!(transcript.iter().any(|line| line.starts_with("step2 metrics.waittime=")));
    assert_eq!(transcript.last().map(String::as_str), Some("stopped activity co_cycle_delay_bursty"));

    let metrics = handle.context().metrics();
    assert!(metrics.value(&format!("{ALIAS}.cycles.servicetime.count")).unwrap_or_default() > 0.0);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn recovery_samples_show_relief_diagrate() {
    init_test_tracing();
    let report = RecoveryReport::default();
    let mut scenario = Builder::new()
        .with_run_duration(adjust_timeout(Duration::from_secs(120)))
        .cycle_delay_bursty()
        .report(report.clone())
        .apply()
        .build()
        .expect("scenario should build");

    run_in_process(&mut scenario)
        .await
        .expect("waittime should recover");

    let state = report.snapshot();
    assert!(state
        .backlog_samples
        .iter()
        .all(|sample| sample.diagrate.as_deref() == Some("500")));
    assert!(state
        .recovery_samples
        .iter()
        .all(|sample| sample.diagrate.as_deref() == Some("10000")));
    assert!(state
        .recovery_samples
        .iter()
        .all(|sample| sample.cyclerate.as_deref() == Some("1000,1.5")));
}

#[tokio::test(start_paused = true)]
#[serial]
async fn finite_activity_aborts_the_script() {
    init_test_tracing();
    let report = RecoveryReport::default();
    let mut scenario = Builder::new()
        .with_run_duration(adjust_timeout(Duration::from_secs(60)))
        .cycle_delay_bursty()
        .cycles("0..200")
        .report(report.clone())
        .apply()
        .build()
        .expect("scenario should build");

    let err = run_in_process(&mut scenario)
        .await
        .expect_err("an activity that ends early cannot recover");
    assert!(matches!(err, ScenarioError::Expectations(_)), "{err}");

    let state = report.snapshot();
    assert!(state.aborted);
    assert!(state.recovered_on.is_none());
    assert!(
        state
            .transcript
            .iter()
            .any(|line| line.contains("exited prematurely")),
        "{:?}",
        state.transcript
    );
}

#[tokio::test(start_paused = true)]
#[serial]
async fn unreachable_threshold_fails_recovery() {
    init_test_tracing();
    let report = RecoveryReport::default();
    let mut scenario = Builder::new()
        .with_run_duration(adjust_timeout(Duration::from_secs(120)))
        .cycle_delay_bursty()
        .report(report.clone())
        .recovery_polls(2)
        .waittime_threshold(Duration::from_nanos(1))
        .apply()
        .build()
        .expect("scenario should build");

    let err = run_in_process(&mut scenario)
        .await
        .expect_err("waittime never drops under 1ns");
    assert!(matches!(err, ScenarioError::Expectations(_)), "{err}");

    let state = report.snapshot();
    assert!(!state.aborted);
    assert!(state.recovered_on.is_none());
    assert_eq!(state.recovery_samples.len(), 2);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn activity_ending_during_recovery_aborts_the_script() {
    init_test_tracing();
    let report = RecoveryReport::default();
    // Outlives the backlog phase at 500 ops/s, then drains within the first
    // recovery poll once the diag limiter is relieved.
    let mut scenario = Builder::new()
        .with_run_duration(adjust_timeout(Duration::from_secs(120)))
        .cycle_delay_bursty()
        .cycles("0..3000")
        .report(report.clone())
        .apply()
        .build()
        .expect("scenario should build");

    let err = run_in_process(&mut scenario)
        .await
        .expect_err("an activity that ends while recovering cannot recover");
    assert!(matches!(err, ScenarioError::Expectations(_)), "{err}");

    let state = report.snapshot();
    assert!(state.aborted);
    assert!(state.recovered_on.is_none());
    assert_eq!(state.backlog_samples.len(), 5);
    assert!(
        !state.recovery_samples.is_empty() && state.recovery_samples.len() < 10,
        "{} recovery samples",
        state.recovery_samples.len()
    );

    let transcript = state.transcript;
    let step1 = transcript
        .iter()
        .position(|line| line.starts_with("step1 metrics.waittime="))
        .expect("step1 line printed");
    let aborted_at = transcript
        .iter()
        .position(|line| line.contains("exited prematurely"))
        .expect("abort line printed");
    assert!(step1 < aborted_at, "{transcript:?}");
    assert_eq!(
        transcript.iter().filter(|line| line.contains("exited prematurely")).count(),
        1
    );
}
