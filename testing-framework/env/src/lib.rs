use std::{env, path::PathBuf};

#[must_use]
pub fn slow_test_env() -> bool {
    env::var("SLOW_TEST_ENV").is_ok_and(|s| s == "true")
}

#[must_use]
pub fn rust_log() -> Option<String> {
    env::var("RUST_LOG").ok()
}

#[must_use]
pub fn cyclebench_log_level() -> Option<String> {
    env::var("CYCLEBENCH_LOG_LEVEL").ok()
}

#[must_use]
pub fn cyclebench_log_filter() -> Option<String> {
    env::var("CYCLEBENCH_LOG_FILTER").ok()
}

#[must_use]
pub fn cyclebench_poll_interval_ms() -> Option<u64> {
    env::var("CYCLEBENCH_POLL_INTERVAL_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
}

#[must_use]
pub fn cyclebench_waittime_threshold_ns() -> Option<u64> {
    env::var("CYCLEBENCH_WAITTIME_THRESHOLD_NS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
}

#[must_use]
pub fn cyclebench_stop_grace_secs() -> Option<u64> {
    env::var("CYCLEBENCH_STOP_GRACE_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
}

#[must_use]
pub fn cyclebench_activity_file() -> Option<PathBuf> {
    env::var("CYCLEBENCH_ACTIVITY_FILE").ok().map(PathBuf::from)
}
