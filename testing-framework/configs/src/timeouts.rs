use std::time::Duration;

use cyclebench_env as cb_env;

use crate::adjust_timeout;

pub const POLL_INTERVAL_MILLIS: u64 = 1_000;
pub const WAITTIME_THRESHOLD_NANOS: u64 = 50_000_000;
pub const STOP_GRACE_SECS: u64 = 5;

fn env_millis(value: Option<u64>, default: u64) -> Duration {
    Duration::from_millis(value.unwrap_or(default))
}

/// Interval between metric polls of a running scenario script.
pub fn poll_interval() -> Duration {
    env_millis(cb_env::cyclebench_poll_interval_ms(), POLL_INTERVAL_MILLIS)
}

/// Waittime below which a backlogged activity counts as recovered.
pub fn waittime_threshold() -> Duration {
    Duration::from_nanos(
        cb_env::cyclebench_waittime_threshold_ns().unwrap_or(WAITTIME_THRESHOLD_NANOS),
    )
}

/// How long a stopping activity may take to wind down its motors before they
/// are aborted. Doubled in slow test environments.
pub fn stop_grace() -> Duration {
    adjust_timeout(Duration::from_secs(
        cb_env::cyclebench_stop_grace_secs().unwrap_or(STOP_GRACE_SECS),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_millis_falls_back_to_default() {
        assert_eq!(env_millis(None, POLL_INTERVAL_MILLIS), Duration::from_secs(1));
        assert_eq!(env_millis(Some(250), POLL_INTERVAL_MILLIS), Duration::from_millis(250));
    }

    #[test]
    fn stop_grace_is_never_shorter_than_configured() {
        let configured = Duration::from_secs(
            cb_env::cyclebench_stop_grace_secs().unwrap_or(STOP_GRACE_SECS),
        );
        let grace = stop_grace();
        assert!(grace == configured || grace == configured * 2);
        assert_eq!(grace, adjust_timeout(configured));
    }
}
