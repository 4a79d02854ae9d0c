use std::time::Duration;

use cyclebench_config::timeouts;
use cyclebench_core::activity::ActivityDef;

pub const ALIAS: &str = "co_cycle_delay_bursty";
pub const DRIVER: &str = "diag";
pub const CYCLES: &str = "0..1000000";
pub const THREADS: usize = 10;
pub const CYCLERATE: &str = "1000,1.5";
pub const OP: &str = r#"{"log":{"level":"info","modulo":1000},"diagrate":{"diagrate":"500"}}"#;
pub const BACKLOG_POLLS: usize = 5;
pub const RECOVERY_POLLS: usize = 10;
pub const RELIEF_DIAGRATE: &str = "10000";

/// Knobs of the bursty cycle-delay scenario. The defaults reproduce the
/// standard run: a 1000 op/s activity throttled to 500 op/s by its op, then
/// relieved to 10000 op/s so the accumulated backlog drains.
#[derive(Clone, Debug)]
pub struct CycleDelayConfig {
    pub alias: String,
    pub driver: String,
    pub cycles: String,
    pub threads: usize,
    pub cyclerate: String,
    pub op: String,
    /// Upper bound on metric polls while the backlog builds.
    pub backlog_polls: usize,
    /// Upper bound on metric polls after the op rate is relieved.
    pub recovery_polls: usize,
    pub poll_interval: Duration,
    /// `diagrate` set once the backlog phase is over.
    pub relief_diagrate: String,
    /// Waittime under which the activity counts as recovered.
    pub waittime_threshold: Duration,
}

impl Default for CycleDelayConfig {
    fn default() -> Self {
        Self {
            alias: ALIAS.to_owned(),
            driver: DRIVER.to_owned(),
            cycles: CYCLES.to_owned(),
            threads: THREADS,
            cyclerate: CYCLERATE.to_owned(),
            op: OP.to_owned(),
            backlog_polls: BACKLOG_POLLS,
            recovery_polls: RECOVERY_POLLS,
            poll_interval: timeouts::poll_interval(),
            relief_diagrate: RELIEF_DIAGRATE.to_owned(),
            waittime_threshold: timeouts::waittime_threshold(),
        }
    }
}

impl CycleDelayConfig {
    /// Fresh activity definition for one run.
    #[must_use]
    pub fn activity_def(&self) -> ActivityDef {
        ActivityDef::from_pairs([
            ("alias", self.alias.clone()),
            ("driver", self.driver.clone()),
            ("cycles", self.cycles.clone()),
            ("threads", self.threads.to_string()),
            ("cyclerate", self.cyclerate.clone()),
            ("op", self.op.clone()),
        ])
    }

    pub(super) fn poll_millis(&self) -> u64 {
        u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX)
    }

    /// Threshold in the unit the waittime gauge reports.
    pub(super) fn threshold_nanos(&self) -> f64 {
        self.waittime_threshold.as_nanos() as f64
    }

    /// A waittime sitting exactly on the threshold has not recovered yet.
    pub(super) fn is_below_threshold(&self, waittime_nanos: Option<f64>) -> bool {
        let threshold = self.threshold_nanos();
        waittime_nanos.is_some_and(|nanos| nanos < threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_descriptor_matches_the_standard_run() {
        let def = CycleDelayConfig::default().activity_def();

        assert_eq!(def.alias(), "co_cycle_delay_bursty");
        assert_eq!(def.driver(), "diag");
        assert_eq!(def.cycle_count().unwrap(), 1_000_000);
        assert_eq!(def.threads().unwrap(), 10);
        let rate = def.cyclerate().unwrap().unwrap();
        assert!((rate.ops_per_sec() - 1000.0).abs() < f64::EPSILON);
        assert!((rate.burst_ratio() - 1.5).abs() < f64::EPSILON);
        def.validate().unwrap();
    }

    #[test]
    fn recovery_requires_waittime_strictly_under_threshold() {
        let config = CycleDelayConfig::default();
        let threshold = config.threshold_nanos();

        assert!(config.is_below_threshold(Some(threshold - 1.0)));
        assert!(!config.is_below_threshold(Some(threshold)));
        assert!(!config.is_below_threshold(Some(threshold + 1.0)));
        assert!(!config.is_below_threshold(None));
    }
}
