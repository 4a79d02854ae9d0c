use std::{num::NonZeroUsize, time::Duration};

use cyclebench_core::{activity::RateSpec, scenario::Builder as CoreScenarioBuilder};

use crate::{
    expectations::ActivityCompleted,
    workloads::cycle_delay::{CycleDelayBurstyWorkload, CycleDelayConfig, RecoveryReport},
};

#[derive(Debug, thiserror::Error)]
pub enum BuilderInputError {
    #[error("{field} must be non-zero")]
    ZeroValue { field: &'static str },
    #[error("invalid rate for {field}: '{value}': {message}")]
    InvalidRate {
        field: &'static str,
        value: String,
        message: String,
    },
}

/// Extension methods for building scenarios with common patterns.
pub trait ScenarioBuilderExt: Sized {
    /// Configure the bursty cycle-delay workload.
    fn cycle_delay_bursty(self) -> CycleDelayBuilder;

    /// Configure the bursty cycle-delay workload via closure.
    fn cycle_delay_bursty_with(
        self,
        f: impl FnOnce(CycleDelayBuilder) -> CycleDelayBuilder,
    ) -> CoreScenarioBuilder;

    #[must_use]
    /// Start an activity given as `name=value;...` when the scenario deploys.
    fn activity_str(self, spec: &str) -> Self;

    #[must_use]
    /// Attach an expectation that the named activity runs to completion.
    fn expect_activity_completed(self, alias: &str) -> Self;
}

impl ScenarioBuilderExt for CoreScenarioBuilder {
    fn cycle_delay_bursty(self) -> CycleDelayBuilder {
        CycleDelayBuilder::new(self)
    }

    fn cycle_delay_bursty_with(
        self,
        f: impl FnOnce(CycleDelayBuilder) -> CycleDelayBuilder,
    ) -> CoreScenarioBuilder {
        f(self.cycle_delay_bursty()).apply()
    }

    fn activity_str(self, spec: &str) -> Self {
        self.with_activity_str(spec)
    }

    fn expect_activity_completed(self, alias: &str) -> Self {
        self.with_expectation(ActivityCompleted::new(alias))
    }
}

/// Builder for the bursty cycle-delay workload.
pub struct CycleDelayBuilder {
    builder: CoreScenarioBuilder,
    config: CycleDelayConfig,
    report: Option<RecoveryReport>,
    expect_recovery: bool,
    require_backlog: bool,
}

impl CycleDelayBuilder {
    fn new(builder: CoreScenarioBuilder) -> Self {
        Self {
            builder,
            config: CycleDelayConfig::default(),
            report: None,
            expect_recovery: true,
            require_backlog: false,
        }
    }

    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.config.alias = alias.into();
        self
    }

    #[must_use]
    /// Cycle range in `M` or `N..M` form.
    pub fn cycles(mut self, cycles: impl Into<String>) -> Self {
        self.config.cycles = cycles.into();
        self
    }

    #[must_use]
    /// Set the motor count (ignores zero).
    pub fn threads(mut self, threads: usize) -> Self {
        match NonZeroUsize::new(threads) {
            Some(threads) => self.config.threads = threads.get(),
            None => tracing::warn!(
                threads,
                "thread count must be non-zero; keeping previous setting"
            ),
        }
        self
    }

    /// Like `threads`, but returns an error for zero.
    pub fn try_threads(mut self, threads: usize) -> Result<Self, BuilderInputError> {
        let Some(threads) = NonZeroUsize::new(threads) else {
            return Err(BuilderInputError::ZeroValue { field: "threads" });
        };
        self.config.threads = threads.get();
        Ok(self)
    }

    #[must_use]
    /// Set the cycle rate as `ops[,burst]` (keeps the previous rate if
    /// malformed).
    pub fn cyclerate(self, rate: &str) -> Self {
        match rate.parse::<RateSpec>() {
            Ok(_) => self.with_cyclerate_unchecked(rate),
            Err(err) => {
                tracing::warn!(rate, error = %err, "invalid cyclerate; keeping previous rate");
                self
            }
        }
    }

    /// Like `cyclerate`, but returns an error instead of ignoring bad input.
    pub fn try_cyclerate(self, rate: &str) -> Result<Self, BuilderInputError> {
        rate.parse::<RateSpec>()
            .map_err(|err| BuilderInputError::InvalidRate {
                field: "cyclerate",
                value: rate.to_owned(),
                message: err.to_string(),
            })?;
        Ok(self.with_cyclerate_unchecked(rate))
    }

    fn with_cyclerate_unchecked(mut self, rate: &str) -> Self {
        self.config.cyclerate = rate.to_owned();
        self
    }

    #[must_use]
    /// Replace the diag op template.
    pub fn op(mut self, op: impl Into<String>) -> Self {
        self.config.op = op.into();
        self
    }

    #[must_use]
    pub const fn backlog_polls(mut self, polls: usize) -> Self {
        self.config.backlog_polls = polls;
        self
    }

    #[must_use]
    pub const fn recovery_polls(mut self, polls: usize) -> Self {
        self.config.recovery_polls = polls;
        self
    }

    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    #[must_use]
    /// `diagrate` applied once the backlog phase ends.
    pub fn relief_diagrate(mut self, rate: impl Into<String>) -> Self {
        self.config.relief_diagrate = rate.into();
        self
    }

    #[must_use]
    pub const fn waittime_threshold(mut self, threshold: Duration) -> Self {
        self.config.waittime_threshold = threshold;
        self
    }

    #[must_use]
    /// Share the run's report with the caller.
    pub fn report(mut self, report: RecoveryReport) -> Self {
        self.report = Some(report);
        self
    }

    #[must_use]
    /// Attach (the default) or skip the waittime recovery expectation.
    pub const fn expect_waittime_recovery(mut self, enabled: bool) -> Self {
        self.expect_recovery = enabled;
        self
    }

    #[must_use]
    /// Fail the recovery expectation when no backlog was ever observed.
    pub const fn require_backlog(mut self, required: bool) -> Self {
        self.require_backlog = required;
        self
    }

    #[must_use]
    /// Attach the workload to the scenario.
    pub fn apply(self) -> CoreScenarioBuilder {
        tracing::info!(
            alias = %self.config.alias,
            threads = self.config.threads,
            cyclerate = %self.config.cyclerate,
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "attaching cycle delay workload"
        );

        let mut workload = CycleDelayBurstyWorkload::new(self.config)
            .with_recovery_expectation(self.expect_recovery)
            .with_backlog_required(self.require_backlog);
        if let Some(report) = self.report {
            workload = workload.with_report(report);
        }
        self.builder.with_workload(workload)
    }
}
