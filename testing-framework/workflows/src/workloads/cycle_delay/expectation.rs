use std::time::Duration;

use async_trait::async_trait;
use cyclebench_core::scenario::{DynError, Expectation, RunContext};
use thiserror::Error;
use tracing::info;

use super::report::{RecoveryReport, format_metric};

#[derive(Debug, Error)]
enum RecoveryError {
    #[error("activity stopped running before the run completed")]
    Aborted,
    #[error("waittime never dropped below {threshold:?} (last observed {last})")]
    NotRecovered { threshold: Duration, last: String },
    #[error("backlog never built: waittime before relief was {observed}, threshold {threshold:?}")]
    NoBacklog { threshold: Duration, observed: String },
}

/// Passes when a cycle-delay run saw its waittime fall back under the
/// threshold without the activity ending early.
#[derive(Debug)]
pub struct WaittimeRecovery {
    report: RecoveryReport,
    threshold: Duration,
    require_backlog: bool,
}

impl WaittimeRecovery {
    #[must_use]
    pub const fn new(report: RecoveryReport, threshold: Duration) -> Self {
        Self {
            report,
            threshold,
            require_backlog: false,
        }
    }

    /// Additionally fail when the waittime never exceeded the threshold
    /// before relief, i.e. the run never actually fell behind.
    #[must_use]
    pub const fn with_backlog_required(mut self, required: bool) -> Self {
        self.require_backlog = required;
        self
    }
}

#[async_trait]
impl Expectation for WaittimeRecovery {
    fn name(&self) -> &'static str {
        "waittime_recovery"
    }

    async fn evaluate(&mut self, _ctx: &RunContext) -> Result<(), DynError> {
        let state = self.report.snapshot();
        let threshold_nanos = self.threshold.as_nanos() as f64;

        if state.aborted {
            return Err(RecoveryError::Aborted.into());
        }
        if self.require_backlog && !state.step1_waittime.is_some_and(|w| w >= threshold_nanos) {
            return Err(RecoveryError::NoBacklog {
                threshold: self.threshold,
                observed: format_metric(state.step1_waittime),
            }
            .into());
        }
        let Some(iteration) = state.recovered_on else {
            return Err(RecoveryError::NotRecovered {
                threshold: self.threshold,
                last: format_metric(state.step2_waittime),
            }
            .into());
        };

        info!(
            iteration,
            step1 = ?state.step1_waittime,
            step2 = ?state.step2_waittime,
            "waittime recovered"
        );
        Ok(())
    }
}
