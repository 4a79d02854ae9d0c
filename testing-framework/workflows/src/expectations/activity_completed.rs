use async_trait::async_trait;
use cyclebench_core::{
    activity::RunState,
    scenario::{DynError, Expectation, RunContext},
};
use thiserror::Error;

#[derive(Debug, Error)]
enum ActivityCompletedError {
    #[error("activity '{alias}' ended as {state}")]
    NotFinished { alias: String, state: RunState },
    #[error("activity '{alias}' ended as {state}: {failure}")]
    Failed {
        alias: String,
        state: RunState,
        failure: String,
    },
}

/// Checks that a finite activity ran its whole cycle range.
#[derive(Clone, Debug)]
pub struct ActivityCompleted {
    alias: String,
    min_cycles: Option<u64>,
}

impl ActivityCompleted {
    #[must_use]
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            min_cycles: None,
        }
    }

    /// Also require at least `cycles` completed cycles.
    #[must_use]
    pub const fn with_min_cycles(mut self, cycles: u64) -> Self {
        self.min_cycles = Some(cycles);
        self
    }
}

#[async_trait]
impl Expectation for ActivityCompleted {
    fn name(&self) -> &'static str {
        "activity_completed"
    }

    async fn evaluate(&mut self, ctx: &RunContext) -> Result<(), DynError> {
        let handle = ctx.controller().activity(&self.alias)?;
        let state = handle.state();

        if state != RunState::Finished {
            let alias = self.alias.clone();
            return Err(match handle.failure() {
                Some(failure) => ActivityCompletedError::Failed {
                    alias,
                    state,
                    failure,
                },
                None => ActivityCompletedError::NotFinished { alias, state },
            }
            .into());
        }

        let completed = handle.completed_cycles();
        if let Some(min) = self.min_cycles {
            if completed < min {
                return Err(format!(
                    "activity '{}' completed {completed} cycles, expected at least {min}",
                    self.alias
                )
                .into());
            }
        }
        tracing::info!(alias = %self.alias, completed, "activity completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cyclebench_core::scenario::ScenarioController;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn accepts_finished_and_rejects_errored() {
        let controller = ScenarioController::default();
        controller
            .start_str("alias=ok;driver=diag;cycles=30;op=noop")
            .unwrap();
        controller
            .start_str(r#"alias=bad;driver=diag;cycles=30;op={"erroroncycle":"3"}"#)
            .unwrap();
        assert!(controller.await_all(Duration::from_secs(5)).await);

        let ctx = RunContext::new(controller, Duration::from_secs(5));
        ActivityCompleted::new("ok")
            .with_min_cycles(30)
            .evaluate(&ctx)
            .await
            .unwrap();

        let err = ActivityCompleted::new("bad").evaluate(&ctx).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "activity 'bad' ended as errored: injected error on cycle 3"
        );
        assert!(ActivityCompleted::new("missing").evaluate(&ctx).await.is_err());
    }
}
