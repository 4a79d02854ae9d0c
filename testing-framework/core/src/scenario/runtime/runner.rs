use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt as _;
use tokio::{task::JoinSet, time::timeout};
use tracing::{info, warn};

use super::deployer::ScenarioError;
use crate::scenario::{
    DynError, Expectation, Scenario,
    runtime::context::{CleanupGuard, RunContext, RunHandle},
};

type WorkloadOutcome = Result<(), DynError>;

/// Represents a fully prepared environment capable of executing a scenario.
pub struct Runner {
    context: Arc<RunContext>,
    cleanup_guard: Option<Box<dyn CleanupGuard>>,
}

impl Runner {
    /// Construct a runner from the run context and optional cleanup guard.
    #[must_use]
    pub fn new(context: RunContext, cleanup_guard: Option<Box<dyn CleanupGuard>>) -> Self {
        Self {
            context: Arc::new(context),
            cleanup_guard,
        }
    }

    /// Access the underlying run context.
    #[must_use]
    pub fn context(&self) -> Arc<RunContext> {
        Arc::clone(&self.context)
    }

    pub(crate) fn cleanup(&mut self) {
        if let Some(guard) = self.cleanup_guard.take() {
            guard.cleanup();
        }
    }

    pub(crate) fn into_run_handle(mut self) -> RunHandle {
        RunHandle::from_shared(Arc::clone(&self.context), self.cleanup_guard.take())
    }

    /// Executes the scenario by driving workloads first, then stopping the
    /// activities and evaluating all expectations. On any failure it cleans
    /// up and propagates the error to the caller.
    pub async fn run(mut self, scenario: &mut Scenario) -> Result<RunHandle, ScenarioError> {
        let context = self.context();
        if let Err(error) =
            Self::prepare_expectations(scenario.expectations_mut(), context.as_ref()).await
        {
            self.cleanup();
            return Err(error);
        }

        if let Err(error) = Self::run_workloads(&context, scenario).await {
            self.cleanup();
            return Err(error);
        }

        context.controller().stop_all().await;

        if let Err(error) =
            Self::run_expectations(scenario.expectations_mut(), context.as_ref()).await
        {
            self.cleanup();
            return Err(error);
        }

        Ok(self.into_run_handle())
    }

    async fn prepare_expectations(
        expectations: &mut [Box<dyn Expectation>],
        context: &RunContext,
    ) -> Result<(), ScenarioError> {
        for expectation in expectations {
            if let Err(source) = expectation.start_capture(context).await {
                return Err(ScenarioError::ExpectationCapture(source));
            }
        }
        Ok(())
    }

    /// Spawns every workload, waits until they finish or the configured
    /// duration elapses (or a workload fails), and then aborts the remaining
    /// tasks. Without workloads the initial activities run to completion
    /// within the same duration.
    async fn run_workloads(
        context: &Arc<RunContext>,
        scenario: &Scenario,
    ) -> Result<(), ScenarioError> {
        if scenario.workloads().is_empty() {
            let settled = context.controller().await_all(scenario.duration()).await;
            if !settled {
                warn!(
                    duration_secs = scenario.duration().as_secs(),
                    "activities still running when the run duration elapsed"
                );
            }
            return Ok(());
        }

        let mut workloads = Self::spawn_workloads(scenario, context);
        let timed_out = Self::drive_until_timer(&mut workloads, scenario.duration()).await?;
        if timed_out {
            info!(
                duration_secs = scenario.duration().as_secs(),
                "run duration elapsed; aborting workloads"
            );
        }

        Self::drain_workloads(&mut workloads).await
    }

    /// Evaluates every registered expectation, aggregating failures so callers
    /// can see all missing conditions in a single report.
    async fn run_expectations(
        expectations: &mut [Box<dyn Expectation>],
        context: &RunContext,
    ) -> Result<(), ScenarioError> {
        let mut failures: Vec<(String, DynError)> = Vec::new();
        for expectation in expectations {
            if let Err(source) = expectation.evaluate(context).await {
                failures.push((expectation.name().to_owned(), source));
            }
        }

        if failures.is_empty() {
            return Ok(());
        }

        let summary = failures
            .into_iter()
            .map(|(name, source)| format!("{name}: {source}"))
            .collect::<Vec<_>>()
            .join("\n");

        Err(ScenarioError::Expectations(summary.into()))
    }

    /// Spawns each workload inside its own task and returns the join set for
    /// cooperative management.
    fn spawn_workloads(
        scenario: &Scenario,
        context: &Arc<RunContext>,
    ) -> JoinSet<WorkloadOutcome> {
        let mut workloads = JoinSet::new();
        for workload in scenario.workloads() {
            let workload = Arc::clone(workload);
            let ctx = Arc::clone(context);

            workloads.spawn(async move {
                let outcome = AssertUnwindSafe(async { workload.start(ctx.as_ref()).await })
                    .catch_unwind()
                    .await;

                outcome.unwrap_or_else(|panic| {
                    Err(format!("workload panicked: {}", panic_message(panic)).into())
                })
            });
        }

        workloads
    }

    /// Polls workload tasks until the timeout fires or one reports an error.
    async fn drive_until_timer(
        workloads: &mut JoinSet<WorkloadOutcome>,
        duration: Duration,
    ) -> Result<bool, ScenarioError> {
        let run_future = async {
            while let Some(result) = workloads.join_next().await {
                Self::map_join_result(result)?;
            }
            Ok::<(), ScenarioError>(())
        };

        timeout(duration, run_future)
            .await
            .map_or(Ok(true), |result| {
                result?;
                Ok(false)
            })
    }

    /// Aborts and drains any remaining workload tasks so we do not leak work
    /// across scenario runs.
    async fn drain_workloads(
        workloads: &mut JoinSet<WorkloadOutcome>,
    ) -> Result<(), ScenarioError> {
        workloads.abort_all();

        while let Some(result) = workloads.join_next().await {
            Self::map_join_result(result)?;
        }

        Ok(())
    }

    /// Converts the outcome of a workload task into the canonical scenario
    /// error, tolerating cancellation when the runner aborts unfinished tasks.
    fn map_join_result(
        result: Result<WorkloadOutcome, tokio::task::JoinError>,
    ) -> Result<(), ScenarioError> {
        match result {
            Ok(outcome) => outcome.map_err(ScenarioError::Workload),
            Err(join_err) if join_err.is_cancelled() => Ok(()),
            Err(join_err) => Err(ScenarioError::Workload(
                format!("workload task failed: {join_err}").into(),
            )),
        }
    }
}

/// Attempts to turn a panic payload into a readable string for diagnostics.
fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic.downcast::<String>().map_or_else(
        |panic| {
            panic.downcast::<&'static str>().map_or_else(
                |_| "unknown panic".to_owned(),
                |message| (*message).to_owned(),
            )
        },
        |message| *message,
    )
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        activity::RunState,
        scenario::{Builder, Deployer as _, InProcessDeployer, Workload},
    };

    struct Panicking;

    #[async_trait]
    impl Workload for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn start(&self, _ctx: &RunContext) -> Result<(), DynError> {
            panic!("boom");
        }
    }

    struct StopsActivity;

    #[async_trait]
    impl Workload for StopsActivity {
        fn name(&self) -> &str {
            "stops-activity"
        }

        async fn start(&self, ctx: &RunContext) -> Result<(), DynError> {
            ctx.controller().wait_millis(100).await;
            ctx.controller().stop("endless").await?;
            Ok(())
        }
    }

    struct Fails(&'static str);

    #[async_trait]
    impl Expectation for Fails {
        fn name(&self) -> &str {
            self.0
        }

        async fn evaluate(&mut self, _ctx: &RunContext) -> Result<(), DynError> {
            Err("not met".into())
        }
    }

    struct SawFinished(Arc<AtomicBool>);

    #[async_trait]
    impl Expectation for SawFinished {
        fn name(&self) -> &str {
            "saw-finished"
        }

        async fn evaluate(&mut self, ctx: &RunContext) -> Result<(), DynError> {
            let state = ctx.controller().activity("finite")?.state();
            self.0.store(state == RunState::Finished, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn run(builder: Builder) -> Result<RunHandle, ScenarioError> {
        let mut scenario = builder.build().unwrap();
        let runner = InProcessDeployer::new().deploy(&scenario).await?;
        runner.run(&mut scenario).await
    }

    #[tokio::test(start_paused = true)]
    async fn initial_activities_run_to_completion_without_workloads() {
        let seen = Arc::new(AtomicBool::new(false));
        let handle = run(Builder::new()
            .with_activity_str("alias=finite;driver=diag;cycles=50;cyclerate=100;op=noop")
            .with_expectation(SawFinished(Arc::clone(&seen))))
        .await
        .unwrap();

        assert!(seen.load(Ordering::SeqCst));
        assert_eq!(
            handle.context().metrics().value("finite.result.count"),
            Some(50.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn workloads_drive_activities_and_leftovers_are_stopped() {
        let handle = run(Builder::new()
            .with_activity_str("alias=endless;driver=diag;cycles=1B;threads=2;cyclerate=1000;op=noop")
            .with_activity_str("alias=other;driver=diag;cycles=1B;threads=2;cyclerate=10;op=noop")
            .with_workload(StopsActivity))
        .await
        .unwrap();

        let controller = handle.context().controller();
        assert_eq!(controller.activity("endless").unwrap().state(), RunState::Stopped);
        assert!(!controller.is_running_activity("other"));
    }

    #[tokio::test(start_paused = true)]
    async fn aggregates_expectation_failures() {
        let err = run(Builder::new()
            .with_run_duration(Duration::from_secs(1))
            .with_expectation(Fails("first"))
            .with_expectation(Fails("second")))
        .await
        .err()
        .unwrap();

        let ScenarioError::Expectations(summary) = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(summary.to_string(), "first: not met\nsecond: not met");
    }

    #[tokio::test(start_paused = true)]
    async fn workload_panics_become_errors() {
        let err = run(Builder::new().with_workload(Panicking)).await.err().unwrap();
        assert!(matches!(err, ScenarioError::Workload(ref source) if source.to_string().contains("boom")));
    }

    #[test]
    fn panic_messages_are_extracted() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(5_u8)), "unknown panic");
    }
}
