use async_trait::async_trait;
use cyclebench_core::{
    activity::ActivityDef,
    scenario::{DynError, Expectation, RunContext, RunMetrics, ScenarioController, Workload},
};
use tracing::{debug, warn};

use super::{
    config::CycleDelayConfig,
    expectation::WaittimeRecovery,
    report::{RecoveryReport, WaittimeSample, format_metric},
};

const ABORT_MESSAGE: &str = "scenario exited prematurely, aborting.";

/// Starts a rate-limited activity whose op is throttled below the cycle rate,
/// watches the scheduling backlog grow, relieves the throttle, and watches
/// the backlog drain again.
#[derive(Clone, Debug)]
pub struct CycleDelayBurstyWorkload {
    config: CycleDelayConfig,
    report: RecoveryReport,
    expect_recovery: bool,
    require_backlog: bool,
}

impl Default for CycleDelayBurstyWorkload {
    fn default() -> Self {
        Self::new(CycleDelayConfig::default())
    }
}

impl CycleDelayBurstyWorkload {
    #[must_use]
    pub fn new(config: CycleDelayConfig) -> Self {
        Self {
            config,
            report: RecoveryReport::default(),
            expect_recovery: true,
            require_backlog: false,
        }
    }

    /// Record into `report` instead of a private one.
    #[must_use]
    pub fn with_report(mut self, report: RecoveryReport) -> Self {
        self.report = report;
        self
    }

    /// Whether the workload contributes a [`WaittimeRecovery`] expectation.
    #[must_use]
    pub const fn with_recovery_expectation(mut self, enabled: bool) -> Self {
        self.expect_recovery = enabled;
        self
    }

    /// Also require the backlog to have crossed the threshold before relief.
    #[must_use]
    pub const fn with_backlog_required(mut self, required: bool) -> Self {
        self.require_backlog = required;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &CycleDelayConfig {
        &self.config
    }

    #[must_use]
    pub fn report(&self) -> RecoveryReport {
        self.report.clone()
    }

    fn sample(&self, controller: &ScenarioController) -> WaittimeSample {
        let alias = &self.config.alias;
        let metrics = controller.metrics();
        let activity = controller.activity(alias).ok();
        WaittimeSample {
            cycles: metrics.value(&format!("{alias}.cycles.servicetime.count")),
            waittime_nanos: self.waittime(controller),
            diagrate: activity.as_ref().and_then(|a| a.param("diagrate")),
            cyclerate: activity.as_ref().and_then(|a| a.param("cyclerate")),
        }
    }

    fn waittime(&self, controller: &ScenarioController) -> Option<f64> {
        controller
            .metrics()
            .value(&format!("{}.cycles.waittime.value", self.config.alias))
    }

    fn print_sample(&self, phase: &str, sample: &WaittimeSample) {
        self.report.print(format!(
            "{phase}, cycles={} waittime={} diagrate={} cyclerate={}",
            format_metric(sample.cycles),
            format_metric(sample.waittime_nanos),
            sample.diagrate.as_deref().unwrap_or("n/a"),
            sample.cyclerate.as_deref().unwrap_or("n/a"),
        ));
    }

    fn abort(&self) {
        self.report.print(ABORT_MESSAGE.to_owned());
        self.report.update(|state| state.aborted = true);
    }

    async fn build_backlog(&self, controller: &ScenarioController) {
        for _ in 0..self.config.backlog_polls {
            controller.wait_millis(self.config.poll_millis()).await;
            if !controller.is_running_activity(&self.config.alias) {
                self.abort();
                break;
            }
            let sample = self.sample(controller);
            self.print_sample("backlogging", &sample);
            self.report.update(|state| state.backlog_samples.push(sample));
        }
    }

    async fn recover(&self, controller: &ScenarioController) {
        let threshold = self.config.threshold_nanos();
        for iteration in 0..self.config.recovery_polls {
            if !controller.is_running_activity(&self.config.alias) {
                self.abort();
                break;
            }
            let sample = self.sample(controller);
            self.print_sample("recovering", &sample);
            self.report
                .update(|state| state.recovery_samples.push(sample));

            controller.wait_millis(self.config.poll_millis()).await;
            let waittime = self.waittime(controller);
            debug!(iteration, waittime = ?waittime, threshold, "recovery poll");
            if self.config.is_below_threshold(waittime) {
                self.report.print(format!(
                    "waittime trended back down as expected, exiting on iteration {iteration}"
                ));
                self.report
                    .update(|state| state.recovered_on = Some(iteration));
                break;
            }
        }
    }
}

#[async_trait]
impl Workload for CycleDelayBurstyWorkload {
    fn name(&self) -> &'static str {
        "cycle_delay_bursty"
    }

    fn expectations(&self) -> Vec<Box<dyn Expectation>> {
        if !self.expect_recovery {
            return Vec::new();
        }
        vec![Box::new(
            WaittimeRecovery::new(self.report.clone(), self.config.waittime_threshold)
                .with_backlog_required(self.require_backlog),
        )]
    }

    fn init(&mut self, _activities: &[ActivityDef], run_metrics: &RunMetrics) -> Result<(), DynError> {
        self.config.activity_def().validate()?;
        if self.config.backlog_polls == 0 && self.config.recovery_polls == 0 {
            return Err("cycle delay workload needs at least one poll".into());
        }
        let planned = self
            .config
            .poll_interval
            .saturating_mul(
                u32::try_from(self.config.backlog_polls + self.config.recovery_polls)
                    .unwrap_or(u32::MAX),
            );
        if planned > run_metrics.run_duration() {
            warn!(
                planned_secs = planned.as_secs(),
                run_secs = run_metrics.run_duration().as_secs(),
                "run duration may end the workload before all polls"
            );
        }
        Ok(())
    }

    async fn start(&self, ctx: &RunContext) -> Result<(), DynError> {
        let controller = ctx.controller();
        let alias = &self.config.alias;

        self.report.print(format!("starting activity {alias}"));
        controller.start(self.config.activity_def())?;

        self.build_backlog(controller).await;

        let step1 = self.waittime(controller);
        self.report
            .print(format!("step1 metrics.waittime={}", format_metric(step1)));
        self.report.update(|state| state.step1_waittime = step1);

        controller
            .activity(alias)?
            .set_param("diagrate", self.config.relief_diagrate.clone())?;

        self.recover(controller).await;

        let step2 = self.waittime(controller);
        self.report
            .print(format!("step2 metrics.waittime={}", format_metric(step2)));
        self.report.update(|state| state.step2_waittime = step2);

        controller.stop(alias).await?;
        self.report.print(format!("stopped activity {alias}"));
        Ok(())
    }
}
