use std::{collections::BTreeMap, time::Duration};

use cucumber::World;
use cyclebench_core::{
    activity::RateSpec,
    metrics::MetricsRegistry,
    scenario::{Builder, Deployer as _, InProcessDeployer, Scenario, ScenarioBuildError},
};
use cyclebench_workflows::{RecoveryReport, ScenarioBuilderExt as _};
use thiserror::Error;

#[derive(Debug, Default, Clone)]
pub struct RunOutcome {
    pub result: Option<Result<(), String>>,
    pub transcript: Vec<String>,
    /// Every metric property after the run, keyed by full path.
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Default, Clone)]
pub struct ScenarioSpec {
    pub activities: Vec<String>,
    pub duration_secs: Option<u64>,
    pub cycle_delay: Option<CycleDelaySpec>,
    pub completed: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct CycleDelaySpec {
    pub poll_ms: Option<u64>,
    pub threshold_ns: Option<u64>,
    pub cyclerate: Option<String>,
    pub backlog_polls: Option<usize>,
    pub recovery_polls: Option<usize>,
    pub require_backlog: bool,
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("the cycle delay workload is not configured")]
    MissingCycleDelay,
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error("failed to build scenario: {source}")]
    ScenarioBuild {
        #[source]
        source: ScenarioBuildError,
    },
    #[error("{message}")]
    RunFailed { message: String },
    #[error("{message}")]
    Assertion { message: String },
}

pub type StepResult = Result<(), StepError>;

#[derive(World, Debug, Default)]
pub struct CyclebenchWorld {
    pub spec: ScenarioSpec,
    pub run: RunOutcome,
}

impl CyclebenchWorld {
    pub fn add_activity(&mut self, spec: &str) -> StepResult {
        if spec.trim().is_empty() {
            return Err(StepError::InvalidArgument {
                message: "activity spec must not be empty".to_owned(),
            });
        }
        self.spec.activities.push(spec.to_owned());
        Ok(())
    }

    pub fn set_run_duration(&mut self, seconds: u64) -> StepResult {
        self.spec.duration_secs = Some(positive_u64("duration", seconds)?);
        Ok(())
    }

    pub fn enable_cycle_delay(&mut self) -> StepResult {
        self.spec.cycle_delay.get_or_insert_with(CycleDelaySpec::default);
        Ok(())
    }

    pub fn set_poll_interval(&mut self, millis: u64) -> StepResult {
        self.cycle_delay_mut()?.poll_ms = Some(positive_u64("poll interval", millis)?);
        Ok(())
    }

    pub fn set_threshold(&mut self, nanos: u64) -> StepResult {
        self.cycle_delay_mut()?.threshold_ns = Some(positive_u64("threshold", nanos)?);
        Ok(())
    }

    pub fn set_cyclerate(&mut self, rate: &str) -> StepResult {
        parse_rate(rate)?;
        self.cycle_delay_mut()?.cyclerate = Some(rate.to_owned());
        Ok(())
    }

    pub fn set_polls(&mut self, backlog: usize, recovery: usize) -> StepResult {
        let spec = self.cycle_delay_mut()?;
        spec.backlog_polls = Some(backlog);
        spec.recovery_polls = Some(recovery);
        Ok(())
    }

    pub fn require_backlog(&mut self) -> StepResult {
        self.cycle_delay_mut()?.require_backlog = true;
        Ok(())
    }

    pub fn expect_completed(&mut self, alias: &str) -> StepResult {
        self.spec.completed.push(alias.to_owned());
        Ok(())
    }

    fn cycle_delay_mut(&mut self) -> Result<&mut CycleDelaySpec, StepError> {
        self.spec
            .cycle_delay
            .as_mut()
            .ok_or(StepError::MissingCycleDelay)
    }

    /// Builds the scenario described so far; the report collects the cycle
    /// delay transcript when that workload is configured.
    pub fn build_scenario(&self, report: &RecoveryReport) -> Result<Scenario, StepError> {
        let mut builder = Builder::new();
        if let Some(secs) = self.spec.duration_secs {
            builder = builder.with_run_duration(Duration::from_secs(secs));
        }
        for activity in &self.spec.activities {
            builder = builder.activity_str(activity);
        }

        if let Some(spec) = &self.spec.cycle_delay {
            builder = builder.cycle_delay_bursty_with(|mut flow| {
                flow = flow.report(report.clone()).require_backlog(spec.require_backlog);
                if let Some(ms) = spec.poll_ms {
                    flow = flow.poll_interval(Duration::from_millis(ms));
                }
                if let Some(ns) = spec.threshold_ns {
                    flow = flow.waittime_threshold(Duration::from_nanos(ns));
                }
                if let Some(rate) = &spec.cyclerate {
                    flow = flow.cyclerate(rate);
                }
                if let Some(polls) = spec.backlog_polls {
                    flow = flow.backlog_polls(polls);
                }
                if let Some(polls) = spec.recovery_polls {
                    flow = flow.recovery_polls(polls);
                }
                flow
            });
        }

        for alias in &self.spec.completed {
            builder = builder.expect_activity_completed(alias);
        }

        builder
            .build()
            .map_err(|source| StepError::ScenarioBuild { source })
    }

    pub async fn run_scenario(&mut self) -> StepResult {
        let report = RecoveryReport::default();
        let mut scenario = self.build_scenario(&report)?;

        let runner = InProcessDeployer::new()
            .deploy(&scenario)
            .await
            .map_err(|e| StepError::RunFailed {
                message: format!("deploy failed: {e}"),
            })?;
        let context = runner.context();
        let result = runner
            .run(&mut scenario)
            .await
            .map(drop)
            .map_err(|e| format!("scenario run failed: {e}"));

        self.run = RunOutcome {
            result: Some(result),
            transcript: report.transcript(),
            metrics: metric_values(context.metrics()),
        };
        Ok(())
    }

    pub fn metric(&self, path: &str) -> Result<f64, StepError> {
        self.run
            .metrics
            .get(path)
            .copied()
            .ok_or_else(|| StepError::Assertion {
                message: format!("no metric named '{path}'"),
            })
    }
}

fn metric_values(registry: &MetricsRegistry) -> BTreeMap<String, f64> {
    let mut values = BTreeMap::new();
    for name in registry.names() {
        let Some(metric) = registry.get(&name) else {
            continue;
        };
        for property in metric.properties() {
            if let Some(value) = metric.property(property) {
                values.insert(format!("{name}.{property}"), value);
            }
        }
    }
    values
}

pub fn parse_rate(raw: &str) -> Result<RateSpec, StepError> {
    raw.parse::<RateSpec>()
        .map_err(|err| StepError::InvalidArgument {
            message: format!("invalid rate '{raw}': {err}"),
        })
}

fn positive_u64(label: &str, value: u64) -> Result<u64, StepError> {
    if value == 0 {
        Err(StepError::InvalidArgument {
            message: format!("{label} must be > 0"),
        })
    } else {
        Ok(value)
    }
}
