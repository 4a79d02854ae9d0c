use std::{collections::BTreeSet, sync::Arc, time::Duration};

use cyclebench_config::ActivityFile;
use thiserror::Error;
use tracing::{debug, info};

use super::{DynError, expectation::Expectation, runtime::context::RunMetrics, workload::Workload};
use crate::{
    activity::{ActivityDef, ActivityDefError},
    drivers::DriverRegistry,
};

const DEFAULT_RUN_DURATION: Duration = Duration::from_secs(300);
const MIN_RUN_DURATION: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ScenarioBuildError {
    #[error("invalid activity '{spec}': {source}")]
    Activity {
        spec: String,
        #[source]
        source: ActivityDefError,
    },
    #[error("activity alias '{alias}' is used more than once")]
    DuplicateAlias { alias: String },
    #[error("workload '{name}' failed to initialize")]
    WorkloadInit { name: String, source: DynError },
    #[error("expectation '{name}' failed to initialize")]
    ExpectationInit { name: String, source: DynError },
}

/// Immutable scenario definition shared between the runner, workloads, and
/// expectations.
pub struct Scenario {
    activities: Vec<ActivityDef>,
    workloads: Vec<Arc<dyn Workload>>,
    expectations: Vec<Box<dyn Expectation>>,
    duration: Duration,
    drivers: DriverRegistry,
}

impl Scenario {
    /// Activities started before any workload runs.
    #[must_use]
    pub fn activities(&self) -> &[ActivityDef] {
        &self.activities
    }

    #[must_use]
    pub fn workloads(&self) -> &[Arc<dyn Workload>] {
        &self.workloads
    }

    #[must_use]
    pub fn expectations(&self) -> &[Box<dyn Expectation>] {
        &self.expectations
    }

    #[must_use]
    pub fn expectations_mut(&mut self) -> &mut [Box<dyn Expectation>] {
        &mut self.expectations
    }

    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub const fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }
}

/// Builder used by callers to describe the desired scenario.
#[derive(Default)]
pub struct Builder {
    activities: Vec<ActivityDef>,
    activity_specs: Vec<String>,
    workloads: Vec<Box<dyn Workload>>,
    expectations: Vec<Box<dyn Expectation>>,
    duration: Duration,
    drivers: Option<DriverRegistry>,
}

pub type ScenarioBuilder = Builder;

impl Builder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a builder from an activity file, including its run duration.
    #[must_use]
    pub fn from_activity_file(file: &ActivityFile) -> Self {
        let mut builder = Self::new();
        for descriptor in &file.activities {
            builder = builder.with_activity(ActivityDef::from_pairs(descriptor.clone()));
        }
        if let Some(secs) = file.scenario.duration_secs {
            builder = builder.with_run_duration(Duration::from_secs(secs));
        }
        builder
    }

    #[must_use]
    /// Add an activity started when the scenario is deployed.
    pub fn with_activity(mut self, def: ActivityDef) -> Self {
        self.activities.push(def);
        self
    }

    #[must_use]
    /// Add an activity in `name=value;...` form; parsed by `build`.
    pub fn with_activity_str(mut self, spec: impl Into<String>) -> Self {
        self.activity_specs.push(spec.into());
        self
    }

    #[must_use]
    pub fn with_workload<W>(mut self, workload: W) -> Self
    where
        W: Workload + 'static,
    {
        self.expectations.extend(workload.expectations());
        self.workloads.push(Box::new(workload));
        self
    }

    #[must_use]
    /// Add a standalone expectation not tied to a workload.
    pub fn with_expectation<E>(mut self, expectation: E) -> Self
    where
        E: Expectation + 'static,
    {
        self.expectations.push(Box::new(expectation));
        self
    }

    #[must_use]
    /// Configure the longest the workloads may run.
    pub const fn with_run_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    #[must_use]
    /// Replace the drivers available to the scenario's activities.
    pub fn with_drivers(mut self, drivers: DriverRegistry) -> Self {
        self.drivers = Some(drivers);
        self
    }

    /// Finalize the scenario, validating activities and initializing
    /// components.
    pub fn build(self) -> Result<Scenario, ScenarioBuildError> {
        let Self {
            mut activities,
            activity_specs,
            mut workloads,
            mut expectations,
            duration,
            drivers,
        } = self;

        for spec in activity_specs {
            let def = ActivityDef::parse(&spec)
                .map_err(|source| ScenarioBuildError::Activity { spec, source })?;
            activities.push(def);
        }
        validate_activities(&activities)?;

        let duration = enforce_min_duration(duration);
        let run_metrics = RunMetrics::new(duration);
        initialize_components(&activities, &run_metrics, &mut workloads, &mut expectations)?;
        let workloads: Vec<Arc<dyn Workload>> = workloads.into_iter().map(Arc::from).collect();

        info!(
            activities = activities.len(),
            duration_secs = duration.as_secs(),
            workloads = workloads.len(),
            expectations = expectations.len(),
            "scenario built"
        );

        Ok(Scenario {
            activities,
            workloads,
            expectations,
            duration,
            drivers: drivers.unwrap_or_default(),
        })
    }
}

fn validate_activities(activities: &[ActivityDef]) -> Result<(), ScenarioBuildError> {
    let mut aliases = BTreeSet::new();
    for (index, def) in activities.iter().enumerate() {
        def.assign_default_alias(index);
        def.validate().map_err(|source| ScenarioBuildError::Activity {
            spec: def.params().to_string(),
            source,
        })?;
        let alias = def.alias();
        if !aliases.insert(alias.clone()) {
            return Err(ScenarioBuildError::DuplicateAlias { alias });
        }
    }
    Ok(())
}

fn initialize_components(
    activities: &[ActivityDef],
    run_metrics: &RunMetrics,
    workloads: &mut [Box<dyn Workload>],
    expectations: &mut [Box<dyn Expectation>],
) -> Result<(), ScenarioBuildError> {
    initialize_workloads(activities, run_metrics, workloads)?;
    initialize_expectations(activities, run_metrics, expectations)?;
    Ok(())
}

fn initialize_workloads(
    activities: &[ActivityDef],
    run_metrics: &RunMetrics,
    workloads: &mut [Box<dyn Workload>],
) -> Result<(), ScenarioBuildError> {
    for workload in workloads {
        debug!(workload = workload.name(), "initializing workload");
        workload.init(activities, run_metrics).map_err(|source| {
            ScenarioBuildError::WorkloadInit {
                name: workload.name().to_owned(),
                source,
            }
        })?;
    }
    Ok(())
}

fn initialize_expectations(
    activities: &[ActivityDef],
    run_metrics: &RunMetrics,
    expectations: &mut [Box<dyn Expectation>],
) -> Result<(), ScenarioBuildError> {
    for expectation in expectations {
        debug!(expectation = expectation.name(), "initializing expectation");
        expectation
            .init(activities, run_metrics)
            .map_err(|source| ScenarioBuildError::ExpectationInit {
                name: expectation.name().to_owned(),
                source,
            })?;
    }
    Ok(())
}

fn enforce_min_duration(requested: Duration) -> Duration {
    if requested.is_zero() {
        return DEFAULT_RUN_DURATION;
    }
    requested.max(MIN_RUN_DURATION)
}
