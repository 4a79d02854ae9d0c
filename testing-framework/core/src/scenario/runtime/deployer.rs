use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use super::{
    context::{CleanupGuard, RunContext},
    runner::Runner,
};
use crate::{
    activity::{ActivityDef, ActivityError, ParameterMap},
    scenario::{DynError, Scenario, ScenarioController},
};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("workload failure: {0}")]
    Workload(#[source] DynError),
    #[error("expectation capture failed: {0}")]
    ExpectationCapture(#[source] DynError),
    #[error("expectations failed:\n{0}")]
    Expectations(#[source] DynError),
    #[error(transparent)]
    Activity(#[from] ActivityError),
    #[error("activity '{alias}' is already running")]
    AlreadyRunning { alias: String },
    #[error("no activity named '{alias}'")]
    UnknownActivity { alias: String },
    #[error("activity '{alias}' did not end within {timeout:?}")]
    AwaitTimeout { alias: String, timeout: Duration },
}

/// Prepares the environment a scenario runs in and hands back a runner.
#[async_trait]
pub trait Deployer: Send + Sync {
    type Error;

    async fn deploy(&self, scenario: &Scenario) -> Result<Runner, Self::Error>;
}

/// Runs activities as tokio tasks in the current process.
#[derive(Clone, Debug, Default)]
pub struct InProcessDeployer {
    stop_grace: Option<Duration>,
}

impl InProcessDeployer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = Some(grace);
        self
    }
}

#[async_trait]
impl Deployer for InProcessDeployer {
    type Error = ScenarioError;

    async fn deploy(&self, scenario: &Scenario) -> Result<Runner, Self::Error> {
        info!(
            activities = scenario.activities().len(),
            drivers = ?scenario.drivers().names(),
            "starting in-process deployment"
        );

        let drivers = scenario.drivers().clone();
        let controller = match self.stop_grace {
            Some(grace) => ScenarioController::with_stop_grace(drivers, grace),
            None => ScenarioController::new(drivers),
        };

        for def in scenario.activities() {
            // Each run gets its own parameters; live updates must not leak
            // back into the scenario definition.
            let fresh = ActivityDef::new(ParameterMap::from_map(def.params().snapshot()));
            if let Err(err) = controller.start(fresh) {
                controller.request_stop_all();
                return Err(err);
            }
        }

        let guard = ActivityCleanup {
            controller: controller.clone(),
        };
        let context = RunContext::new(controller, scenario.duration());
        Ok(Runner::new(context, Some(Box::new(guard))))
    }
}

struct ActivityCleanup {
    controller: ScenarioController,
}

impl CleanupGuard for ActivityCleanup {
    fn cleanup(self: Box<Self>) {
        self.controller.request_stop_all();
    }
}
