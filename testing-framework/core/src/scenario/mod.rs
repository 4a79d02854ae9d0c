//! Scenario definition, activity control and the runner that drives
//! workloads against running activities.

mod control;
mod definition;
mod expectation;
pub mod runtime;
mod workload;

pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub use control::{ActivitySummary, ScenarioController};
pub use definition::{Builder, Scenario, ScenarioBuildError, ScenarioBuilder};
pub use expectation::Expectation;
pub use runtime::{
    CleanupGuard, Deployer, InProcessDeployer, RunContext, RunHandle, RunMetrics, Runner,
    ScenarioError,
};
pub use workload::Workload;
