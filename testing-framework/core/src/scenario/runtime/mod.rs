pub mod context;
mod deployer;
mod runner;

pub use context::{CleanupGuard, RunContext, RunHandle, RunMetrics};
pub use deployer::{Deployer, InProcessDeployer, ScenarioError};
pub use runner::Runner;
