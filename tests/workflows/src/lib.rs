//! Shared helpers for the end-to-end scenario tests.

use cyclebench_core::scenario::{Deployer as _, InProcessDeployer, RunHandle, Scenario, ScenarioError};
pub use cyclebench_workflows::{CycleDelayBuilder, RecoveryReport, ScenarioBuilderExt};

/// Deploys `scenario` in-process and runs it to the end.
pub async fn run_in_process(scenario: &mut Scenario) -> Result<RunHandle, ScenarioError> {
    let runner = InProcessDeployer::new().deploy(scenario).await?;
    runner.run(scenario).await
}
