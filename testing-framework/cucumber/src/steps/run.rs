use cucumber::{then, when};

use crate::world::{CyclebenchWorld, StepError, StepResult};

#[when(expr = "run scenario")]
async fn run_scenario(world: &mut CyclebenchWorld) -> StepResult {
    world.run_scenario().await
}

#[then(expr = "scenario should succeed")]
async fn scenario_should_succeed(world: &mut CyclebenchWorld) -> StepResult {
    match world.run.result.take() {
        Some(Ok(())) => Ok(()),
        Some(Err(message)) => Err(StepError::RunFailed { message }),
        None => Err(StepError::RunFailed {
            message: "scenario was not run".to_owned(),
        }),
    }
}

#[then(expr = "scenario should fail")]
async fn scenario_should_fail(world: &mut CyclebenchWorld) -> StepResult {
    match world.run.result.take() {
        Some(Err(_)) => Ok(()),
        Some(Ok(())) => Err(StepError::Assertion {
            message: "scenario succeeded unexpectedly".to_owned(),
        }),
        None => Err(StepError::RunFailed {
            message: "scenario was not run".to_owned(),
        }),
    }
}

#[then(expr = "the transcript contains {string}")]
async fn transcript_contains(world: &mut CyclebenchWorld, needle: String) -> StepResult {
    if world.run.transcript.iter().any(|line| line.contains(&needle)) {
        return Ok(());
    }
    Err(StepError::Assertion {
        message: format!(
            "no transcript line contains '{needle}':\n{}",
            world.run.transcript.join("\n")
        ),
    })
}

#[then(expr = "metric {string} is at least {float}")]
async fn metric_at_least(world: &mut CyclebenchWorld, path: String, min: f64) -> StepResult {
    let value = world.metric(&path)?;
    if value >= min {
        return Ok(());
    }
    Err(StepError::Assertion {
        message: format!("metric '{path}' is {value}, expected at least {min}"),
    })
}
