use cucumber::given;

use crate::world::{CyclebenchWorld, StepResult};

#[given(expr = "activity {string}")]
async fn activity(world: &mut CyclebenchWorld, spec: String) -> StepResult {
    world.add_activity(&spec)
}

#[given(expr = "run duration is {int} seconds")]
async fn run_duration(world: &mut CyclebenchWorld, seconds: u64) -> StepResult {
    world.set_run_duration(seconds)
}

#[given(expr = "expect activity {string} to complete")]
async fn expect_completed(world: &mut CyclebenchWorld, alias: String) -> StepResult {
    world.expect_completed(&alias)
}
