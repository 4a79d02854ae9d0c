use cucumber::given;

use crate::world::{CyclebenchWorld, StepResult};

#[given(expr = "the cycle delay bursty workload")]
async fn cycle_delay(world: &mut CyclebenchWorld) -> StepResult {
    world.enable_cycle_delay()
}

#[given(expr = "metrics are polled every {int} ms")]
async fn poll_interval(world: &mut CyclebenchWorld, millis: u64) -> StepResult {
    world.set_poll_interval(millis)
}

#[given(expr = "the waittime threshold is {int} ns")]
async fn threshold(world: &mut CyclebenchWorld, nanos: u64) -> StepResult {
    world.set_threshold(nanos)
}

#[given(expr = "the cycle rate is {string}")]
async fn cyclerate(world: &mut CyclebenchWorld, rate: String) -> StepResult {
    world.set_cyclerate(&rate)
}

#[given(expr = "at most {int} backlog polls and {int} recovery polls")]
async fn polls(world: &mut CyclebenchWorld, backlog: usize, recovery: usize) -> StepResult {
    world.set_polls(backlog, recovery)
}

#[given(expr = "the backlog must build up first")]
async fn require_backlog(world: &mut CyclebenchWorld) -> StepResult {
    world.require_backlog()
}
