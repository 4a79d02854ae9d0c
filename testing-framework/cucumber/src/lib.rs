mod steps;
mod world;

pub use world::{
    CycleDelaySpec, RunOutcome, ScenarioSpec, StepError, StepResult, CyclebenchWorld,
    parse_rate,
};
