pub mod builder;
pub mod expectations;
pub mod workloads;

pub use builder::{BuilderInputError, CycleDelayBuilder, ScenarioBuilderExt};
pub use expectations::ActivityCompleted;
pub use workloads::cycle_delay::{
    CycleDelayBurstyWorkload, CycleDelayConfig, RecoveryReport, WaittimeRecovery,
};
