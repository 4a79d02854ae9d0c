mod config;
mod expectation;
mod report;
mod workload;

pub use config::{
    ALIAS, BACKLOG_POLLS, CYCLERATE, CYCLES, CycleDelayConfig, DRIVER, OP, RECOVERY_POLLS,
    RELIEF_DIAGRATE, THREADS,
};
pub use expectation::WaittimeRecovery;
pub use report::{RecoveryReport, ReportState, WaittimeSample};
pub use workload::CycleDelayBurstyWorkload;
