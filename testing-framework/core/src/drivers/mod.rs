pub mod diag;
pub mod stdout;

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::activity::def::ActivityDef;

pub use diag::DiagDriver;
pub use stdout::StdoutDriver;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver '{name}' does not exist in this runtime (known: {known})")]
    UnknownDriver { name: String, known: String },
    #[error("unknown {driver} op task '{task}'")]
    UnknownTask { driver: &'static str, task: String },
    #[error("invalid op template '{op}': {message}")]
    InvalidOp { op: String, message: String },
    #[error("invalid value '{value}' for {task}.{field}")]
    InvalidSetting {
        task: String,
        field: &'static str,
        value: String,
    },
}

/// Failure of a single cycle's operation.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("injected error on cycle {cycle}")]
    Injected { cycle: u64 },
    #[error("op failed on cycle {cycle}: {message}")]
    Failed { cycle: u64, message: String },
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl OpError {
    /// Stable name used for per-error metrics and error policies.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Injected { .. } => "Injected",
            Self::Failed { .. } => "Failed",
            Self::Io(_) => "Io",
        }
    }
}

/// Executes the operation mapped for an activity, once per cycle.
#[async_trait]
pub trait OpDispenser: Send + Sync {
    async fn run_cycle(&self, cycle: u64) -> Result<(), OpError>;
}

/// Per-activity driver instance: maps op templates to dispensers and reacts
/// to live parameter changes.
pub trait DriverAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn op_dispenser(&self, def: &ActivityDef) -> Result<Arc<dyn OpDispenser>, DriverError>;

    fn on_activity_def_update(&self, _def: &ActivityDef) -> Result<(), DriverError> {
        Ok(())
    }
}

pub type DriverFactory = Arc<dyn Fn() -> Box<dyn DriverAdapter> + Send + Sync>;

/// Name-indexed set of available drivers.
#[derive(Clone)]
pub struct DriverRegistry {
    factories: BTreeMap<String, DriverFactory>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::empty()
            .with_driver("diag", || Box::new(DiagDriver::default()))
            .with_driver("stdout", || Box::new(StdoutDriver::default()))
    }
}

impl DriverRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_driver<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn() -> Box<dyn DriverAdapter> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_owned(), Arc::new(factory));
        self
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn DriverAdapter>, DriverError> {
        let factory = self
            .factories
            .get(name.trim())
            .ok_or_else(|| DriverError::UnknownDriver {
                name: name.to_owned(),
                known: self.names().join(","),
            })?;
        Ok(factory())
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
