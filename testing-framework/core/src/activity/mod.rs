pub mod def;
mod motor;
pub mod rate;
mod runtime;

use std::{fmt, str::FromStr};

pub use def::{ActivityDef, ActivityDefError, ParameterMap};
pub use rate::{RateSpec, RateSpecError, RateVerb};
pub use runtime::{Activity, ActivityHandle};
use thiserror::Error;

use crate::{drivers::DriverError, metrics::MetricsError};

/// Scope name of the per-activity cycle limiter.
pub const CYCLES_SCOPE: &str = "cycles";
/// Scope name of the per-activity stride limiter.
pub const STRIDES_SCOPE: &str = "strides";

/// Lifecycle of a started activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Uninitialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    Finished,
    Errored,
}

impl RunState {
    /// Whether the activity still counts as running for liveness checks.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Finished | Self::Errored)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Finished => "finished",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a motor does when a cycle's op fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Record the error and stop the whole activity.
    #[default]
    Stop,
    /// Log, count and continue.
    Warn,
    /// Count and continue.
    Count,
    Ignore,
}

impl FromStr for ErrorPolicy {
    type Err = ActivityError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stop" => Ok(Self::Stop),
            "warn" => Ok(Self::Warn),
            "count" => Ok(Self::Count),
            "ignore" => Ok(Self::Ignore),
            _ => Err(ActivityError::UnknownErrorPolicy {
                value: raw.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error(transparent)]
    Def(#[from] ActivityDefError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[error("unknown error policy '{value}' (expected stop, warn, count or ignore)")]
    UnknownErrorPolicy { value: String },
}
