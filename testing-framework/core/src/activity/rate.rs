use std::{fmt, str::FromStr, time::Duration};

use thiserror::Error;

pub const DEFAULT_BURST_RATIO: f64 = 1.1;

/// Longest spacing between two operations a limiter will schedule.
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Error, PartialEq)]
pub enum RateSpecError {
    #[error("rate spec is empty")]
    Empty,
    #[error("invalid ops/s '{0}'")]
    InvalidRate(String),
    #[error("ops/s must be positive (got {0})")]
    NonPositiveRate(f64),
    #[error("invalid burst ratio '{0}'")]
    InvalidBurst(String),
    #[error("burst ratio must be at least 1.0 (got {0})")]
    BurstBelowOne(f64),
    #[error("ops/s {0} is too low: slots would be more than a year apart")]
    RateTooLow(f64),
    #[error("unknown rate verb '{0}': expected start, configure or restart")]
    UnknownVerb(String),
}

/// How a changed spec is applied to a limiter that already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RateVerb {
    /// Create or re-rate, keeping any accumulated backlog.
    #[default]
    Start,
    /// Re-rate only; identical to `Start` for an existing limiter.
    Configure,
    /// Re-rate and reset the schedule to now, discarding backlog.
    Restart,
}

impl RateVerb {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Configure => "configure",
            Self::Restart => "restart",
        }
    }
}

/// `ops_per_sec[,burst_ratio[,verb]]`, e.g. `1000,1.5`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateSpec {
    ops_per_sec: f64,
    burst_ratio: f64,
    verb: RateVerb,
    interval: Duration,
    burst_interval: Duration,
}

impl RateSpec {
    pub fn new(ops_per_sec: f64, burst_ratio: f64) -> Result<Self, RateSpecError> {
        if !(ops_per_sec.is_finite() && ops_per_sec > 0.0) {
            return Err(RateSpecError::NonPositiveRate(ops_per_sec));
        }
        if !(burst_ratio.is_finite() && burst_ratio >= 1.0) {
            return Err(RateSpecError::BurstBelowOne(burst_ratio));
        }
        let interval = Duration::try_from_secs_f64(1.0 / ops_per_sec)
            .ok()
            .filter(|interval| *interval <= MAX_INTERVAL)
            .ok_or(RateSpecError::RateTooLow(ops_per_sec))?;
        let burst_interval = Duration::try_from_secs_f64(1.0 / (ops_per_sec * burst_ratio))
            .map_err(|_| RateSpecError::RateTooLow(ops_per_sec))?;
        Ok(Self {
            ops_per_sec,
            burst_ratio,
            verb: RateVerb::Start,
            interval,
            burst_interval,
        })
    }

    #[must_use]
    pub const fn with_verb(mut self, verb: RateVerb) -> Self {
        self.verb = verb;
        self
    }

    #[must_use]
    pub const fn ops_per_sec(&self) -> f64 {
        self.ops_per_sec
    }

    #[must_use]
    pub const fn burst_ratio(&self) -> f64 {
        self.burst_ratio
    }

    #[must_use]
    pub const fn verb(&self) -> RateVerb {
        self.verb
    }

    /// Nominal spacing between two operations.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Spacing allowed while catching up on a backlog.
    #[must_use]
    pub const fn burst_interval(&self) -> Duration {
        self.burst_interval
    }
}

impl FromStr for RateSpec {
    type Err = RateSpecError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.split(',').map(str::trim);

        let rate = parts
            .next()
            .filter(|rate| !rate.is_empty())
            .ok_or(RateSpecError::Empty)?;
        let ops_per_sec = rate
            .parse::<f64>()
            .map_err(|_| RateSpecError::InvalidRate(rate.to_owned()))?;

        let burst_ratio = match parts.next() {
            Some(burst) => burst
                .parse::<f64>()
                .map_err(|_| RateSpecError::InvalidBurst(burst.to_owned()))?,
            None => DEFAULT_BURST_RATIO,
        };

        let verb = match parts.next().map(str::to_ascii_lowercase).as_deref() {
            None | Some("start") => RateVerb::Start,
            Some("configure") => RateVerb::Configure,
            Some("restart") => RateVerb::Restart,
            Some(other) => return Err(RateSpecError::UnknownVerb(other.to_owned())),
        };

        Ok(Self::new(ops_per_sec, burst_ratio)?.with_verb(verb))
    }
}

impl fmt::Display for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.ops_per_sec, self.burst_ratio)?;
        if self.verb != RateVerb::Start {
            write!(f, ",{}", self.verb.label())?;
        }
        Ok(())
    }
}
