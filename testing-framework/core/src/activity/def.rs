use std::{
    collections::BTreeMap,
    fmt,
    num::NonZeroUsize,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    thread,
};

use thiserror::Error;
use tracing::{info, warn};

use super::rate::{RateSpec, RateSpecError};

pub const DEFAULT_ALIAS: &str = "UNNAMEDACTIVITY";
pub const DEFAULT_DRIVER: &str = "stdout";
pub const DEFAULT_CYCLES: &str = "0";
pub const DEFAULT_THREADS: usize = 1;
pub const DEFAULT_STRIDE: u64 = 1;

const AUTO_THREADS_PER_CORE: usize = 10;
const UNTHREADED_CYCLE_WARNING: u64 = 1_000;

/// Names under which a cycle rate may be given, in lookup order.
pub const CYCLERATE_PARAMS: &[&str] = &["cyclerate", "targetrate", "rate"];
pub const STRIDERATE_PARAM: &str = "striderate";

#[derive(Debug, Error, PartialEq)]
pub enum ActivityDefError {
    #[error("unable to parse parameter entry '{entry}': expected name=value")]
    MalformedEntry { entry: String },
    #[error("unable to parse {field} from '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("start cycle must be strictly less than end cycle, but they are [{start},{end})")]
    EmptyCycleRange { start: u64, end: u64 },
    #[error("invalid thread spec '{value}': expected N, Nx, or auto")]
    InvalidThreads { value: String },
    #[error(
        "the specified cycles ({cycles}) are less than the stride ({stride}), so no stride can be \
         executed"
    )]
    StrideExceedsCycles { cycles: u64, stride: u64 },
    #[error("stride must be non-zero")]
    ZeroStride,
    #[error("invalid cycle rate: {0}")]
    Rate(#[from] RateSpecError),
}

/// Thread-safe parameter store with an atomic change counter.
///
/// Every canonical value of an activity lives here as text; typed accessors
/// on [`ActivityDef`] parse on read so that live updates are always visible.
#[derive(Debug, Default)]
pub struct ParameterMap {
    values: RwLock<BTreeMap<String, String>>,
    changes: AtomicU64,
}

impl ParameterMap {
    /// Parses `name=value;name=value` text. Values may contain `=`; empty
    /// entries are skipped.
    pub fn parse(spec: &str) -> Result<Self, ActivityDefError> {
        let mut values = BTreeMap::new();
        for entry in spec.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, value) =
                entry
                    .split_once('=')
                    .ok_or_else(|| ActivityDefError::MalformedEntry {
                        entry: entry.to_owned(),
                    })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ActivityDefError::MalformedEntry {
                    entry: entry.to_owned(),
                });
            }
            values.insert(name.to_owned(), value.trim().to_owned());
        }
        Ok(Self::from_map(values))
    }

    #[must_use]
    pub fn from_map(values: BTreeMap<String, String>) -> Self {
        Self {
            values: RwLock::new(values),
            changes: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.read().get(name).cloned()
    }

    /// Returns the first present parameter among `names` along with the name
    /// it was found under.
    #[must_use]
    pub fn get_any(&self, names: &[&str]) -> Option<(String, String)> {
        let values = self.read();
        names.iter().find_map(|name| {
            values
                .get(*name)
                .map(|value| ((*name).to_owned(), value.clone()))
        })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Sets a value and bumps the change counter.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.set_silently(name, value);
        self.changes.fetch_add(1, Ordering::AcqRel);
    }

    /// Sets a value without signalling observers.
    pub fn set_silently(&self, name: impl Into<String>, value: impl Into<String>) {
        self.write().insert(name.into(), value.into());
    }

    pub fn remove(&self, name: &str) -> Option<String> {
        let removed = self.write().remove(name);
        if removed.is_some() {
            self.changes.fetch_add(1, Ordering::AcqRel);
        }
        removed
    }

    #[must_use]
    pub fn change_count(&self) -> u64 {
        self.changes.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Display for ParameterMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.read();
        let mut first = true;
        for (name, value) in values.iter() {
            if !first {
                f.write_str(";")?;
            }
            first = false;
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

/// Runtime definition of a single activity.
///
/// Cloning shares the underlying parameters, so a running activity and the
/// handles given out by the scenario controller observe the same values.
#[derive(Clone, Debug, Default)]
pub struct ActivityDef {
    params: Arc<ParameterMap>,
}

impl ActivityDef {
    /// Parses a `name=value;...` activity spec.
    pub fn parse(spec: &str) -> Result<Self, ActivityDefError> {
        let def = Self::new(ParameterMap::parse(spec)?);
        info!(spec, parsed = %def, "parsed activity definition");
        Ok(def)
    }

    #[must_use]
    pub fn new(params: ParameterMap) -> Self {
        Self {
            params: Arc::new(params),
        }
    }

    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(ParameterMap::from_map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    #[must_use]
    pub fn params(&self) -> &ParameterMap {
        &self.params
    }

    /// The alias the activity is controlled by while running.
    #[must_use]
    pub fn alias(&self) -> String {
        self.params
            .get("alias")
            .unwrap_or_else(|| DEFAULT_ALIAS.to_owned())
    }

    #[must_use]
    pub fn has_alias(&self) -> bool {
        self.params
            .get("alias")
            .is_some_and(|alias| alias != DEFAULT_ALIAS)
    }

    /// Names the activity after its workload, or after its driver plus
    /// `enumerator`, when no alias was given.
    pub fn assign_default_alias(&self, enumerator: usize) {
        if self.has_alias() {
            return;
        }
        let alias = self.params.get_any(&["workload", "yaml"]).map_or_else(
            || format!("{}{enumerator}", self.driver().to_uppercase()),
            |(_, workload)| workload,
        );
        self.params.set_silently("alias", alias);
    }

    #[must_use]
    pub fn driver(&self) -> String {
        self.params
            .get_any(&["driver", "type"])
            .map_or_else(|| DEFAULT_DRIVER.to_owned(), |(_, driver)| driver)
    }

    #[must_use]
    pub fn cycles_spec(&self) -> String {
        self.params
            .get("cycles")
            .unwrap_or_else(|| DEFAULT_CYCLES.to_owned())
    }

    /// First cycle, inclusive. `M` alone means `0..M`.
    pub fn start_cycle(&self) -> Result<u64, ActivityDefError> {
        let cycles = self.cycles_spec();
        match cycles.split_once("..") {
            Some((start, _)) if !start.trim().is_empty() => parse_count("start cycle", start),
            _ => Ok(0),
        }
    }

    /// Last cycle, exclusive.
    pub fn end_cycle(&self) -> Result<u64, ActivityDefError> {
        let cycles = self.cycles_spec();
        let end = cycles.split_once("..").map_or(cycles.as_str(), |(_, end)| end);
        parse_count("end cycle", end)
    }

    pub fn cycle_count(&self) -> Result<u64, ActivityDefError> {
        Ok(self.end_cycle()?.saturating_sub(self.start_cycle()?))
    }

    /// Renders the cycle range as `[start..end)=count`.
    pub fn cycle_summary(&self) -> Result<String, ActivityDefError> {
        let start = self.start_cycle()?;
        let end = self.end_cycle()?;
        Ok(format!("[{start}..{end})={}", end.saturating_sub(start)))
    }

    pub fn set_cycles(&self, cycles: impl Into<String>) -> Result<(), ActivityDefError> {
        self.params.set("cycles", cycles);
        self.check_cycle_range()
    }

    pub fn check_cycle_range(&self) -> Result<(), ActivityDefError> {
        let start = self.start_cycle()?;
        let end = self.end_cycle()?;
        if start >= end {
            return Err(ActivityDefError::EmptyCycleRange { start, end });
        }
        Ok(())
    }

    /// Resolved thread count; `auto` and `Nx` scale with available cores.
    pub fn threads(&self) -> Result<usize, ActivityDefError> {
        let Some(spec) = self.params.get("threads") else {
            return Ok(DEFAULT_THREADS);
        };
        let spec = spec.trim().to_ascii_lowercase();
        let cores = thread::available_parallelism().map_or(1, NonZeroUsize::get);

        if spec == "auto" {
            let threads = cores * AUTO_THREADS_PER_CORE;
            let cycles = usize::try_from(self.cycle_count()?).unwrap_or(usize::MAX);
            return Ok(threads.min(cycles).max(1));
        }
        if let Some(multiplier) = spec.strip_suffix('x') {
            let multiplier = multiplier
                .parse::<usize>()
                .map_err(|_| ActivityDefError::InvalidThreads { value: spec.clone() })?;
            return Ok((cores * multiplier).max(1));
        }
        spec.parse::<usize>()
            .ok()
            .filter(|threads| *threads > 0)
            .ok_or(ActivityDefError::InvalidThreads { value: spec })
    }

    pub fn stride(&self) -> Result<u64, ActivityDefError> {
        match self.params.get("stride") {
            Some(stride) => parse_count("stride", &stride),
            None => Ok(DEFAULT_STRIDE),
        }
    }

    /// Cycle rate under any of its accepted names.
    pub fn cyclerate(&self) -> Result<Option<RateSpec>, ActivityDefError> {
        self.params
            .get_any(CYCLERATE_PARAMS)
            .map(|(_, spec)| spec.parse::<RateSpec>())
            .transpose()
            .map_err(ActivityDefError::from)
    }

    /// Rate at which whole strides may be claimed.
    pub fn striderate(&self) -> Result<Option<RateSpec>, ActivityDefError> {
        self.params
            .get(STRIDERATE_PARAM)
            .map(|spec| spec.parse::<RateSpec>())
            .transpose()
            .map_err(ActivityDefError::from)
    }

    #[must_use]
    pub fn errors(&self) -> String {
        self.params.get("errors").unwrap_or_else(|| "stop".to_owned())
    }

    #[must_use]
    pub fn op(&self) -> Option<String> {
        self.params.get("op")
    }

    /// Checks everything a start needs and warns about questionable but
    /// legal combinations.
    pub fn validate(&self) -> Result<(), ActivityDefError> {
        self.check_cycle_range()?;
        let cycles = self.cycle_count()?;

        let stride = self.stride()?;
        if stride == 0 {
            return Err(ActivityDefError::ZeroStride);
        }
        if cycles < stride {
            return Err(ActivityDefError::StrideExceedsCycles { cycles, stride });
        }
        if cycles % stride != 0 {
            warn!(
                stride,
                cycles, "stride does not evenly divide cycles; only full strides will run"
            );
        }

        let threads = self.threads()?;
        if !self.params.contains("threads") && cycles > UNTHREADED_CYCLE_WARNING {
            warn!(
                cycles,
                "running many cycles on a single thread; consider threads=auto"
            );
        }
        if threads as u64 > cycles {
            warn!(
                threads,
                cycles = %self.cycle_summary()?,
                "more threads than cycles"
            );
        }

        self.cyclerate()?;
        Ok(())
    }
}

impl fmt::Display for ActivityDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActivityDef:{}", self.params)
    }
}

/// Parses counts such as `1000`, `1_000`, `10K`, `1M`, `2B`.
pub fn parse_count(field: &'static str, raw: &str) -> Result<u64, ActivityDefError> {
    let invalid = || ActivityDefError::InvalidNumber {
        field,
        value: raw.to_owned(),
    };

    let cleaned: String = raw.trim().chars().filter(|c| *c != '_').collect();
    let (digits, multiplier) = match cleaned.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&cleaned[..cleaned.len() - 1], 1_000),
        Some('M') => (&cleaned[..cleaned.len() - 1], 1_000_000),
        Some('B' | 'G') => (&cleaned[..cleaned.len() - 1], 1_000_000_000),
        Some('T') => (&cleaned[..cleaned.len() - 1], 1_000_000_000_000),
        _ => (cleaned.as_str(), 1),
    };

    digits
        .parse::<u64>()
        .ok()
        .and_then(|value| value.checked_mul(multiplier))
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_semicolon_spec_with_equals_in_values() {
        let def = ActivityDef::parse("driver=diag; alias=foo ;op=a=b;cycles=10").unwrap();
        assert_eq!(def.alias(), "foo");
        assert_eq!(def.driver(), "diag");
        assert_eq!(def.op().as_deref(), Some("a=b"));
    }

    #[test]
    fn rejects_entries_without_value() {
        let err = ActivityDef::parse("driver=diag;oops").unwrap_err();
        assert_eq!(
            err,
            ActivityDefError::MalformedEntry {
                entry: "oops".into()
            }
        );
    }

    #[test]
    fn cycle_ranges_are_half_open() {
        let def = ActivityDef::from_pairs([("cycles", "0..1000000")]);
        assert_eq!(def.start_cycle().unwrap(), 0);
        assert_eq!(def.end_cycle().unwrap(), 1_000_000);
        assert_eq!(def.cycle_summary().unwrap(), "[0..1000000)=1000000");

        let single = ActivityDef::from_pairs([("cycles", "5K")]);
        assert_eq!(single.start_cycle().unwrap(), 0);
        assert_eq!(single.cycle_count().unwrap(), 5_000);

        let offset = ActivityDef::from_pairs([("cycles", "10..1M")]);
        assert_eq!(offset.cycle_count().unwrap(), 999_990);
    }

    #[test]
    fn empty_cycle_range_fails_validation() {
        let def = ActivityDef::from_pairs([("cycles", "10..10")]);
        assert_eq!(
            def.validate().unwrap_err(),
            ActivityDefError::EmptyCycleRange { start: 10, end: 10 }
        );
        assert!(def.set_cycles("5..4").is_err());
    }

    #[test]
    fn threads_accept_direct_multiplier_and_auto() {
        let direct = ActivityDef::from_pairs([("threads", "10"), ("cycles", "100")]);
        assert_eq!(direct.threads().unwrap(), 10);

        let cores = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        let multiplied = ActivityDef::from_pairs([("threads", "2x")]);
        assert_eq!(multiplied.threads().unwrap(), cores * 2);

        let auto = ActivityDef::from_pairs([("threads", "auto"), ("cycles", "3")]);
        assert_eq!(auto.threads().unwrap(), 3);

        let invalid = ActivityDef::from_pairs([("threads", "many")]);
        assert!(invalid.threads().is_err());
    }

    #[test]
    fn stride_larger_than_cycles_is_rejected() {
        let def = ActivityDef::from_pairs([("cycles", "3"), ("stride", "4")]);
        assert_eq!(
            def.validate().unwrap_err(),
            ActivityDefError::StrideExceedsCycles {
                cycles: 3,
                stride: 4
            }
        );
    }

    #[test]
    fn default_alias_prefers_workload_then_driver() {
        let named = ActivityDef::from_pairs([("workload", "baselines")]);
        named.assign_default_alias(0);
        assert_eq!(named.alias(), "baselines");

        let unnamed = ActivityDef::from_pairs([("driver", "diag")]);
        unnamed.assign_default_alias(3);
        assert_eq!(unnamed.alias(), "DIAG3");
    }

    #[test]
    fn striderate_is_parsed_and_rate_errors_compare_equal() {
        let def = ActivityDef::from_pairs([("striderate", "5,1.2")]);
        let spec = def.striderate().unwrap().expect("striderate present");
        assert!((spec.ops_per_sec() - 5.0).abs() < f64::EPSILON);
        assert!(ActivityDef::default().striderate().unwrap().is_none());

        let tiny = ActivityDef::from_pairs([("striderate", "1e-20")]);
        assert_eq!(
            tiny.striderate().unwrap_err(),
            ActivityDefError::Rate(RateSpecError::RateTooLow(1e-20))
        );
    }

    #[test]
    fn cyclerate_aliases_are_honoured() {
        let def = ActivityDef::from_pairs([("targetrate", "250")]);
        let spec = def.cyclerate().unwrap().expect("rate present");
        assert!((spec.ops_per_sec() - 250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn set_bumps_change_counter_but_silent_set_does_not() {
        let def = ActivityDef::default();
        def.params().set_silently("threads", "2");
        assert_eq!(def.params().change_count(), 0);
        def.params().set("diagrate", "10000");
        assert_eq!(def.params().change_count(), 1);
        assert_eq!(def.params().get("diagrate").as_deref(), Some("10000"));
    }

    #[test]
    fn counts_accept_units_and_separators() {
        assert_eq!(parse_count("cycles", "1_000").unwrap(), 1_000);
        assert_eq!(parse_count("cycles", "2b").unwrap(), 2_000_000_000);
        assert!(parse_count("cycles", "ten").is_err());
    }
}
