use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

/// Metrics read at one poll of the running activity.
#[derive(Clone, Debug, PartialEq)]
pub struct WaittimeSample {
    pub cycles: Option<f64>,
    pub waittime_nanos: Option<f64>,
    pub diagrate: Option<String>,
    pub cyclerate: Option<String>,
}

/// Everything a cycle-delay run observed, in order.
#[derive(Clone, Debug, Default)]
pub struct ReportState {
    /// Lines printed by the run, verbatim.
    pub transcript: Vec<String>,
    pub backlog_samples: Vec<WaittimeSample>,
    pub recovery_samples: Vec<WaittimeSample>,
    pub step1_waittime: Option<f64>,
    pub step2_waittime: Option<f64>,
    /// Recovery iteration at which waittime dropped under the threshold.
    pub recovered_on: Option<usize>,
    /// The activity stopped running before the script was done with it.
    pub aborted: bool,
}

/// Shared, cloneable view of a run's [`ReportState`].
#[derive(Clone, Debug, Default)]
pub struct RecoveryReport {
    state: Arc<Mutex<ReportState>>,
}

impl RecoveryReport {
    #[must_use]
    pub fn snapshot(&self) -> ReportState {
        self.lock().clone()
    }

    #[must_use]
    pub fn transcript(&self) -> Vec<String> {
        self.lock().transcript.clone()
    }

    /// Logs `line` and appends it to the transcript.
    pub(crate) fn print(&self, line: String) {
        info!(target: "cyclebench::script", "{line}");
        self.lock().transcript.push(line);
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut ReportState)) {
        f(&mut self.lock());
    }

    fn lock(&self) -> MutexGuard<'_, ReportState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Renders a metric value the way the transcript shows it: whole numbers
/// without a fraction, missing values as `n/a`.
pub(crate) fn format_metric(value: Option<f64>) -> String {
    match value {
        Some(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", v as i64),
        Some(v) => v.to_string(),
        None => "n/a".to_owned(),
    }
}
