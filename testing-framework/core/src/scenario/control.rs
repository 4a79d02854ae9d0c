use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use cyclebench_config::timeouts;
use serde::Serialize;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::ScenarioError;
use crate::{
    activity::{Activity, ActivityDef, ActivityHandle, RunState},
    drivers::DriverRegistry,
    metrics::MetricsRegistry,
};

/// Point-in-time view of one activity, suitable for printing or JSON output.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActivitySummary {
    pub alias: String,
    pub state: String,
    pub completed_cycles: u64,
    pub errors: u64,
    pub mean_servicetime_ns: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Control surface over the activities of one scenario: start, observe,
/// re-parameterize and stop them by alias.
#[derive(Clone)]
pub struct ScenarioController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    drivers: DriverRegistry,
    metrics: Arc<MetricsRegistry>,
    activities: Mutex<BTreeMap<String, ActivityHandle>>,
    enumerator: AtomicUsize,
    stop_grace: Duration,
}

impl Default for ScenarioController {
    fn default() -> Self {
        Self::new(DriverRegistry::default())
    }
}

impl ScenarioController {
    #[must_use]
    pub fn new(drivers: DriverRegistry) -> Self {
        Self::with_stop_grace(drivers, timeouts::stop_grace())
    }

    #[must_use]
    pub fn with_stop_grace(drivers: DriverRegistry, stop_grace: Duration) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                drivers,
                metrics: MetricsRegistry::new(),
                activities: Mutex::new(BTreeMap::new()),
                enumerator: AtomicUsize::new(0),
                stop_grace,
            }),
        }
    }

    /// Metrics of every activity started through this controller.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.inner.metrics
    }

    /// Starts an activity. An alias may be reused once its previous run has
    /// ended; its metrics start from zero again.
    pub fn start(&self, def: ActivityDef) -> Result<ActivityHandle, ScenarioError> {
        def.assign_default_alias(self.inner.enumerator.fetch_add(1, Ordering::Relaxed));
        let alias = def.alias();

        let mut activities = self.activities();
        if let Some(existing) = activities.get(&alias) {
            if !existing.state().is_terminal() {
                return Err(ScenarioError::AlreadyRunning { alias });
            }
            let removed = self.inner.metrics.remove_prefix(&alias);
            debug!(alias = %alias, removed, "restarting alias");
        }

        info!(alias = %alias, activity = %def, "starting activity");
        let handle = Activity::start(def, &self.inner.drivers, &self.inner.metrics)?;
        activities.insert(alias, handle.clone());
        Ok(handle)
    }

    /// Parses a `name=value;...` definition and starts it.
    pub fn start_str(&self, spec: &str) -> Result<ActivityHandle, ScenarioError> {
        let def = ActivityDef::parse(spec).map_err(|err| ScenarioError::Activity(err.into()))?;
        self.start(def)
    }

    /// Whether `alias` names an activity that is starting or running.
    #[must_use]
    pub fn is_running_activity(&self, alias: &str) -> bool {
        self.activities()
            .get(alias)
            .is_some_and(ActivityHandle::is_running)
    }

    pub async fn wait_millis(&self, millis: u64) {
        sleep(Duration::from_millis(millis)).await;
    }

    pub fn activity(&self, alias: &str) -> Result<ActivityHandle, ScenarioError> {
        self.activities()
            .get(alias)
            .cloned()
            .ok_or_else(|| ScenarioError::UnknownActivity {
                alias: alias.to_owned(),
            })
    }

    #[must_use]
    pub fn activity_names(&self) -> Vec<String> {
        self.activities().keys().cloned().collect()
    }

    /// Stops one activity, aborting its motors if they outlive the grace
    /// period.
    pub async fn stop(&self, alias: &str) -> Result<RunState, ScenarioError> {
        let handle = self.activity(alias)?;
        let state = handle.stop(self.inner.stop_grace).await;
        info!(alias, state = %state, "stopped activity");
        Ok(state)
    }

    /// Waits for an activity to end on its own.
    pub async fn await_activity(
        &self,
        alias: &str,
        limit: Option<Duration>,
    ) -> Result<RunState, ScenarioError> {
        let handle = self.activity(alias)?;
        let state = handle.await_terminal(limit).await;
        if !state.is_terminal() {
            return Err(ScenarioError::AwaitTimeout {
                alias: alias.to_owned(),
                timeout: limit.unwrap_or_default(),
            });
        }
        Ok(state)
    }

    /// Starts an activity and waits for it to end.
    pub async fn run(
        &self,
        def: ActivityDef,
        limit: Option<Duration>,
    ) -> Result<RunState, ScenarioError> {
        let alias = self.start(def)?.alias();
        self.await_activity(&alias, limit).await
    }

    /// Waits until no activity is running, or until `limit` elapses.
    pub async fn await_all(&self, limit: Duration) -> bool {
        let handles: Vec<ActivityHandle> = self.activities().values().cloned().collect();
        let all = async {
            for handle in &handles {
                handle.await_terminal(None).await;
            }
        };
        timeout(limit, all).await.is_ok()
    }

    /// Stops every activity that has not ended yet.
    pub async fn stop_all(&self) {
        let running: Vec<ActivityHandle> = self
            .activities()
            .values()
            .filter(|handle| !handle.state().is_terminal())
            .cloned()
            .collect();
        for handle in running {
            let state = handle.stop(self.inner.stop_grace).await;
            info!(alias = %handle.alias(), state = %state, "stopped activity");
        }
    }

    /// Signals every activity to stop without waiting. Used from cleanup
    /// paths that cannot await.
    pub fn request_stop_all(&self) {
        for handle in self.activities().values() {
            if !handle.state().is_terminal() {
                warn!(alias = %handle.alias(), "stopping activity left running");
                handle.request_stop();
            }
        }
    }

    /// One summary per known activity, ordered by alias.
    #[must_use]
    pub fn summaries(&self) -> Vec<ActivitySummary> {
        let handles: Vec<ActivityHandle> = self.activities().values().cloned().collect();
        handles
            .iter()
            .map(|handle| self.summarize(handle))
            .collect()
    }

    fn summarize(&self, handle: &ActivityHandle) -> ActivitySummary {
        let alias = handle.alias();
        let errors_prefix = format!("{alias}.errors.");
        let errors = self
            .inner
            .metrics
            .names()
            .iter()
            .filter(|name| name.starts_with(&errors_prefix))
            .filter_map(|name| self.inner.metrics.value(&format!("{name}.count")))
            .sum::<f64>();
        let mean_servicetime_ns = self
            .inner
            .metrics
            .value(&format!("{alias}.cycles.servicetime.mean"))
            .unwrap_or(0.0);

        ActivitySummary {
            state: handle.state().to_string(),
            completed_cycles: handle.completed_cycles(),
            errors: errors as u64,
            mean_servicetime_ns,
            failure: handle.failure(),
            alias,
        }
    }

    fn activities(&self) -> MutexGuard<'_, BTreeMap<String, ActivityHandle>> {
        self.inner
            .activities
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ScenarioController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioController")
            .field("activities", &self.activity_names())
            .field("drivers", &self.inner.drivers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FINITE: &str = "alias=finite;driver=diag;cycles=20;op=noop";
    const ENDLESS: &str = "alias=endless;driver=diag;cycles=1B;threads=2;cyclerate=100;op=noop";

    #[tokio::test(start_paused = true)]
    async fn run_waits_for_completion() {
        let controller = ScenarioController::default();
        let def = ActivityDef::parse(FINITE).unwrap();

        let state = controller.run(def, Some(Duration::from_secs(5))).await.unwrap();

        assert_eq!(state, RunState::Finished);
        assert!(!controller.is_running_activity("finite"));
        assert_eq!(
            controller.metrics().value("finite.cycles.servicetime.count"),
            Some(20.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_duplicate_running_alias_and_allows_restart() {
        let controller = ScenarioController::default();
        controller.start_str(ENDLESS).unwrap();
        assert!(controller.is_running_activity("endless"));

        assert!(matches!(
            controller.start_str(ENDLESS),
            Err(ScenarioError::AlreadyRunning { .. })
        ));

        controller.wait_millis(200).await;
        assert_eq!(controller.stop("endless").await.unwrap(), RunState::Stopped);

        let restarted = controller.start_str(ENDLESS).unwrap();
        assert!(restarted.is_running());
        assert_eq!(
            controller.metrics().value("endless.cycles.servicetime.count"),
            Some(0.0)
        );
        controller.stop_all().await;
        assert!(!controller.is_running_activity("endless"));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_aliases_are_reported() {
        let controller = ScenarioController::default();
        assert!(!controller.is_running_activity("ghost"));
        assert!(matches!(
            controller.stop("ghost").await,
            Err(ScenarioError::UnknownActivity { .. })
        ));
        assert!(matches!(
            controller.activity("ghost"),
            Err(ScenarioError::UnknownActivity { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn await_activity_times_out_on_endless_runs() {
        let controller = ScenarioController::default();
        controller.start_str(ENDLESS).unwrap();

        let err = controller
            .await_activity("endless", Some(Duration::from_millis(300)))
            .await
            .unwrap_err();
        assert!(matches!(err, ScenarioError::AwaitTimeout { .. }));

        controller.request_stop_all();
        assert!(controller.await_all(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn default_aliases_are_enumerated() {
        let controller = ScenarioController::default();
        let handle = controller.start_str("driver=diag;cycles=3;op=noop").unwrap();
        assert_eq!(handle.alias(), "DIAG0");

        let named = controller.start_str("driver=diag;workload=reads;cycles=3;op=noop").unwrap();
        assert_eq!(named.alias(), "reads");
        assert_eq!(controller.activity_names(), vec!["DIAG0", "reads"]);
    }

    #[tokio::test(start_paused = true)]
    async fn summaries_count_cycles_and_errors() {
        let controller = ScenarioController::default();
        controller
            .run(
                ActivityDef::parse(
                    r#"alias=flaky;driver=diag;cycles=10;errors=count;op={"erroroncycle":"3"}"#,
                )
                .unwrap(),
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        let summaries = controller.summaries();
        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.alias, "flaky");
        assert_eq!(summary.state, RunState::Finished.to_string());
        assert_eq!(summary.completed_cycles, 10);
        assert_eq!(summary.errors, 1);
        assert!(summary.failure.is_none());

        let json = serde_json::to_value(summary).unwrap();
        assert!(json.get("failure").is_none());
    }
}
