use std::{
    sync::{
        Arc, Mutex,
        atomic::AtomicU64,
    },
    time::Duration,
};

use tokio::{
    sync::watch,
    task::{AbortHandle, JoinSet},
    time::timeout,
};
use tracing::{debug, error, info, warn};

use super::{
    ActivityError, CYCLES_SCOPE, ErrorPolicy, RunState, STRIDES_SCOPE,
    def::{ActivityDef, CYCLERATE_PARAMS, STRIDERATE_PARAM},
    motor::Motor,
    rate::RateSpec,
};
use crate::{
    drivers::{DriverAdapter, DriverRegistry},
    metrics::{ActivityMetrics, MetricsRegistry},
    ratelimit::LimiterSlot,
};

/// State shared between an activity's motors, its supervisor task and every
/// handle given out for it.
pub(super) struct ActivityShared {
    pub(super) def: ActivityDef,
    pub(super) policy: ErrorPolicy,
    pub(super) end_cycle: u64,
    pub(super) stride: u64,
    pub(super) cursor: AtomicU64,
    pub(super) cycle_limiter: LimiterSlot,
    pub(super) stride_limiter: LimiterSlot,
    pub(super) metrics: ActivityMetrics,
    driver: Box<dyn DriverAdapter>,
    state: watch::Sender<RunState>,
    stop: watch::Sender<bool>,
    failure: Mutex<Option<String>>,
    supervisor: Mutex<Option<AbortHandle>>,
}

impl ActivityShared {
    pub(super) fn alias(&self) -> String {
        self.def.alias()
    }

    pub(super) fn stop_requested(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    pub(super) fn request_stop(&self) {
        self.stop.send_replace(true);
    }

    /// Records the first failure and asks every motor to stop.
    pub(super) fn fail(&self, message: String) {
        let mut failure = self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if failure.is_none() {
            *failure = Some(message);
        }
        drop(failure);
        self.request_stop();
    }

    fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Moves to `next` unless the activity already reached a terminal state.
    fn transition(&self, next: RunState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            debug!(alias = %self.alias(), state = %next, "activity state changed");
        }
        changed
    }
}

/// Entry point for starting activities.
pub struct Activity;

impl Activity {
    /// Validates `def`, maps its op through the driver, and spawns one motor
    /// task per thread. Must be called inside a tokio runtime.
    pub fn start(
        def: ActivityDef,
        drivers: &DriverRegistry,
        registry: &Arc<MetricsRegistry>,
    ) -> Result<ActivityHandle, ActivityError> {
        def.validate()?;
        let policy = def.errors().parse::<ErrorPolicy>()?;
        let threads = def.threads()?;
        let stride = def.stride()?;
        let start_cycle = def.start_cycle()?;
        let end_cycle = def.end_cycle()?;
        let alias = def.alias();
        let cycles = def.cycle_summary()?;

        let cyclerate = def.cyclerate()?;
        let striderate = def.striderate()?;

        let driver = drivers.create(&def.driver())?;
        let op = driver.op_dispenser(&def)?;

        let cycle_limiter = LimiterSlot::default();
        if let Some(spec) = cyclerate {
            cycle_limiter.create_or_update(CYCLES_SCOPE, spec);
        }
        let stride_limiter = LimiterSlot::default();
        if let Some(spec) = striderate {
            stride_limiter.create_or_update(STRIDES_SCOPE, spec);
        }
        let metrics = ActivityMetrics::register(registry, &alias, &cycle_limiter, &stride_limiter)?;

        let (state, _) = watch::channel(RunState::Starting);
        let (stop, _) = watch::channel(false);
        let shared = Arc::new(ActivityShared {
            def,
            policy,
            end_cycle,
            stride,
            cursor: AtomicU64::new(start_cycle),
            cycle_limiter,
            stride_limiter,
            metrics,
            driver,
            state,
            stop,
            failure: Mutex::new(None),
            supervisor: Mutex::new(None),
        });

        let mut motors = JoinSet::new();
        for slot in 0..threads {
            let motor = Motor::new(slot, Arc::clone(&shared), Arc::clone(&op));
            motors.spawn(motor.run());
        }

        info!(
            alias = %alias,
            driver = shared.driver.name(),
            threads,
            stride,
            cycles = %cycles,
            "activity started"
        );

        let supervisor = tokio::spawn(supervise(Arc::clone(&shared), motors));
        *shared
            .supervisor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(supervisor.abort_handle());
        shared.transition(RunState::Running);

        Ok(ActivityHandle { shared })
    }
}

/// Joins every motor and settles the final state.
async fn supervise(shared: Arc<ActivityShared>, mut motors: JoinSet<()>) {
    while let Some(joined) = motors.join_next().await {
        if let Err(join_err) = joined {
            if join_err.is_panic() {
                shared.fail(format!("motor panicked: {join_err}"));
            }
        }
    }

    let alias = shared.alias();
    let next = if let Some(failure) = shared.failure() {
        error!(alias = %alias, failure = %failure, "activity errored");
        RunState::Errored
    } else if *shared.stop.borrow() {
        info!(alias = %alias, "activity stopped");
        RunState::Stopped
    } else {
        info!(
            alias = %alias,
            cycles = shared.metrics.servicetime.count(),
            "activity finished"
        );
        RunState::Finished
    };
    shared.transition(next);
}

/// Cloneable control handle for one started activity.
#[derive(Clone)]
pub struct ActivityHandle {
    shared: Arc<ActivityShared>,
}

impl ActivityHandle {
    #[must_use]
    pub fn alias(&self) -> String {
        self.shared.alias()
    }

    #[must_use]
    pub fn def(&self) -> &ActivityDef {
        &self.shared.def
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.shared.state()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// First error that stopped the activity, if any.
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        self.shared.failure()
    }

    #[must_use]
    pub fn metrics(&self) -> &ActivityMetrics {
        &self.shared.metrics
    }

    #[must_use]
    pub fn cycle_limiter(&self) -> &LimiterSlot {
        &self.shared.cycle_limiter
    }

    #[must_use]
    pub fn stride_limiter(&self) -> &LimiterSlot {
        &self.shared.stride_limiter
    }

    /// Current raw value of a parameter, exactly as it was set.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<String> {
        self.shared.def.params().get(name)
    }

    /// Changes a parameter on the running activity.
    ///
    /// A cycle or stride rate change re-rates the matching limiter, and every change is
    /// offered to the driver. A rejected change leaves the previous value in
    /// place. `threads` is only recorded; it takes effect on the next start.
    pub fn set_param(&self, name: &str, value: impl Into<String>) -> Result<(), ActivityError> {
        let value = value.into();
        let params = self.shared.def.params();
        let previous = params.get(name);

        if CYCLERATE_PARAMS.contains(&name) {
            let spec = value
                .parse::<RateSpec>()
                .map_err(|source| ActivityError::Def(source.into()))?;
            self.shared
                .cycle_limiter
                .create_or_update(CYCLES_SCOPE, spec);
        } else if name == STRIDERATE_PARAM {
            let spec = value
                .parse::<RateSpec>()
                .map_err(|source| ActivityError::Def(source.into()))?;
            self.shared
                .stride_limiter
                .create_or_update(STRIDES_SCOPE, spec);
        }

        params.set(name, value.clone());
        if let Err(err) = self.shared.driver.on_activity_def_update(&self.shared.def) {
            match previous {
                Some(previous) => params.set_silently(name, previous),
                None => {
                    params.remove(name);
                }
            }
            warn!(
                alias = %self.alias(),
                param = name,
                value = %value,
                error = %err,
                "rejected parameter update"
            );
            return Err(err.into());
        }

        if name == "threads" {
            info!(alias = %self.alias(), threads = %value, "thread count recorded for next start");
        } else {
            info!(alias = %self.alias(), param = name, value = %value, "parameter updated");
        }
        Ok(())
    }

    /// Waits until the activity reaches a terminal state, or until `limit`
    /// elapses. Returns the state observed last.
    pub async fn await_terminal(&self, limit: Option<Duration>) -> RunState {
        let mut states = self.shared.state.subscribe();
        let settled = states.wait_for(|state| state.is_terminal());
        match limit {
            Some(limit) => {
                let _ = timeout(limit, settled).await;
            }
            None => {
                let _ = settled.await;
            }
        }
        self.state()
    }

    /// Signals the motors to stop without waiting for them.
    pub fn request_stop(&self) {
        if self.state().is_terminal() {
            return;
        }
        self.shared.request_stop();
        self.shared.transition(RunState::Stopping);
    }

    /// Asks the motors to stop and waits up to `grace` for them. Motors still
    /// running afterwards are aborted.
    pub async fn stop(&self, grace: Duration) -> RunState {
        if self.state().is_terminal() {
            return self.state();
        }
        self.request_stop();

        let settled = self.await_terminal(Some(grace)).await;
        if settled.is_terminal() {
            return settled;
        }

        warn!(alias = %self.alias(), ?grace, "motors did not stop in time; aborting");
        if let Some(supervisor) = self
            .shared
            .supervisor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            supervisor.abort();
        }
        self.shared.transition(RunState::Stopped);
        self.state()
    }

    /// Cycles whose op has completed so far.
    #[must_use]
    pub fn completed_cycles(&self) -> u64 {
        self.shared.metrics.result.count()
    }
}

impl std::fmt::Debug for ActivityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityHandle")
            .field("alias", &self.alias())
            .field("state", &self.state())
            .finish()
    }
}
