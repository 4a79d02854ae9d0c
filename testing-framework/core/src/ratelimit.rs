use std::{
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

use crate::activity::rate::{RateSpec, RateVerb};

/// Timing of one granted operation.
#[derive(Clone, Copy, Debug)]
pub struct Permit {
    /// Slot the operation was due at on the ideal schedule.
    pub scheduled_at: Instant,
    /// Moment the caller is allowed to proceed.
    pub granted_at: Instant,
}

impl Permit {
    /// How late the operation starts relative to its ideal slot.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.granted_at.saturating_duration_since(self.scheduled_at)
    }
}

#[derive(Debug)]
struct Schedule {
    spec: RateSpec,
    interval: Duration,
    burst_interval: Duration,
    next_slot: Option<Instant>,
    last_grant: Option<Instant>,
}

impl Schedule {
    fn new(spec: RateSpec) -> Self {
        Self {
            spec,
            interval: spec.interval(),
            burst_interval: spec.burst_interval(),
            next_slot: None,
            last_grant: None,
        }
    }
}

/// Shared limiter that keeps an ideal schedule of `1/rate` slots.
///
/// Callers that are on time wait for their slot. Callers that arrive after
/// their slot are behind schedule; they may proceed immediately but no
/// faster than `rate * burst_ratio`, so an accumulated backlog drains once
/// whatever slowed the callers down goes away. The schedule starts on the
/// first reservation.
#[derive(Debug)]
pub struct RateLimiter {
    scope: String,
    schedule: Mutex<Schedule>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(scope: impl Into<String>, spec: RateSpec) -> Self {
        let scope = scope.into();
        info!(scope = %scope, spec = %spec, "rate limiter created");
        Self {
            scope,
            schedule: Mutex::new(Schedule::new(spec)),
        }
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    #[must_use]
    pub fn spec(&self) -> RateSpec {
        self.lock().spec
    }

    /// Claims the next slot and returns when the caller may run, without
    /// waiting.
    pub fn reserve(&self) -> Permit {
        let now = Instant::now();
        let mut schedule = self.lock();

        let scheduled_at = *schedule.next_slot.get_or_insert(now);
        schedule.next_slot = Some(scheduled_at + schedule.interval);

        let granted_at = if scheduled_at >= now {
            scheduled_at
        } else {
            schedule
                .last_grant
                .map_or(now, |last| (last + schedule.burst_interval).max(now))
        };
        schedule.last_grant = Some(granted_at);

        Permit {
            scheduled_at,
            granted_at,
        }
    }

    /// Claims the next slot and sleeps until it is granted.
    pub async fn acquire(&self) -> Permit {
        let permit = self.reserve();
        if permit.granted_at > Instant::now() {
            sleep_until(permit.granted_at).await;
        }
        permit
    }

    /// Accumulated scheduling delay: how far real time has run past the next
    /// unclaimed slot. Zero before the first reservation and while on time.
    #[must_use]
    pub fn wait_time(&self) -> Duration {
        self.lock()
            .next_slot
            .map_or(Duration::ZERO, |slot| {
                Instant::now().saturating_duration_since(slot)
            })
    }

    /// Re-rates the limiter in place. `restart` also drops the backlog.
    pub fn apply(&self, spec: RateSpec) {
        let mut schedule = self.lock();
        let previous = schedule.spec;
        schedule.spec = spec;
        schedule.interval = spec.interval();
        schedule.burst_interval = spec.burst_interval();

        if spec.verb() == RateVerb::Restart && schedule.next_slot.is_some() {
            let now = Instant::now();
            schedule.next_slot = Some(now);
            schedule.last_grant = None;
        }

        info!(
            scope = %self.scope,
            from = %previous,
            to = %spec,
            verb = spec.verb().label(),
            "rate limiter updated"
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Schedule> {
        self.schedule
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Late-bound home for a limiter that may be created after metrics that
/// observe it.
#[derive(Clone, Debug, Default)]
pub struct LimiterSlot {
    inner: Arc<RwLock<Option<Arc<RateLimiter>>>>,
}

impl LimiterSlot {
    #[must_use]
    pub fn get(&self) -> Option<Arc<RateLimiter>> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Creates the limiter on first use and re-rates it afterwards.
    pub fn create_or_update(&self, scope: &str, spec: RateSpec) -> Arc<RateLimiter> {
        let mut slot = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match slot.as_ref() {
            Some(limiter) => {
                limiter.apply(spec);
                Arc::clone(limiter)
            }
            None => {
                debug!(scope, "installing rate limiter");
                let limiter = Arc::new(RateLimiter::new(scope, spec));
                *slot = Some(Arc::clone(&limiter));
                limiter
            }
        }
    }

    #[must_use]
    pub fn wait_time(&self) -> Duration {
        self.get().map_or(Duration::ZERO, |limiter| limiter.wait_time())
    }
}
