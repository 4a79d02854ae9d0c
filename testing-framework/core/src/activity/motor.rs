use std::{sync::Arc, time::Duration};

use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::{ErrorPolicy, runtime::ActivityShared};
use crate::drivers::{OpDispenser, OpError};

/// One worker of an activity. Claims `stride` cycles at a time from the
/// shared cursor until the cycle range is exhausted or a stop is requested.
pub(super) struct Motor {
    slot: usize,
    shared: Arc<ActivityShared>,
    op: Arc<dyn OpDispenser>,
}

impl Motor {
    pub(super) fn new(slot: usize, shared: Arc<ActivityShared>, op: Arc<dyn OpDispenser>) -> Self {
        Self { slot, shared, op }
    }

    pub(super) async fn run(self) {
        let mut stop = self.shared.stop_requested();
        let stride = self.shared.stride;
        debug!(alias = %self.shared.alias(), slot = self.slot, "motor running");

        loop {
            if *stop.borrow() {
                break;
            }
            let Some(first) = self.claim(stride) else {
                break;
            };
            if let Some(limiter) = self.shared.stride_limiter.get() {
                tokio::select! {
                    biased;
                    _ = stop.wait_for(|stopping| *stopping) => break,
                    _ = limiter.acquire() => {}
                }
            }

            let stride_started = Instant::now();
            for cycle in first..first + stride {
                let outcome = tokio::select! {
                    biased;
                    _ = stop.wait_for(|stopping| *stopping) => None,
                    outcome = self.run_cycle(cycle) => Some(outcome),
                };
                match outcome {
                    Some(Ok(())) => {}
                    Some(Err(err)) => {
                        if !self.handle_error(cycle, &err) {
                            return;
                        }
                    }
                    None => return,
                }
            }
            self.shared
                .metrics
                .strides_servicetime
                .update(stride_started.elapsed());

            tokio::task::yield_now().await;
        }

        debug!(alias = %self.shared.alias(), slot = self.slot, "motor exited");
    }

    /// Reserves the next full stride, or `None` once the range is used up.
    fn claim(&self, stride: u64) -> Option<u64> {
        let first = self
            .shared
            .cursor
            .fetch_add(stride, std::sync::atomic::Ordering::Relaxed);
        (first.checked_add(stride)? <= self.shared.end_cycle).then_some(first)
    }

    async fn run_cycle(&self, cycle: u64) -> Result<(), OpError> {
        let delay = match self.shared.cycle_limiter.get() {
            Some(limiter) => limiter.acquire().await.delay(),
            None => Duration::ZERO,
        };

        let started = Instant::now();
        let outcome = self.op.run_cycle(cycle).await;
        let servicetime = started.elapsed();

        let metrics = &self.shared.metrics;
        metrics.servicetime.update(servicetime);
        metrics.responsetime.update(servicetime + delay);
        metrics.result.update(servicetime);
        if outcome.is_ok() {
            metrics.result_success.update(servicetime);
        }
        outcome
    }

    /// Applies the error policy. Returns whether the motor should continue.
    fn handle_error(&self, cycle: u64, err: &OpError) -> bool {
        let policy = self.shared.policy;
        if policy != ErrorPolicy::Ignore {
            match self.shared.metrics.error_counter(err.name()) {
                Ok(counter) => counter.inc(),
                Err(metrics_err) => {
                    debug!(error = %metrics_err, "error counter unavailable");
                }
            }
        }

        match policy {
            ErrorPolicy::Stop => {
                error!(
                    alias = %self.shared.alias(),
                    cycle,
                    error = %err,
                    "op failed; stopping activity"
                );
                self.shared.fail(err.to_string());
                false
            }
            ErrorPolicy::Warn => {
                warn!(alias = %self.shared.alias(), cycle, error = %err, "op failed");
                true
            }
            ErrorPolicy::Count | ErrorPolicy::Ignore => true,
        }
    }
}
