use std::{sync::Arc, time::Duration};

use crate::{metrics::MetricsRegistry, scenario::ScenarioController};

/// Shared runtime context available to workloads and expectations.
#[derive(Debug)]
pub struct RunContext {
    controller: ScenarioController,
    run_duration: Duration,
    run_metrics: RunMetrics,
}

impl RunContext {
    #[must_use]
    pub fn new(controller: ScenarioController, run_duration: Duration) -> Self {
        Self {
            controller,
            run_duration,
            run_metrics: RunMetrics::new(run_duration),
        }
    }

    #[must_use]
    pub const fn controller(&self) -> &ScenarioController {
        &self.controller
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        self.controller.metrics()
    }

    #[must_use]
    pub const fn run_duration(&self) -> Duration {
        self.run_duration
    }

    #[must_use]
    pub const fn run_metrics(&self) -> RunMetrics {
        self.run_metrics
    }
}

/// Timing facts known when the scenario is built.
#[derive(Clone, Copy, Debug)]
pub struct RunMetrics {
    run_duration: Duration,
}

impl RunMetrics {
    #[must_use]
    pub const fn new(run_duration: Duration) -> Self {
        Self { run_duration }
    }

    #[must_use]
    pub const fn run_duration(&self) -> Duration {
        self.run_duration
    }
}

/// Releases whatever a deployment left running.
pub trait CleanupGuard: Send {
    fn cleanup(self: Box<Self>);
}

/// Handle returned by a completed run. Keeps the context alive for
/// inspection and cleans up when dropped.
pub struct RunHandle {
    context: Arc<RunContext>,
    cleanup_guard: Option<Box<dyn CleanupGuard>>,
}

impl RunHandle {
    pub(crate) fn from_shared(
        context: Arc<RunContext>,
        cleanup_guard: Option<Box<dyn CleanupGuard>>,
    ) -> Self {
        Self {
            context,
            cleanup_guard,
        }
    }

    #[must_use]
    pub fn context(&self) -> &RunContext {
        &self.context
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("context", &self.context)
            .field("cleanup_pending", &self.cleanup_guard.is_some())
            .finish()
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if let Some(guard) = self.cleanup_guard.take() {
            guard.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    struct FlagGuard(Arc<AtomicBool>);

    impl CleanupGuard for FlagGuard {
        fn cleanup(self: Box<Self>) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn handle_is_debuggable_and_cleans_up_on_drop() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let context = Arc::new(RunContext::new(
            ScenarioController::default(),
            Duration::from_secs(3),
        ));
        let handle = RunHandle::from_shared(context, Some(Box::new(FlagGuard(Arc::clone(&cleaned)))));

        let rendered = format!("{handle:?}");
        assert!(rendered.contains("RunHandle"));
        assert!(rendered.contains("cleanup_pending: true"));
        assert_eq!(handle.context().run_duration(), Duration::from_secs(3));

        drop(handle);
        assert!(cleaned.load(Ordering::SeqCst));
    }
}
