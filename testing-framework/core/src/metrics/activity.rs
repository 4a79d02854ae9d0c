use std::sync::Arc;

use super::{Counter, MetricsError, MetricsRegistry, Timer};
use crate::ratelimit::LimiterSlot;

/// The standard metric set of one activity, all named under its alias.
#[derive(Clone, Debug)]
pub struct ActivityMetrics {
    alias: String,
    registry: Arc<MetricsRegistry>,
    /// Time spent executing each cycle's op.
    pub servicetime: Arc<Timer>,
    /// Servicetime plus the scheduling delay of the cycle.
    pub responsetime: Arc<Timer>,
    /// Per-cycle outcome timing, successful or not.
    pub result: Arc<Timer>,
    pub result_success: Arc<Timer>,
    /// Time to run one stride of cycles.
    pub strides_servicetime: Arc<Timer>,
}

impl ActivityMetrics {
    pub fn register(
        registry: &Arc<MetricsRegistry>,
        alias: &str,
        cycle_limiter: &LimiterSlot,
        stride_limiter: &LimiterSlot,
    ) -> Result<Self, MetricsError> {
        for (scope, slot) in [("cycles", cycle_limiter), ("strides", stride_limiter)] {
            let limiter = slot.clone();
            registry.gauge(&format!("{alias}.{scope}.waittime"), move || {
                limiter.wait_time().as_nanos() as f64
            })?;
        }

        Ok(Self {
            alias: alias.to_owned(),
            registry: Arc::clone(registry),
            servicetime: registry.timer(&format!("{alias}.cycles.servicetime"))?,
            responsetime: registry.timer(&format!("{alias}.cycles.responsetime"))?,
            result: registry.timer(&format!("{alias}.result"))?,
            result_success: registry.timer(&format!("{alias}.result-success"))?,
            strides_servicetime: registry.timer(&format!("{alias}.strides.servicetime"))?,
        })
    }

    /// Counter for one error kind, created on first use.
    pub fn error_counter(&self, error_name: &str) -> Result<Arc<Counter>, MetricsError> {
        self.registry
            .counter(&format!("{}.errors.{error_name}", self.alias))
    }

    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_the_standard_names() {
        let registry = MetricsRegistry::new();
        let metrics = ActivityMetrics::register(
            &registry,
            "foo",
            &LimiterSlot::default(),
            &LimiterSlot::default(),
        )
        .unwrap();
        metrics.error_counter("Injected").unwrap().inc();

        assert_eq!(
            registry.names(),
            vec![
                "foo.cycles.responsetime",
                "foo.cycles.servicetime",
                "foo.cycles.waittime",
                "foo.errors.Injected",
                "foo.result",
                "foo.result-success",
                "foo.strides.servicetime",
                "foo.strides.waittime",
            ]
        );
        assert_eq!(registry.value("foo.cycles.waittime.value"), Some(0.0));
        assert_eq!(registry.value("foo.strides.waittime.value"), Some(0.0));
    }
}
