//! Prometheus metrics for the reconciliation pipeline

use prometheus::{IntCounter, Registry};

/// Counters updated by one reconciler
pub struct PipelineMetrics {
    pub pages_fetched: IntCounter,
    pub request_retries: IntCounter,
    pub unmatched_dimensions: IntCounter,
    pub line_items_emitted: IntCounter,
    pub window_errors: IntCounter,
}

impl PipelineMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            pages_fetched: IntCounter::new(
                "costline_usage_pages_fetched_total",
                "Usage pages fetched from the provider",
            )?,
            request_retries: IntCounter::new(
                "costline_provider_retries_total",
                "Provider requests retried after a transient failure",
            )?,
            unmatched_dimensions: IntCounter::new(
                "costline_unmatched_dimensions_total",
                "Usage dimensions with no catalog price",
            )?,
            line_items_emitted: IntCounter::new(
                "costline_line_items_total",
                "Cost line items returned to the host",
            )?,
            window_errors: IntCounter::new(
                "costline_window_errors_total",
                "Error strings attached to window responses",
            )?,
        })
    }

    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.pages_fetched.clone()))?;
        registry.register(Box::new(self.request_retries.clone()))?;
        registry.register(Box::new(self.unmatched_dimensions.clone()))?;
        registry.register(Box::new(self.line_items_emitted.clone()))?;
        registry.register(Box::new(self.window_errors.clone()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_exposes_counters() {
        let registry = Registry::new();
        let metrics = PipelineMetrics::new().unwrap();
        metrics.register(&registry).unwrap();

        metrics.pages_fetched.inc_by(3);
        let families = registry.gather();
        let pages = families
            .iter()
            .find(|f| f.get_name() == "costline_usage_pages_fetched_total")
            .unwrap();
        assert_eq!(pages.get_metric()[0].get_counter().get_value(), 3.0);
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        let metrics = PipelineMetrics::new().unwrap();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }
}
