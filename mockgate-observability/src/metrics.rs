//! Prometheus-backed plugin metrics

use mockgate_common::{GatewayError, Result};
use mockgate_plugin::{ErrorCategory, MetricsCollector, Operation, PluginState};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

const STATES: [PluginState; 4] = [
    PluginState::Loaded,
    PluginState::Enabled,
    PluginState::Disabled,
    PluginState::Error,
];

fn observability(e: prometheus::Error) -> GatewayError {
    GatewayError::Observability(e.to_string())
}

/// [`MetricsCollector`] exporting to its own Prometheus registry
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    operations: IntCounterVec,
    latency: HistogramVec,
    state: IntGaugeVec,
    errors: IntCounterVec,
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Register the plugin metrics on an existing registry
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let operations = IntCounterVec::new(
            Opts::new(
                "mockgate_plugin_operations_total",
                "Plugin operations by outcome",
            ),
            &["plugin", "operation", "outcome"],
        )
        .map_err(observability)?;
        let latency = HistogramVec::new(
            HistogramOpts::new(
                "mockgate_plugin_operation_duration_seconds",
                "Plugin operation duration in seconds",
            ),
            &["plugin", "operation"],
        )
        .map_err(observability)?;
        let state = IntGaugeVec::new(
            Opts::new(
                "mockgate_plugin_state",
                "1 for the current state of each loaded plugin",
            ),
            &["plugin", "state"],
        )
        .map_err(observability)?;
        let errors = IntCounterVec::new(
            Opts::new("mockgate_plugin_errors_total", "Plugin errors by category"),
            &["plugin", "category"],
        )
        .map_err(observability)?;

        registry
            .register(Box::new(operations.clone()))
            .map_err(observability)?;
        registry
            .register(Box::new(latency.clone()))
            .map_err(observability)?;
        registry
            .register(Box::new(state.clone()))
            .map_err(observability)?;
        registry
            .register(Box::new(errors.clone()))
            .map_err(observability)?;

        Ok(Self {
            registry,
            operations,
            latency,
            state,
            errors,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(observability)?;
        String::from_utf8(buffer).map_err(|e| GatewayError::Observability(e.to_string()))
    }
}

impl MetricsCollector for PrometheusMetrics {
    fn record_operation(&self, plugin: &str, operation: Operation, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.operations
            .with_label_values(&[plugin, operation.as_str(), outcome])
            .inc();
    }

    fn record_latency(&self, plugin: &str, operation: Operation, latency: Duration) {
        self.latency
            .with_label_values(&[plugin, operation.as_str()])
            .observe(latency.as_secs_f64());
    }

    fn record_state(&self, plugin: &str, state: Option<PluginState>) {
        for candidate in STATES {
            let labels = [plugin, candidate.as_str()];
            match state {
                Some(current) => self
                    .state
                    .with_label_values(&labels)
                    .set(i64::from(current == candidate)),
                // Unloaded plugins drop out of the gauge entirely.
                None => {
                    let _ = self.state.remove_label_values(&labels);
                }
            }
        }
    }

    fn record_error(&self, plugin: &str, category: ErrorCategory) {
        self.errors
            .with_label_values(&[plugin, category.as_str()])
            .inc();
    }
}
