//! Logging, tracing export and Prometheus metrics for Mockgate
//!
//! The plugin core only depends on the `MetricsCollector` trait; this crate
//! provides the Prometheus implementation and the subscriber setup.

pub mod metrics;
pub mod tracing;

pub use metrics::PrometheusMetrics;
pub use tracing::{init_tracing, shutdown_tracing, TracingConfig};

use std::sync::Arc;
use tracing_subscriber::util::TryInitError;

/// Install the subscriber and, when asked, build a Prometheus sink to hand to
/// `PluginManagerBuilder::metrics`.
///
/// A subscriber installed earlier wins; the OTLP exporter is only wired when
/// `otlp_endpoint` is set.
pub fn init_observability(
    config: TracingConfig,
    enable_metrics: bool,
) -> anyhow::Result<Option<Arc<PrometheusMetrics>>> {
    if let Err(e) = init_tracing(config) {
        if e.downcast_ref::<TryInitError>().is_none() {
            return Err(e);
        }
        ::tracing::debug!("Keeping the already installed subscriber");
    }

    if !enable_metrics {
        return Ok(None);
    }
    let metrics = PrometheusMetrics::new()?;
    Ok(Some(Arc::new(metrics)))
}
