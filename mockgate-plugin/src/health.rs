//! Periodic health checking of enabled plugins

use crate::context::PluginContext;
use crate::entry::{PluginEntry, PluginState};
use crate::error::{panic_message, ErrorCategory, Operation};
use crate::metrics::MetricsCollector;
use crate::table::PluginTable;
use crate::traits::HealthStatus;
use mockgate_common::HealthCheckConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Background loop probing every enabled [`HealthChecker`](crate::HealthChecker)
pub struct HealthMonitor {
    table: Arc<PluginTable>,
    metrics: Arc<dyn MetricsCollector>,
    config: HealthCheckConfig,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    pub fn new(
        table: Arc<PluginTable>,
        metrics: Arc<dyn MetricsCollector>,
        config: HealthCheckConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            table,
            metrics,
            config,
            shutdown,
        }
    }

    /// Sweep every `interval` until the shutdown token fires.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(interval = ?self.config.interval, "Health monitor started");
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let spawned = self.sweep().len();
                    debug!(plugins = spawned, "Health sweep started");
                }
            }
        }
        info!("Health monitor stopped");
    }

    /// Spawn one independent check per enabled health checker.
    pub fn sweep(&self) -> Vec<(String, JoinHandle<Option<HealthStatus>>)> {
        self.table
            .enabled_health_checkers()
            .into_iter()
            .map(|entry| {
                let name = entry.name().to_string();
                let metrics = self.metrics.clone();
                let timeout = self.config.timeout;
                let shutdown = self.shutdown.clone();
                let handle = tokio::spawn(async move {
                    check_plugin(&entry, metrics.as_ref(), timeout, &shutdown).await
                });
                (name, handle)
            })
            .collect()
    }

    /// Run one sweep and wait for every result.
    pub async fn check_all(&self) -> Vec<(String, HealthStatus)> {
        let mut results = Vec::new();
        for (name, handle) in self.sweep() {
            match handle.await {
                Ok(Some(status)) => results.push((name, status)),
                Ok(None) => {}
                Err(e) => warn!(plugin = %name, "Health check task failed: {}", e),
            }
        }
        results
    }
}

/// Probe one plugin and store the result on its entry.
///
/// Returns `None` when the check was abandoned because of shutdown or the
/// instance no longer exposes a health checker.
pub async fn check_plugin(
    entry: &Arc<PluginEntry>,
    metrics: &dyn MetricsCollector,
    timeout: Duration,
    shutdown: &CancellationToken,
) -> Option<HealthStatus> {
    let name = entry.name();
    let ctx = PluginContext::new(name, timeout, shutdown);
    let started = Instant::now();

    // The probe runs in its own task so a panic stays inside its JoinHandle.
    let probe_entry = entry.clone();
    let probe_ctx = ctx.clone();
    let mut probe = tokio::spawn(async move {
        let plugin = probe_entry.instance().read().await;
        let checker = plugin.as_health_checker()?;
        let span = probe_ctx.span().clone();
        Some(checker.health_check(&probe_ctx).instrument(span).await)
    });

    let outcome = tokio::select! {
        biased;
        () = shutdown.cancelled() => {
            probe.abort();
            return None;
        }
        res = tokio::time::timeout(timeout, &mut probe) => res,
    };
    ctx.cancellation().cancel();
    let latency = started.elapsed();

    let (status, category) = match outcome {
        Ok(Ok(Some(status))) => {
            let category = (!status.healthy).then_some(ErrorCategory::Health);
            (status, category)
        }
        Ok(Ok(None)) => return None,
        Ok(Err(e)) if e.is_panic() => {
            let message = panic_message(&*e.into_panic());
            (
                HealthStatus::unhealthy(format!("health check panicked: {message}")),
                Some(ErrorCategory::Panic),
            )
        }
        Ok(Err(e)) => (
            HealthStatus::unhealthy(format!("health check aborted: {e}")),
            Some(ErrorCategory::Health),
        ),
        Err(_) => {
            probe.abort();
            (
                HealthStatus::unhealthy(format!("health check timed out after {timeout:?}")),
                Some(ErrorCategory::Timeout),
            )
        }
    };

    metrics.record_operation(name, Operation::HealthCheck, status.healthy);
    metrics.record_latency(name, Operation::HealthCheck, latency);
    if let Some(category) = category {
        metrics.record_error(name, category);
    }

    if entry.record_health(status.clone()) {
        metrics.record_state(name, Some(PluginState::Error));
        warn!(plugin = %name, message = %status.message, "Plugin unhealthy, moved to error state");
    } else if !status.healthy {
        debug!(plugin = %name, message = %status.message, "Unhealthy result for plugin not enabled");
    }
    Some(status)
}
