//! Metrics sink contract and the default in-memory aggregator

use crate::entry::PluginState;
use crate::error::{ErrorCategory, Operation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Receives plugin outcomes from the manager, pipeline and health monitor.
///
/// Implementations must be cheap: calls happen on the request path.
pub trait MetricsCollector: Send + Sync {
    fn record_operation(&self, plugin: &str, operation: Operation, success: bool);

    fn record_latency(&self, plugin: &str, operation: Operation, latency: Duration);

    /// `None` once the plugin has been unloaded
    fn record_state(&self, plugin: &str, state: Option<PluginState>);

    fn record_error(&self, plugin: &str, category: ErrorCategory);
}

/// Counters for one operation of one plugin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub successes: u64,
    pub failures: u64,
    pub samples: u64,
    pub total_latency: Duration,
    pub max_latency: Duration,
}

impl OperationStats {
    pub fn average_latency(&self) -> Duration {
        if self.samples == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((self.total_latency.as_nanos() / u128::from(self.samples)) as u64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectedStats {
    pub operations: HashMap<Operation, OperationStats>,
    pub state: Option<PluginState>,
    pub state_changes: u64,
    pub errors: HashMap<ErrorCategory, u64>,
}

impl CollectedStats {
    pub fn operation(&self, operation: Operation) -> OperationStats {
        self.operations.get(&operation).cloned().unwrap_or_default()
    }

    pub fn errors(&self, category: ErrorCategory) -> u64 {
        self.errors.get(&category).copied().unwrap_or(0)
    }
}

/// Default collector keeping everything in process memory
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    plugins: Mutex<HashMap<String, CollectedStats>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, plugin: &str, apply: impl FnOnce(&mut CollectedStats)) {
        let mut plugins = self.plugins.lock().unwrap_or_else(PoisonError::into_inner);
        apply(plugins.entry(plugin.to_string()).or_default());
    }

    pub fn plugin(&self, plugin: &str) -> Option<CollectedStats> {
        self.plugins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(plugin)
            .cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, CollectedStats> {
        self.plugins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MetricsCollector for InMemoryMetrics {
    fn record_operation(&self, plugin: &str, operation: Operation, success: bool) {
        self.update(plugin, |stats| {
            let op = stats.operations.entry(operation).or_default();
            if success {
                op.successes += 1;
            } else {
                op.failures += 1;
            }
        });
    }

    fn record_latency(&self, plugin: &str, operation: Operation, latency: Duration) {
        self.update(plugin, |stats| {
            let op = stats.operations.entry(operation).or_default();
            op.samples += 1;
            op.total_latency += latency;
            op.max_latency = op.max_latency.max(latency);
        });
    }

    fn record_state(&self, plugin: &str, state: Option<PluginState>) {
        self.update(plugin, |stats| {
            if stats.state != state {
                stats.state = state;
                stats.state_changes += 1;
            }
        });
    }

    fn record_error(&self, plugin: &str, category: ErrorCategory) {
        self.update(plugin, |stats| {
            *stats.errors.entry(category).or_default() += 1;
        });
    }
}
