//! Runtime record of one loaded plugin instance

use crate::error::{Operation, PluginError, Result};
use crate::traits::{HealthStatus, Plugin};
use chrono::{DateTime, Utc};
use mockgate_common::PluginConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Shared handle to a plugin instance.
///
/// Request-path and health calls take the read side; `init`, `cleanup` and
/// `reload` take the write side.
pub type PluginHandle = Arc<tokio::sync::RwLock<Box<dyn Plugin>>>;

/// Stored lifecycle state. An unloaded plugin has no entry at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Loaded,
    Enabled,
    Disabled,
    Error,
}

impl PluginState {
    pub fn as_str(self) -> &'static str {
        match self {
            PluginState::Loaded => "loaded",
            PluginState::Enabled => "enabled",
            PluginState::Disabled => "disabled",
            PluginState::Error => "error",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-plugin invocation statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginMetrics {
    pub requests_processed: u64,
    pub error_count: u64,
    pub total_latency: Duration,
    pub average_latency: Duration,
    pub last_used: Option<DateTime<Utc>>,
}

impl PluginMetrics {
    pub(crate) fn record(&mut self, latency: Duration, failed: bool) {
        self.requests_processed += 1;
        if failed {
            self.error_count += 1;
        }
        self.total_latency += latency;
        self.average_latency = Duration::from_nanos(
            (self.total_latency.as_nanos() / u128::from(self.requests_processed)) as u64,
        );
        self.last_used = Some(Utc::now());
    }
}

/// Snapshot of an entry returned by `PluginManager::list_plugins`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub state: PluginState,
    pub config: PluginConfig,
    pub loaded_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub metrics: PluginMetrics,
    pub health: Option<HealthStatus>,
    pub dependencies: Vec<String>,
    pub priority: Option<i32>,
}

#[derive(Debug)]
struct EntryFields {
    state: PluginState,
    config: PluginConfig,
    loaded_at: DateTime<Utc>,
    last_error: Option<String>,
    metrics: PluginMetrics,
    health: Option<HealthStatus>,
    dependencies: Vec<String>,
    priority: Option<i32>,
    health_checker: bool,
}

/// Capabilities detected on an instance when it is loaded or reloaded
#[derive(Debug, Clone, Default)]
pub(crate) struct Capabilities {
    pub priority: Option<i32>,
    pub health_checker: bool,
    pub dependencies: Vec<String>,
}

impl Capabilities {
    pub(crate) fn detect(plugin: &dyn Plugin) -> Self {
        Self {
            priority: plugin.as_middleware().map(|m| m.priority()),
            health_checker: plugin.as_health_checker().is_some(),
            dependencies: plugin
                .as_dependency_aware()
                .map(|d| d.dependencies())
                .unwrap_or_default(),
        }
    }
}

/// Owns exactly one plugin instance plus its lifecycle state and telemetry
pub struct PluginEntry {
    name: String,
    version: String,
    description: String,
    sequence: u64,
    instance: PluginHandle,
    fields: RwLock<EntryFields>,
}

impl fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginEntry")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("sequence", &self.sequence)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PluginEntry {
    pub(crate) fn new(
        instance: Box<dyn Plugin>,
        sequence: u64,
        config: PluginConfig,
        capabilities: Capabilities,
    ) -> Self {
        let name = instance.name().to_string();
        let version = instance.version().to_string();
        let description = instance.description().to_string();
        Self {
            name,
            version,
            description,
            sequence,
            instance: Arc::new(tokio::sync::RwLock::new(instance)),
            fields: RwLock::new(EntryFields {
                state: PluginState::Loaded,
                config,
                loaded_at: Utc::now(),
                last_error: None,
                metrics: PluginMetrics::default(),
                health: None,
                dependencies: capabilities.dependencies,
                priority: capabilities.priority,
                health_checker: capabilities.health_checker,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, EntryFields> {
        self.fields.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntryFields> {
        self.fields.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Load order; breaks priority ties in the pipeline
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn instance(&self) -> &PluginHandle {
        &self.instance
    }

    pub fn state(&self) -> PluginState {
        self.read().state
    }

    pub fn config(&self) -> PluginConfig {
        self.read().config.clone()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.read().loaded_at
    }

    pub fn last_error(&self) -> Option<String> {
        self.read().last_error.clone()
    }

    pub fn metrics(&self) -> PluginMetrics {
        self.read().metrics.clone()
    }

    pub fn health(&self) -> Option<HealthStatus> {
        self.read().health.clone()
    }

    pub fn dependencies(&self) -> Vec<String> {
        self.read().dependencies.clone()
    }

    /// Middleware priority, `None` when the instance is not a middleware
    pub fn priority(&self) -> Option<i32> {
        self.read().priority
    }

    pub fn is_health_checker(&self) -> bool {
        self.read().health_checker
    }

    pub fn info(&self) -> PluginInfo {
        let fields = self.read();
        PluginInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            state: fields.state,
            config: fields.config.clone(),
            loaded_at: fields.loaded_at,
            last_error: fields.last_error.clone(),
            metrics: fields.metrics.clone(),
            health: fields.health.clone(),
            dependencies: fields.dependencies.clone(),
            priority: fields.priority,
        }
    }

    /// Check-and-set the state under one lock acquisition.
    ///
    /// Returns the previous state. Staying in `to` is always allowed.
    pub(crate) fn transition(
        &self,
        operation: Operation,
        from: &[PluginState],
        to: PluginState,
    ) -> Result<PluginState> {
        let mut fields = self.write();
        let current = fields.state;
        if current != to && !from.contains(&current) {
            return Err(PluginError::InvalidTransition {
                plugin: self.name.clone(),
                operation,
                state: current,
            });
        }
        fields.state = to;
        if to == PluginState::Enabled {
            fields.last_error = None;
        }
        Ok(current)
    }

    pub(crate) fn set_last_error(&self, message: impl Into<String>) {
        self.write().last_error = Some(message.into());
    }

    pub(crate) fn apply_reload(&self, config: PluginConfig, capabilities: Capabilities) {
        let mut fields = self.write();
        fields.config = config;
        fields.priority = capabilities.priority;
        fields.health_checker = capabilities.health_checker;
        fields.dependencies = capabilities.dependencies;
    }

    /// Account one pre/post-process call.
    pub(crate) fn record_invocation(&self, latency: Duration, error: Option<&str>) {
        let mut fields = self.write();
        fields.metrics.record(latency, error.is_some());
        if let Some(message) = error {
            fields.last_error = Some(message.to_string());
        }
    }

    /// Store a health result. Returns true when it moved the entry to `error`.
    pub(crate) fn record_health(&self, status: HealthStatus) -> bool {
        let mut fields = self.write();
        let healthy = status.healthy;
        if !healthy {
            fields.last_error = Some(status.message.clone());
        }
        fields.health = Some(status);

        if !healthy && fields.state == PluginState::Enabled {
            fields.state = PluginState::Error;
            return true;
        }
        false
    }
}
