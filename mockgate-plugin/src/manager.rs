//! Plugin lifecycle manager
//!
//! # Example
//!
//! ```rust,no_run
//! use mockgate_plugin::{builtin, PluginManager};
//!
//! # async fn example() -> mockgate_plugin::Result<()> {
//! let manager = PluginManager::new();
//! builtin::register_builtins(manager.registry())?;
//!
//! manager.load_plugin("request-logger", Default::default()).await?;
//! manager.enable_plugin("request-logger")?;
//! manager.start();
//!
//! // ... serve traffic through manager.pipeline() ...
//!
//! let report = manager.shutdown().await;
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```

use crate::config::{prepare_config, ConfigSubstitutor, ConfigValidator};
use crate::context::PluginContext;
use crate::entry::{Capabilities, PluginEntry, PluginInfo, PluginMetrics, PluginState};
use crate::error::{panic_message, BoxError, Operation, PluginError, Result};
use crate::health::HealthMonitor;
use crate::metrics::{InMemoryMetrics, MetricsCollector};
use crate::pipeline::PipelineExecutor;
use crate::registry::PluginRegistry;
use crate::table::PluginTable;
use crate::traits::Plugin;
use mockgate_common::{ManagerConfig, PluginConfig, PluginSpec};
use serde::Serialize;
use std::collections::BTreeMap;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a successful unload
#[derive(Debug)]
pub enum UnloadOutcome {
    /// Cleanup finished without error
    Clean,
    /// The entry was removed but its cleanup reported an error
    CleanupFailed(PluginError),
}

impl UnloadOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, UnloadOutcome::Clean)
    }
}

/// Aggregated result of [`PluginManager::load_from_config`]
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub enabled: Vec<String>,
    pub failures: Vec<PluginError>,
}

impl LoadReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Aggregated result of [`PluginManager::shutdown`]
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub unloaded: Vec<String>,
    pub cleanup_failures: Vec<PluginError>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.cleanup_failures.is_empty()
    }
}

/// Totals returned by [`PluginManager::plugin_metrics`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManagerMetrics {
    pub total_plugins: usize,
    pub enabled_plugins: usize,
    pub total_requests: u64,
    pub total_errors: u64,
    pub per_plugin: BTreeMap<String, PluginMetrics>,
}

/// Owns the factory registry and the active-plugin table and drives the
/// plugin state machine.
pub struct PluginManager {
    config: ManagerConfig,
    registry: Arc<PluginRegistry>,
    table: Arc<PluginTable>,
    metrics: Arc<dyn MetricsCollector>,
    validator: Option<Arc<dyn ConfigValidator>>,
    substitutor: Option<Arc<dyn ConfigSubstitutor>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("plugins", &self.table.len())
            .finish_non_exhaustive()
    }
}

/// Builder for constructing a [`PluginManager`]
#[derive(Default)]
pub struct PluginManagerBuilder {
    config: ManagerConfig,
    registry: Option<Arc<PluginRegistry>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
    validator: Option<Arc<dyn ConfigValidator>>,
    substitutor: Option<Arc<dyn ConfigSubstitutor>>,
    shutdown: Option<CancellationToken>,
}

impl PluginManagerBuilder {
    #[must_use]
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn registry(mut self, registry: Arc<PluginRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn ConfigValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    #[must_use]
    pub fn substitutor(mut self, substitutor: Arc<dyn ConfigSubstitutor>) -> Self {
        self.substitutor = Some(substitutor);
        self
    }

    /// Share a process-wide shutdown signal instead of owning a fresh one
    #[must_use]
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub fn build(self) -> mockgate_common::Result<PluginManager> {
        self.config.validate()?;
        Ok(PluginManager {
            config: self.config,
            registry: self.registry.unwrap_or_default(),
            table: Arc::new(PluginTable::new()),
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(InMemoryMetrics::new())),
            validator: self.validator,
            substitutor: self.substitutor,
            shutdown: self.shutdown.unwrap_or_default(),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginManager {
    /// Manager with default configuration and an in-memory metrics sink
    pub fn new() -> Self {
        Self {
            config: ManagerConfig::default(),
            registry: Arc::new(PluginRegistry::new()),
            table: Arc::new(PluginTable::new()),
            metrics: Arc::new(InMemoryMetrics::new()),
            validator: None,
            substitutor: None,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn builder() -> PluginManagerBuilder {
        PluginManagerBuilder::default()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn table(&self) -> &Arc<PluginTable> {
        &self.table
    }

    pub fn metrics_collector(&self) -> &Arc<dyn MetricsCollector> {
        &self.metrics
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Executor running requests through the currently enabled middlewares
    pub fn pipeline(&self) -> PipelineExecutor {
        PipelineExecutor::new(self.table.clone(), self.metrics.clone())
    }

    /// Spawn background tasks. Returns false when health checking is disabled.
    pub fn start(&self) -> bool {
        if !self.config.health_check.enabled {
            info!("Plugin health checks disabled");
            return false;
        }

        let monitor = HealthMonitor::new(
            self.table.clone(),
            self.metrics.clone(),
            self.config.health_check.clone(),
            self.shutdown.clone(),
        );
        let handle = tokio::spawn(monitor.run());
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        true
    }

    pub fn register_plugin<F>(&self, name: &str, factory: F) -> Result<()>
    where
        F: Fn() -> std::result::Result<Box<dyn Plugin>, BoxError> + Send + Sync + 'static,
    {
        let result = self.registry.register(name, factory);
        self.observe(name, Operation::Register, &result);
        result
    }

    pub fn unregister_plugin(&self, name: &str) -> Result<()> {
        let result = self.registry.unregister(name);
        self.observe(name, Operation::Unregister, &result);
        result
    }

    /// Instantiate, initialize and insert a plugin in state `loaded`.
    pub async fn load_plugin(&self, name: &str, config: PluginConfig) -> Result<()> {
        let result = self.load_inner(name, config).await;
        self.observe(name, Operation::Load, &result);
        result
    }

    async fn load_inner(&self, name: &str, config: PluginConfig) -> Result<()> {
        if self.table.contains(name) {
            return Err(PluginError::AlreadyLoaded(name.to_string()));
        }

        let mut instance = self.registry.create(name)?;
        if instance.name() != name {
            return Err(PluginError::NameMismatch {
                expected: name.to_string(),
                actual: instance.name().to_string(),
            });
        }

        let ctx = self.context(name, &self.shutdown);
        let started = Instant::now();
        let init = self
            .bounded(&ctx, Operation::Init, instance.init(&ctx, &config))
            .await;
        self.metrics
            .record_latency(name, Operation::Init, started.elapsed());
        init?;

        let capabilities = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            Capabilities::detect(&*instance)
        })) {
            Ok(capabilities) => capabilities,
            Err(payload) => {
                let err = PluginError::Panic {
                    plugin: name.to_string(),
                    operation: Operation::Load,
                    message: panic_message(&*payload),
                };
                self.cleanup_instance(name, &mut instance).await;
                return Err(err);
            }
        };
        if let Some(missing) = capabilities
            .dependencies
            .iter()
            .find(|dependency| !self.registry.contains(dependency))
        {
            let err = PluginError::UnresolvedDependency {
                plugin: name.to_string(),
                dependency: missing.clone(),
            };
            self.cleanup_instance(name, &mut instance).await;
            return Err(err);
        }

        let entry = Arc::new(PluginEntry::new(
            instance,
            self.table.next_sequence(),
            config,
            capabilities,
        ));
        if let Err(err) = self.table.insert(entry.clone()) {
            // A concurrent load of the same name won the insert.
            let ctx = self.context(name, &self.shutdown);
            if let Err(cleanup) = self.cleanup_entry(&entry, &ctx).await {
                warn!(plugin = %name, error = %cleanup, "Cleanup of duplicate instance failed");
            }
            return Err(err);
        }

        self.metrics.record_state(name, Some(PluginState::Loaded));
        info!(
            plugin = %name,
            version = %entry.version(),
            priority = ?entry.priority(),
            "Plugin loaded"
        );
        Ok(())
    }

    /// `loaded`/`disabled` -> `enabled`, once every dependency is enabled.
    pub fn enable_plugin(&self, name: &str) -> Result<()> {
        let result = self.enable_inner(name);
        self.observe(name, Operation::Enable, &result);
        result
    }

    fn enable_inner(&self, name: &str) -> Result<()> {
        let entry = self.entry(name)?;
        if entry.state() == PluginState::Enabled {
            return Ok(());
        }

        for dependency in entry.dependencies() {
            let enabled = self
                .table
                .get(&dependency)
                .is_some_and(|dep| dep.state() == PluginState::Enabled);
            if !enabled {
                return Err(PluginError::DependencyNotEnabled {
                    plugin: name.to_string(),
                    dependency,
                });
            }
        }

        let previous = entry.transition(
            Operation::Enable,
            &[PluginState::Loaded, PluginState::Disabled],
            PluginState::Enabled,
        )?;
        if previous != PluginState::Enabled {
            self.metrics.record_state(name, Some(PluginState::Enabled));
            info!(plugin = %name, "Plugin enabled");
        }
        Ok(())
    }

    /// Any state -> `disabled`.
    pub fn disable_plugin(&self, name: &str) -> Result<()> {
        let result = self.disable_inner(name);
        self.observe(name, Operation::Disable, &result);
        result
    }

    fn disable_inner(&self, name: &str) -> Result<()> {
        let entry = self.entry(name)?;
        let previous = entry.transition(
            Operation::Disable,
            &[
                PluginState::Loaded,
                PluginState::Enabled,
                PluginState::Error,
            ],
            PluginState::Disabled,
        )?;
        if previous == PluginState::Disabled {
            return Ok(());
        }

        self.metrics.record_state(name, Some(PluginState::Disabled));
        let dependents = self.enabled_dependents(name);
        if dependents.is_empty() {
            info!(plugin = %name, "Plugin disabled");
        } else {
            warn!(plugin = %name, ?dependents, "Plugin disabled while enabled plugins depend on it");
        }
        Ok(())
    }

    /// Remove the entry, then run its cleanup.
    ///
    /// A cleanup failure does not fail the unload; it is returned as
    /// [`UnloadOutcome::CleanupFailed`].
    pub async fn unload_plugin(&self, name: &str) -> Result<UnloadOutcome> {
        let result = self.unload_inner(name, &self.shutdown).await;
        self.observe(name, Operation::Unload, &result);
        result
    }

    async fn unload_inner(&self, name: &str, parent: &CancellationToken) -> Result<UnloadOutcome> {
        let entry = self
            .table
            .remove(name)
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))?;
        self.metrics.record_state(name, None);

        let ctx = self.context(name, parent);
        match self.cleanup_entry(&entry, &ctx).await {
            Ok(()) => {
                info!(plugin = %name, "Plugin unloaded");
                Ok(UnloadOutcome::Clean)
            }
            Err(err) => {
                warn!(plugin = %name, error = %err, "Plugin unloaded, cleanup failed");
                self.metrics.record_error(name, err.category());
                Ok(UnloadOutcome::CleanupFailed(err))
            }
        }
    }

    /// Apply a new configuration, in place when the plugin supports it.
    pub async fn reload_plugin(&self, name: &str, config: PluginConfig) -> Result<()> {
        let result = self.reload_inner(name, config).await;
        self.observe(name, Operation::Reload, &result);
        result
    }

    async fn reload_inner(&self, name: &str, config: PluginConfig) -> Result<()> {
        let entry = self.entry(name)?;
        let config = prepare_config(name, &config, None, self.validator.as_deref())?;

        let ctx = self.context(name, &self.shutdown);
        let started = Instant::now();
        let hot = self
            .bounded(&ctx, Operation::Reload, hot_reload(&entry, &ctx, &config))
            .await;

        match hot {
            Ok(Some(capabilities)) => {
                self.metrics
                    .record_latency(name, Operation::Reload, started.elapsed());
                entry.apply_reload(config, capabilities);
                info!(plugin = %name, "Plugin hot-reloaded");
                Ok(())
            }
            Ok(None) => {
                debug!(plugin = %name, "Plugin cannot hot-reload, recreating it");
                self.recreate(&entry, config).await
            }
            Err(err) => {
                entry.set_last_error(err.to_string());
                Err(err)
            }
        }
    }

    /// Disable -> Unload -> Load -> Enable (if it was enabled before).
    async fn recreate(&self, entry: &PluginEntry, config: PluginConfig) -> Result<()> {
        let name = entry.name();
        let was_enabled = entry.state() == PluginState::Enabled;

        // Refuse before tearing anything down if the plugin could not be
        // enabled again afterwards.
        if was_enabled {
            for dependency in entry.dependencies() {
                let enabled = self
                    .table
                    .get(&dependency)
                    .is_some_and(|dep| dep.state() == PluginState::Enabled);
                if !enabled {
                    return Err(PluginError::DependencyNotEnabled {
                        plugin: name.to_string(),
                        dependency,
                    });
                }
            }
        }

        self.disable_plugin(name)?;
        if let UnloadOutcome::CleanupFailed(err) = self.unload_plugin(name).await? {
            warn!(plugin = %name, error = %err, "Continuing reload after failed cleanup");
        }
        self.load_plugin(name, config).await?;

        if was_enabled {
            if let Err(err) = self.enable_plugin(name) {
                if let Some(entry) = self.table.get(name) {
                    entry.set_last_error(err.to_string());
                }
                return Err(err);
            }
        }
        info!(plugin = %name, "Plugin reloaded");
        Ok(())
    }

    /// Every entry, ordered by name
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.table.snapshot().iter().map(|e| e.info()).collect()
    }

    pub fn plugin_info(&self, name: &str) -> Option<PluginInfo> {
        self.table.get(name).map(|e| e.info())
    }

    pub fn plugin_state(&self, name: &str) -> Option<PluginState> {
        self.table.get(name).map(|e| e.state())
    }

    pub fn plugin_metrics(&self) -> ManagerMetrics {
        let mut totals = ManagerMetrics::default();
        for entry in self.table.snapshot() {
            let metrics = entry.metrics();
            totals.total_plugins += 1;
            if entry.state() == PluginState::Enabled {
                totals.enabled_plugins += 1;
            }
            totals.total_requests += metrics.requests_processed;
            totals.total_errors += metrics.error_count;
            totals.per_plugin.insert(entry.name().to_string(), metrics);
        }
        totals
    }

    /// Load every spec, then enable those marked enabled.
    ///
    /// Enabling is retried in passes so specs may list a plugin before its
    /// dependencies. All failures are collected; none stops the others.
    pub async fn load_from_config(&self, specs: &[PluginSpec]) -> LoadReport {
        let mut report = LoadReport::default();
        let mut to_enable = Vec::new();

        for spec in specs {
            let prepared = prepare_config(
                &spec.name,
                &spec.config,
                self.substitutor.as_deref(),
                self.validator.as_deref(),
            );
            let loaded = match prepared {
                Ok(config) => self.load_plugin(&spec.name, config).await,
                Err(err) => {
                    self.observe(&spec.name, Operation::Load, &Err::<(), _>(&err));
                    Err(err)
                }
            };
            match loaded {
                Ok(()) => {
                    report.loaded.push(spec.name.clone());
                    if spec.enabled {
                        to_enable.push(spec.name.as_str());
                    }
                }
                Err(err) => report.failures.push(err),
            }
        }

        // Each pass must enable at least one plugin, otherwise the remaining
        // failures are final.
        loop {
            let mut pending = Vec::new();
            let mut errors = Vec::new();
            let attempted = to_enable.len();
            for name in to_enable.drain(..) {
                match self.enable_inner(name) {
                    Ok(()) => {
                        self.observe(name, Operation::Enable, &Ok::<(), PluginError>(()));
                        report.enabled.push(name.to_string());
                    }
                    Err(err) => {
                        pending.push(name);
                        errors.push(err);
                    }
                }
            }
            if errors.is_empty() || pending.len() == attempted {
                for err in &errors {
                    self.observe(err.plugin(), Operation::Enable, &Err::<(), _>(err));
                }
                report.failures.extend(errors);
                break;
            }
            to_enable = pending;
        }

        if report.is_success() {
            info!(loaded = report.loaded.len(), enabled = report.enabled.len(), "Plugins loaded from config");
        } else {
            warn!(
                loaded = report.loaded.len(),
                failed = report.failures.len(),
                "Some plugins failed to load from config"
            );
        }
        report
    }

    /// Cancel background work and pending operations, then unload everything
    /// in reverse load order.
    pub async fn shutdown(&self) -> ShutdownReport {
        info!("Shutting down plugin manager");
        self.shutdown.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        let mut entries = self.table.snapshot();
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.sequence()));

        // Cleanup still has to run after the shutdown signal fired.
        let teardown = CancellationToken::new();
        let mut report = ShutdownReport::default();
        for entry in entries {
            let name = entry.name();
            match self.unload_inner(name, &teardown).await {
                Ok(UnloadOutcome::Clean) => report.unloaded.push(name.to_string()),
                Ok(UnloadOutcome::CleanupFailed(err)) => {
                    report.unloaded.push(name.to_string());
                    report.cleanup_failures.push(err);
                }
                Err(PluginError::NotLoaded(_)) => {}
                Err(err) => report.cleanup_failures.push(err),
            }
        }

        info!(
            unloaded = report.unloaded.len(),
            failures = report.cleanup_failures.len(),
            "Plugin manager stopped"
        );
        report
    }

    fn entry(&self, name: &str) -> Result<Arc<PluginEntry>> {
        self.table
            .get(name)
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))
    }

    fn enabled_dependents(&self, name: &str) -> Vec<String> {
        self.table
            .snapshot()
            .into_iter()
            .filter(|e| e.state() == PluginState::Enabled && e.dependencies().iter().any(|d| d == name))
            .map(|e| e.name().to_string())
            .collect()
    }

    fn context(&self, name: &str, parent: &CancellationToken) -> PluginContext {
        PluginContext::new(name, self.config.lifecycle_timeout, parent)
    }

    /// Run a plugin call under the context's deadline and cancellation.
    /// A panic inside the call becomes [`PluginError::Panic`].
    async fn bounded<T, F>(&self, ctx: &PluginContext, operation: Operation, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, BoxError>>,
    {
        let timeout = ctx.remaining();
        let result = tokio::select! {
            biased;
            () = ctx.cancellation().cancelled() => Err(PluginError::Cancelled {
                plugin: ctx.plugin_name().to_string(),
                operation,
            }),
            outcome = tokio::time::timeout(timeout, AssertUnwindSafe(call).catch_unwind()) => match outcome {
                Ok(Ok(Ok(value))) => Ok(value),
                Ok(Ok(Err(source))) => Err(PluginError::OperationFailed {
                    plugin: ctx.plugin_name().to_string(),
                    operation,
                    source,
                }),
                Ok(Err(payload)) => Err(PluginError::Panic {
                    plugin: ctx.plugin_name().to_string(),
                    operation,
                    message: panic_message(&*payload),
                }),
                Err(_) => Err(PluginError::Timeout {
                    plugin: ctx.plugin_name().to_string(),
                    operation,
                    timeout,
                }),
            },
        };
        ctx.cancellation().cancel();
        result
    }

    async fn cleanup_entry(&self, entry: &PluginEntry, ctx: &PluginContext) -> Result<()> {
        let started = Instant::now();
        let result = self
            .bounded(ctx, Operation::Cleanup, async {
                let mut plugin = entry.instance().write().await;
                plugin.cleanup(ctx).await
            })
            .await;
        self.record_cleanup(entry.name(), started.elapsed(), result.is_ok());
        result
    }

    async fn cleanup_instance(&self, name: &str, instance: &mut Box<dyn Plugin>) {
        let ctx = self.context(name, &self.shutdown);
        let started = Instant::now();
        let result = self
            .bounded(&ctx, Operation::Cleanup, instance.cleanup(&ctx))
            .await;
        self.record_cleanup(name, started.elapsed(), result.is_ok());
        if let Err(err) = result {
            warn!(plugin = %name, error = %err, "Cleanup of rejected instance failed");
        }
    }

    fn record_cleanup(&self, name: &str, latency: Duration, success: bool) {
        self.metrics
            .record_operation(name, Operation::Cleanup, success);
        self.metrics.record_latency(name, Operation::Cleanup, latency);
    }

    /// Mirror an administrative outcome into the metrics sink.
    fn observe<T, E: std::borrow::Borrow<PluginError>>(
        &self,
        name: &str,
        operation: Operation,
        result: &std::result::Result<T, E>,
    ) {
        self.metrics
            .record_operation(name, operation, result.is_ok());
        if let Err(err) = result {
            let err = err.borrow();
            self.metrics.record_error(name, err.category());
            debug!(plugin = %name, %operation, error = %err, "Plugin operation failed");
        }
    }
}

/// Reload in place. `Ok(None)` means the instance cannot hot-reload.
async fn hot_reload(
    entry: &PluginEntry,
    ctx: &PluginContext,
    config: &PluginConfig,
) -> std::result::Result<Option<Capabilities>, BoxError> {
    let mut plugin = entry.instance().write().await;
    let Some(reloadable) = plugin.as_hot_reloadable() else {
        return Ok(None);
    };
    if !reloadable.can_reload() {
        return Ok(None);
    }
    reloadable.reload(ctx, config).await?;
    Ok(Some(Capabilities::detect(&**plugin)))
}
