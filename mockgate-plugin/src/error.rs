//! Error types for the plugin core

use crate::entry::PluginState;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error type returned by plugin-authored code
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Operation attempted on a plugin, carried by errors and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Register,
    Unregister,
    Load,
    Init,
    Enable,
    Disable,
    Unload,
    Cleanup,
    Reload,
    HealthCheck,
    PreProcess,
    PostProcess,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Register => "register",
            Operation::Unregister => "unregister",
            Operation::Load => "load",
            Operation::Init => "init",
            Operation::Enable => "enable",
            Operation::Disable => "disable",
            Operation::Unload => "unload",
            Operation::Cleanup => "cleanup",
            Operation::Reload => "reload",
            Operation::HealthCheck => "health_check",
            Operation::PreProcess => "pre_process",
            Operation::PostProcess => "post_process",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse error classification used as a metrics label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Registry,
    Lifecycle,
    Dependency,
    Pipeline,
    Panic,
    Health,
    Timeout,
    Config,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Registry => "registry",
            ErrorCategory::Lifecycle => "lifecycle",
            ErrorCategory::Dependency => "dependency",
            ErrorCategory::Pipeline => "pipeline",
            ErrorCategory::Panic => "panic",
            ErrorCategory::Health => "health",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Config => "config",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for plugin registry, lifecycle, pipeline and health failures
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin factory already registered: {0}")]
    DuplicateFactory(String),

    #[error("No plugin factory registered for {0}")]
    FactoryNotFound(String),

    #[error("Plugin factory for {plugin} failed: {source}")]
    FactoryFailed {
        plugin: String,
        #[source]
        source: BoxError,
    },

    #[error("Plugin already loaded: {0}")]
    AlreadyLoaded(String),

    #[error("Plugin not loaded: {0}")]
    NotLoaded(String),

    #[error("Cannot {operation} plugin {plugin} while it is {state}")]
    InvalidTransition {
        plugin: String,
        operation: Operation,
        state: PluginState,
    },

    #[error("Plugin name mismatch: requested {expected}, instance reports {actual}")]
    NameMismatch { expected: String, actual: String },

    #[error("Plugin {plugin} depends on {dependency}, which is not registered")]
    UnresolvedDependency { plugin: String, dependency: String },

    #[error("Plugin {plugin} requires {dependency} to be enabled")]
    DependencyNotEnabled { plugin: String, dependency: String },

    #[error("Plugin {plugin} {operation} failed: {source}")]
    OperationFailed {
        plugin: String,
        operation: Operation,
        #[source]
        source: BoxError,
    },

    #[error("Plugin {plugin} {operation} timed out after {timeout:?}")]
    Timeout {
        plugin: String,
        operation: Operation,
        timeout: Duration,
    },

    #[error("Plugin {plugin} {operation} cancelled by shutdown")]
    Cancelled { plugin: String, operation: Operation },

    #[error("Plugin {plugin} panicked during {operation}: {message}")]
    Panic {
        plugin: String,
        operation: Operation,
        message: String,
    },

    #[error("Plugin {plugin} is unhealthy: {message}")]
    Unhealthy { plugin: String, message: String },

    #[error("Invalid configuration for plugin {plugin}: {}", .errors.join("; "))]
    InvalidConfig { plugin: String, errors: Vec<String> },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, PluginError>;

impl PluginError {
    /// Name of the plugin the error is about.
    pub fn plugin(&self) -> &str {
        match self {
            PluginError::DuplicateFactory(plugin)
            | PluginError::FactoryNotFound(plugin)
            | PluginError::AlreadyLoaded(plugin)
            | PluginError::NotLoaded(plugin) => plugin,
            PluginError::NameMismatch { expected, .. } => expected,
            PluginError::FactoryFailed { plugin, .. }
            | PluginError::InvalidTransition { plugin, .. }
            | PluginError::UnresolvedDependency { plugin, .. }
            | PluginError::DependencyNotEnabled { plugin, .. }
            | PluginError::OperationFailed { plugin, .. }
            | PluginError::Timeout { plugin, .. }
            | PluginError::Cancelled { plugin, .. }
            | PluginError::Panic { plugin, .. }
            | PluginError::Unhealthy { plugin, .. }
            | PluginError::InvalidConfig { plugin, .. } => plugin,
        }
    }

    /// Operation the error was raised by, when it is carried explicitly.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            PluginError::InvalidTransition { operation, .. }
            | PluginError::OperationFailed { operation, .. }
            | PluginError::Timeout { operation, .. }
            | PluginError::Cancelled { operation, .. }
            | PluginError::Panic { operation, .. } => Some(*operation),
            PluginError::Unhealthy { .. } => Some(Operation::HealthCheck),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            PluginError::DuplicateFactory(_)
            | PluginError::FactoryNotFound(_)
            | PluginError::FactoryFailed { .. } => ErrorCategory::Registry,
            PluginError::AlreadyLoaded(_)
            | PluginError::NotLoaded(_)
            | PluginError::InvalidTransition { .. }
            | PluginError::NameMismatch { .. }
            | PluginError::Cancelled { .. } => ErrorCategory::Lifecycle,
            PluginError::UnresolvedDependency { .. } | PluginError::DependencyNotEnabled { .. } => {
                ErrorCategory::Dependency
            }
            PluginError::OperationFailed { operation, .. } => match operation {
                Operation::PreProcess | Operation::PostProcess => ErrorCategory::Pipeline,
                Operation::HealthCheck => ErrorCategory::Health,
                _ => ErrorCategory::Lifecycle,
            },
            PluginError::Timeout { .. } => ErrorCategory::Timeout,
            PluginError::Panic { .. } => ErrorCategory::Panic,
            PluginError::Unhealthy { .. } => ErrorCategory::Health,
            PluginError::InvalidConfig { .. } => ErrorCategory::Config,
        }
    }
}

/// Render a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
