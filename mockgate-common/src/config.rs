//! Configuration types for the Mockgate plugin manager

use crate::constants::{
    DEFAULT_HEALTH_CHECK_INTERVAL, DEFAULT_HEALTH_CHECK_TIMEOUT, DEFAULT_LIFECYCLE_TIMEOUT,
};
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration map handed to a plugin on load and reload.
pub type PluginConfig = serde_json::Map<String, serde_json::Value>;

/// Background health checking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Run the periodic health loop at all
    pub enabled: bool,
    /// Time between two sweeps (default: 30s)
    pub interval: Duration,
    /// Upper bound for one plugin's check (default: 10s)
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
        }
    }
}

/// Plugin manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Upper bound for `init`, `cleanup` and `reload` calls (default: 30s)
    pub lifecycle_timeout: Duration,
    /// Health check loop settings
    pub health_check: HealthCheckConfig,
}

impl ManagerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.lifecycle_timeout.is_zero() {
            return Err(GatewayError::Config(
                "lifecycle_timeout must be greater than zero".into(),
            ));
        }
        if self.health_check.enabled {
            if self.health_check.interval.is_zero() {
                return Err(GatewayError::Config(
                    "health_check.interval must be greater than zero".into(),
                ));
            }
            if self.health_check.timeout.is_zero() {
                return Err(GatewayError::Config(
                    "health_check.timeout must be greater than zero".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            lifecycle_timeout: DEFAULT_LIFECYCLE_TIMEOUT,
            health_check: HealthCheckConfig::default(),
        }
    }
}

/// One plugin entry of a bulk configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PluginSpec {
    /// Registered factory name
    pub name: String,
    /// Enable right after a successful load
    #[serde(default)]
    pub enabled: bool,
    /// Plugin specific settings
    #[serde(default)]
    pub config: PluginConfig,
}

impl PluginSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: PluginConfig) -> Self {
        self.config = config;
        self
    }
}
