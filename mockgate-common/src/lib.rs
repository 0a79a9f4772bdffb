//! Common configuration, defaults, and error types for Mockgate

pub mod config;
pub mod constants;
pub mod error;

pub use config::{HealthCheckConfig, ManagerConfig, PluginConfig, PluginSpec};
pub use constants::{
    DEFAULT_HEALTH_CHECK_INTERVAL, DEFAULT_HEALTH_CHECK_TIMEOUT, DEFAULT_LIFECYCLE_TIMEOUT,
    INTERNAL_ERROR_BODY, INTERNAL_ERROR_STATUS,
};
pub use error::{GatewayError, Result};
