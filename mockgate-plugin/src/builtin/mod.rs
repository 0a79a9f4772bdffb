//! Reference plugins shipped with the gateway

pub mod auth;
pub mod cors;
pub mod logger;
pub mod rate_limit;

pub use auth::{ApiKeyAuthConfig, ApiKeyAuthPlugin};
pub use cors::{CorsConfig, CorsPlugin};
pub use logger::{RequestLoggerConfig, RequestLoggerPlugin};
pub use rate_limit::{RateLimitConfig, RateLimitPlugin};

use crate::error::{BoxError, Result};
use crate::registry::PluginRegistry;
use crate::traits::Plugin;
use mockgate_common::PluginConfig;
use serde::de::DeserializeOwned;

/// Register a factory for every builtin plugin.
pub fn register_builtins(registry: &PluginRegistry) -> Result<()> {
    registry.register(auth::NAME, || {
        Ok(Box::new(ApiKeyAuthPlugin::default()) as Box<dyn Plugin>)
    })?;
    registry.register(cors::NAME, || Ok(Box::new(CorsPlugin::default()) as Box<dyn Plugin>))?;
    registry.register(logger::NAME, || {
        Ok(Box::new(RequestLoggerPlugin::default()) as Box<dyn Plugin>)
    })?;
    registry.register(rate_limit::NAME, || {
        Ok(Box::new(RateLimitPlugin::default()) as Box<dyn Plugin>)
    })?;
    Ok(())
}

/// Deserialize a plugin's typed settings from its configuration map.
pub(crate) fn parse_config<T: DeserializeOwned>(config: &PluginConfig) -> std::result::Result<T, BoxError> {
    Ok(serde_json::from_value(serde_json::Value::Object(config.clone()))?)
}
