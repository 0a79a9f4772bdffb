//! API key authentication plugin

use super::parse_config;
use crate::context::{HttpRequest, PluginContext, RequestContext};
use crate::error::BoxError;
use crate::traits::{HotReloadable, Middleware, Plugin, PluginAction};
use async_trait::async_trait;
use mockgate_common::PluginConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

pub const NAME: &str = "api-key-auth";

/// Shared-store key holding the authenticated caller
pub const IDENTITY_KEY: &str = "identity";

/// Settings for [`ApiKeyAuthPlugin`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeyAuthConfig {
    /// API key -> caller identity
    pub keys: HashMap<String, String>,
    /// Header carrying the key
    pub header: String,
    /// Path prefixes served without a key
    pub public_paths: Vec<String>,
}

impl Default for ApiKeyAuthConfig {
    fn default() -> Self {
        Self {
            keys: HashMap::new(),
            header: "x-api-key".to_string(),
            public_paths: Vec::new(),
        }
    }
}

impl ApiKeyAuthConfig {
    fn validate(&self) -> Result<(), BoxError> {
        if self.keys.is_empty() {
            return Err("at least one API key is required".into());
        }
        http::HeaderName::try_from(self.header.as_str())
            .map_err(|e| format!("invalid header name {:?}: {}", self.header, e))?;
        Ok(())
    }
}

/// Rejects requests without a known API key and publishes the caller identity
#[derive(Debug, Default)]
pub struct ApiKeyAuthPlugin {
    config: ApiKeyAuthConfig,
}

impl ApiKeyAuthPlugin {
    pub fn new(config: ApiKeyAuthConfig) -> Self {
        Self { config }
    }

    fn is_public(&self, path: &str) -> bool {
        self.config
            .public_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    fn apply(&mut self, config: &PluginConfig) -> Result<(), BoxError> {
        let parsed: ApiKeyAuthConfig = parse_config(config)?;
        parsed.validate()?;
        self.config = parsed;
        Ok(())
    }
}

fn is_preflight(req: &HttpRequest) -> bool {
    req.method() == http::Method::OPTIONS
        && req
            .headers()
            .contains_key(http::header::ACCESS_CONTROL_REQUEST_METHOD)
}

#[async_trait]
impl Plugin for ApiKeyAuthPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Validates an API key header and publishes the caller identity"
    }

    async fn init(&mut self, ctx: &PluginContext, config: &PluginConfig) -> Result<(), BoxError> {
        self.apply(config)?;
        info!(parent: ctx.span(), keys = self.config.keys.len(), header = %self.config.header, "API key auth ready");
        Ok(())
    }

    fn as_middleware(&self) -> Option<&dyn Middleware> {
        Some(self)
    }

    fn as_hot_reloadable(&mut self) -> Option<&mut dyn HotReloadable> {
        Some(self)
    }
}

#[async_trait]
impl Middleware for ApiKeyAuthPlugin {
    fn priority(&self) -> i32 {
        0
    }

    fn should_apply(&self, req: &HttpRequest) -> bool {
        !is_preflight(req) && !self.is_public(req.uri().path())
    }

    async fn pre_process(&self, ctx: &mut RequestContext) -> Result<PluginAction, BoxError> {
        let key = ctx
            .request()
            .headers()
            .get(self.config.header.as_str())
            .and_then(|v| v.to_str().ok());

        let Some(key) = key else {
            return Ok(PluginAction::Reject {
                status: 401,
                reason: format!("Missing {}", self.config.header),
            });
        };

        match self.config.keys.get(key) {
            Some(identity) => {
                debug!(identity = %identity, "Request authenticated");
                let identity = identity.clone();
                ctx.set(IDENTITY_KEY, identity);
                Ok(PluginAction::Continue)
            }
            None => Ok(PluginAction::Reject {
                status: 401,
                reason: format!("Invalid {}", self.config.header),
            }),
        }
    }
}

#[async_trait]
impl HotReloadable for ApiKeyAuthPlugin {
    async fn reload(&mut self, ctx: &PluginContext, config: &PluginConfig) -> Result<(), BoxError> {
        self.apply(config)?;
        info!(parent: ctx.span(), keys = self.config.keys.len(), "API keys reloaded");
        Ok(())
    }
}
