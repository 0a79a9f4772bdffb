use crate::context::{HttpRequest, HttpResponse, PluginContext, RequestContext, ResponseContext};
use crate::error::BoxError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockgate_common::PluginConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Outcome of a middleware's pre-process step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PluginAction {
    /// Continue processing (allow other plugins and the handler to run)
    Continue,

    /// Reject the request with status and reason
    Reject { status: u16, reason: String },

    /// Short-circuit and respond immediately
    Respond {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
}

impl PluginAction {
    pub fn is_continue(&self) -> bool {
        matches!(self, PluginAction::Continue)
    }

    /// Response written on behalf of the plugin; `None` for `Continue`.
    pub fn into_response(self) -> Option<HttpResponse> {
        let (status, headers, body) = match self {
            PluginAction::Continue => return None,
            PluginAction::Reject { status, reason } => (
                status,
                vec![("content-type".to_string(), "text/plain".to_string())],
                reason.into_bytes(),
            ),
            PluginAction::Respond {
                status,
                headers,
                body,
            } => (status, headers, body),
        };

        let mut response = http::Response::new(body);
        *response.status_mut() =
            http::StatusCode::from_u16(status).unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
        for (name, value) in headers {
            let (Ok(name), Ok(value)) = (
                http::HeaderName::try_from(name),
                http::HeaderValue::try_from(value),
            ) else {
                tracing::warn!("Dropping invalid header written by plugin");
                continue;
            };
            response.headers_mut().append(name, value);
        }
        Some(response)
    }
}

/// Result of one health probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    pub last_check: DateTime<Utc>,
    #[serde(default)]
    pub details: HashMap<String, Value>,
}

impl HealthStatus {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: message.into(),
            last_check: Utc::now(),
            details: HashMap::new(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            ..Self::healthy(message)
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Core plugin trait
///
/// Optional capabilities are exposed through the `as_*` accessors; a plugin
/// opts in by returning `Some(self)` from the matching accessor.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Plugin name; must equal the name its factory is registered under
    fn name(&self) -> &str;

    /// Plugin version
    fn version(&self) -> &str {
        "0.1.0"
    }

    fn description(&self) -> &str {
        ""
    }

    /// Initialize plugin (called once on load)
    async fn init(&mut self, _ctx: &PluginContext, _config: &PluginConfig) -> Result<(), BoxError> {
        Ok(())
    }

    /// Release resources (called once on unload)
    async fn cleanup(&mut self, _ctx: &PluginContext) -> Result<(), BoxError> {
        Ok(())
    }

    fn as_middleware(&self) -> Option<&dyn Middleware> {
        None
    }

    fn as_health_checker(&self) -> Option<&dyn HealthChecker> {
        None
    }

    fn as_hot_reloadable(&mut self) -> Option<&mut dyn HotReloadable> {
        None
    }

    fn as_dependency_aware(&self) -> Option<&dyn DependencyAware> {
        None
    }
}

/// Request/response interception
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Lower runs earlier in pre-process and later in post-process
    fn priority(&self) -> i32;

    /// Opt out of a single request; a skipped plugin is not post-processed either
    fn should_apply(&self, _req: &HttpRequest) -> bool {
        true
    }

    /// Hook: before the main handler
    async fn pre_process(&self, ctx: &mut RequestContext) -> Result<PluginAction, BoxError>;

    /// Hook: after the response is produced
    async fn post_process(&self, _ctx: &ResponseContext) -> Result<(), BoxError> {
        Ok(())
    }
}

#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn health_check(&self, ctx: &PluginContext) -> HealthStatus;
}

/// Apply new configuration to a live instance
#[async_trait]
pub trait HotReloadable: Send + Sync {
    fn can_reload(&self) -> bool {
        true
    }

    async fn reload(&mut self, ctx: &PluginContext, config: &PluginConfig) -> Result<(), BoxError>;
}

pub trait DependencyAware: Send + Sync {
    /// Names of plugins that must be enabled before this one
    fn dependencies(&self) -> Vec<String>;
}
