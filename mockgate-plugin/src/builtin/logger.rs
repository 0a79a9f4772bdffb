//! Request/response logging plugin

use super::auth::IDENTITY_KEY;
use super::parse_config;
use crate::context::{PluginContext, RequestContext, ResponseContext};
use crate::error::BoxError;
use crate::traits::{Middleware, Plugin, PluginAction};
use async_trait::async_trait;
use mockgate_common::PluginConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const NAME: &str = "request-logger";

const REDACTED: &str = "[redacted]";

/// Settings for [`RequestLoggerPlugin`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLoggerConfig {
    /// Include request headers in the incoming-request line
    pub log_headers: bool,
    /// Header names whose values are never logged
    pub redact_headers: Vec<String>,
}

impl Default for RequestLoggerConfig {
    fn default() -> Self {
        Self {
            log_headers: false,
            redact_headers: ["authorization", "cookie", "x-api-key"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Logs every request and its final outcome
#[derive(Debug, Default)]
pub struct RequestLoggerPlugin {
    config: RequestLoggerConfig,
}

impl RequestLoggerPlugin {
    pub fn new(config: RequestLoggerConfig) -> Self {
        Self { config }
    }

    fn is_redacted(&self, name: &str) -> bool {
        self.config
            .redact_headers
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
    }

    /// `name: value` pairs with sensitive values masked
    pub fn render_headers(&self, headers: &http::HeaderMap) -> String {
        headers
            .iter()
            .map(|(name, value)| {
                let value = if self.is_redacted(name.as_str()) {
                    REDACTED
                } else {
                    value.to_str().unwrap_or("<binary>")
                };
                format!("{name}: {value}")
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait]
impl Plugin for RequestLoggerPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Logs requests and responses with header redaction"
    }

    async fn init(&mut self, _ctx: &PluginContext, config: &PluginConfig) -> Result<(), BoxError> {
        self.config = parse_config(config)?;
        Ok(())
    }

    fn as_middleware(&self) -> Option<&dyn Middleware> {
        Some(self)
    }
}

#[async_trait]
impl Middleware for RequestLoggerPlugin {
    fn priority(&self) -> i32 {
        100
    }

    async fn pre_process(&self, ctx: &mut RequestContext) -> Result<PluginAction, BoxError> {
        let req = ctx.request();
        if self.config.log_headers {
            info!(
                request_id = %ctx.request_id(),
                method = %req.method(),
                uri = %req.uri(),
                headers = %self.render_headers(req.headers()),
                "Incoming request"
            );
        } else {
            info!(
                request_id = %ctx.request_id(),
                method = %req.method(),
                uri = %req.uri(),
                "Incoming request"
            );
        }
        Ok(PluginAction::Continue)
    }

    async fn post_process(&self, ctx: &ResponseContext) -> Result<(), BoxError> {
        let status = ctx.status();
        let identity = ctx
            .get(IDENTITY_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let duration_ms = ctx.duration().as_millis() as u64;

        if status.is_success() || status.is_redirection() {
            info!(
                request_id = %ctx.request_id(),
                status = status.as_u16(),
                identity,
                duration_ms,
                "Response sent"
            );
        } else {
            warn!(
                request_id = %ctx.request_id(),
                status = status.as_u16(),
                identity,
                duration_ms,
                error = ctx.error().unwrap_or("-"),
                "Response sent (error)"
            );
        }
        Ok(())
    }
}
