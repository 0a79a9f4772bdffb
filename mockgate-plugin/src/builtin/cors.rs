//! CORS pre-flight handling

use super::parse_config;
use crate::context::{HttpRequest, PluginContext, RequestContext};
use crate::error::BoxError;
use crate::traits::{Middleware, Plugin, PluginAction};
use async_trait::async_trait;
use http::header;
use mockgate_common::PluginConfig;
use serde::{Deserialize, Serialize};

pub const NAME: &str = "cors";

/// Shared-store key holding the origin echoed back to the browser
pub const ALLOW_ORIGIN_KEY: &str = "cors.allow_origin";

/// Settings for [`CorsPlugin`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Exact origins, or `*` for any
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_headers: ["content-type", "authorization", "x-api-key"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_age_secs: 600,
        }
    }
}

/// Answers pre-flight requests and resolves the allowed origin for the rest
#[derive(Debug, Default)]
pub struct CorsPlugin {
    config: CorsConfig,
}

impl CorsPlugin {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    /// Value for `access-control-allow-origin`, if the origin is allowed
    fn allow_origin(&self, origin: &str) -> Option<String> {
        if self.config.allowed_origins.iter().any(|o| o == "*") {
            return Some("*".to_string());
        }
        self.config
            .allowed_origins
            .iter()
            .any(|o| o.eq_ignore_ascii_case(origin))
            .then(|| origin.to_string())
    }

    fn preflight_headers(&self, allow_origin: String) -> Vec<(String, String)> {
        let mut headers = vec![
            (header::ACCESS_CONTROL_ALLOW_ORIGIN.to_string(), allow_origin),
            (
                header::ACCESS_CONTROL_ALLOW_METHODS.to_string(),
                self.config.allowed_methods.join(", "),
            ),
            (
                header::ACCESS_CONTROL_ALLOW_HEADERS.to_string(),
                self.config.allowed_headers.join(", "),
            ),
            (
                header::ACCESS_CONTROL_MAX_AGE.to_string(),
                self.config.max_age_secs.to_string(),
            ),
        ];
        if !self.config.allowed_origins.iter().any(|o| o == "*") {
            headers.push((header::VARY.to_string(), "Origin".to_string()));
        }
        headers
    }
}

fn origin(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
}

#[async_trait]
impl Plugin for CorsPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Answers CORS pre-flight requests"
    }

    async fn init(&mut self, _ctx: &PluginContext, config: &PluginConfig) -> Result<(), BoxError> {
        let parsed: CorsConfig = parse_config(config)?;
        if parsed.allowed_origins.is_empty() {
            return Err("allowed_origins must not be empty".into());
        }
        self.config = parsed;
        Ok(())
    }

    fn as_middleware(&self) -> Option<&dyn Middleware> {
        Some(self)
    }
}

#[async_trait]
impl Middleware for CorsPlugin {
    fn priority(&self) -> i32 {
        5
    }

    /// Only cross-origin requests carry an `Origin` header
    fn should_apply(&self, req: &HttpRequest) -> bool {
        origin(req).is_some()
    }

    async fn pre_process(&self, ctx: &mut RequestContext) -> Result<PluginAction, BoxError> {
        let req = ctx.request();
        let preflight = req.method() == http::Method::OPTIONS
            && req
                .headers()
                .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);
        let allowed = origin(req).and_then(|o| self.allow_origin(o));

        match (allowed, preflight) {
            (Some(allow_origin), true) => Ok(PluginAction::Respond {
                status: 204,
                headers: self.preflight_headers(allow_origin),
                body: Vec::new(),
            }),
            (None, true) => Ok(PluginAction::Reject {
                status: 403,
                reason: "CORS origin not allowed".to_string(),
            }),
            (Some(allow_origin), false) => {
                ctx.set(ALLOW_ORIGIN_KEY, allow_origin);
                Ok(PluginAction::Continue)
            }
            (None, false) => Ok(PluginAction::Continue),
        }
    }
}
