//! Contexts handed to plugins: lifecycle calls and per-request state

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Span;
use uuid::Uuid;

/// Request type flowing through the pipeline
pub type HttpRequest = http::Request<Vec<u8>>;

/// Response type flowing through the pipeline
pub type HttpResponse = http::Response<Vec<u8>>;

/// Key/value store scoped to one plugin within one request
pub type PluginData = HashMap<String, Value>;

/// Context passed to `init`, `cleanup`, `reload` and `health_check`.
///
/// `cancellation()` fires when the call's deadline passes or the manager
/// shuts down. Background work that should outlive the call but stop with
/// the process must watch `shutdown_token()` instead.
#[derive(Debug, Clone)]
pub struct PluginContext {
    plugin: String,
    deadline: tokio::time::Instant,
    cancellation: CancellationToken,
    shutdown: CancellationToken,
    span: Span,
}

impl PluginContext {
    pub fn new(plugin: impl Into<String>, timeout: Duration, shutdown: &CancellationToken) -> Self {
        let plugin = plugin.into();
        let span = tracing::info_span!("plugin", plugin = %plugin);
        Self {
            plugin,
            deadline: tokio::time::Instant::now() + timeout,
            cancellation: shutdown.child_token(),
            shutdown: shutdown.clone(),
            span,
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }

    pub fn deadline(&self) -> tokio::time::Instant {
        self.deadline
    }

    /// Time left before the call is abandoned.
    pub fn remaining(&self) -> Duration {
        self.deadline
            .saturating_duration_since(tokio::time::Instant::now())
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Span all plugin log lines should be emitted under.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// Per-request state shared by every middleware of one request
#[derive(Debug)]
pub struct RequestContext {
    request: HttpRequest,
    request_id: Uuid,
    started_at: DateTime<Utc>,
    start: Instant,
    values: HashMap<String, Value>,
    plugin_data: HashMap<String, PluginData>,
    current_plugin: String,
}

impl RequestContext {
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            request_id: Uuid::new_v4(),
            started_at: Utc::now(),
            start: Instant::now(),
            values: HashMap::new(),
            plugin_data: HashMap::new(),
            current_plugin: String::new(),
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut HttpRequest {
        &mut self.request
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Shared value set by any middleware of this request.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    /// Private store of the middleware currently running.
    pub fn data(&self) -> Option<&PluginData> {
        self.plugin_data.get(&self.current_plugin)
    }

    pub fn data_mut(&mut self) -> &mut PluginData {
        self.plugin_data
            .entry(self.current_plugin.clone())
            .or_default()
    }

    pub(crate) fn enter_plugin(&mut self, plugin: &str) {
        plugin.clone_into(&mut self.current_plugin);
    }

    /// Hand the request to the main handler, keeping its head for post-process.
    pub(crate) fn take_request(&mut self) -> HttpRequest {
        let request = std::mem::take(&mut self.request);
        *self.request.method_mut() = request.method().clone();
        *self.request.uri_mut() = request.uri().clone();
        *self.request.version_mut() = request.version();
        *self.request.headers_mut() = request.headers().clone();
        request
    }

    pub(crate) fn into_response(
        self,
        response: HttpResponse,
        error: Option<String>,
    ) -> ResponseContext {
        ResponseContext {
            duration: self.start.elapsed(),
            request_id: self.request_id,
            started_at: self.started_at,
            method: self.request.method().clone(),
            uri: self.request.uri().clone(),
            request_headers: self.request.headers().clone(),
            response,
            error,
            values: self.values,
            plugin_data: self.plugin_data,
            current_plugin: String::new(),
        }
    }
}

/// Read-only view of a finished request handed to `post_process`
#[derive(Debug)]
pub struct ResponseContext {
    request_id: Uuid,
    started_at: DateTime<Utc>,
    duration: Duration,
    method: http::Method,
    uri: http::Uri,
    request_headers: http::HeaderMap,
    response: HttpResponse,
    error: Option<String>,
    values: HashMap<String, Value>,
    plugin_data: HashMap<String, PluginData>,
    current_plugin: String,
}

impl ResponseContext {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time from pipeline entry until the response was produced.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn method(&self) -> &http::Method {
        &self.method
    }

    pub fn uri(&self) -> &http::Uri {
        &self.uri
    }

    pub fn request_headers(&self) -> &http::HeaderMap {
        &self.request_headers
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub fn status(&self) -> http::StatusCode {
        self.response.status()
    }

    /// Error reported by the main handler, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    pub fn data(&self) -> Option<&PluginData> {
        self.plugin_data.get(&self.current_plugin)
    }

    pub(crate) fn enter_plugin(&mut self, plugin: &str) {
        plugin.clone_into(&mut self.current_plugin);
    }

    pub(crate) fn into_response(self) -> HttpResponse {
        self.response
    }
}
