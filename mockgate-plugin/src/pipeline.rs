//! Middleware pipeline executor
//!
//! Runs every enabled middleware around a request handler: pre-process in
//! ascending priority, the handler, then post-process in exact reverse order.
//! Panics raised by plugins are caught at each call site.

use crate::context::{HttpRequest, HttpResponse, RequestContext, ResponseContext};
use crate::entry::PluginEntry;
use crate::error::{panic_message, BoxError, Operation, PluginError};
use crate::metrics::MetricsCollector;
use crate::table::PluginTable;
use async_trait::async_trait;
use futures_util::FutureExt;
use mockgate_common::{INTERNAL_ERROR_BODY, INTERNAL_ERROR_STATUS};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn, Instrument};

/// Produces the response for a request once every middleware has continued
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, BoxError>;
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(HttpRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HttpResponse, BoxError>> + Send + 'static,
{
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, BoxError> {
        self(request).await
    }
}

/// Generic failure response; details stay in logs and metrics.
pub fn internal_error_response() -> HttpResponse {
    let mut response = http::Response::new(INTERNAL_ERROR_BODY.as_bytes().to_vec());
    *response.status_mut() = http::StatusCode::from_u16(INTERNAL_ERROR_STATUS)
        .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain"),
    );
    response
}

#[derive(PartialEq, Eq)]
enum PostOutcome {
    Done,
    Panicked,
}

enum PreOutcome {
    Skipped,
    Continue,
    ShortCircuit(HttpResponse),
    Failed,
}

/// Executes the middleware chain. Cheap to clone; every clone reads the same
/// plugin table.
#[derive(Clone)]
pub struct PipelineExecutor {
    table: Arc<PluginTable>,
    metrics: Arc<dyn MetricsCollector>,
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("plugins", &self.table.len())
            .finish_non_exhaustive()
    }
}

impl PipelineExecutor {
    pub fn new(table: Arc<PluginTable>, metrics: Arc<dyn MetricsCollector>) -> Self {
        Self { table, metrics }
    }

    /// Wrap a handler so that every call runs through the pipeline
    pub fn wrap<H: RequestHandler>(&self, handler: H) -> PipelineHandler<H> {
        PipelineHandler {
            executor: self.clone(),
            handler,
        }
    }

    /// Run one request through the chain. Always produces a response.
    pub async fn execute<H>(&self, request: HttpRequest, handler: &H) -> HttpResponse
    where
        H: RequestHandler + ?Sized,
    {
        let ctx = RequestContext::new(request);
        let span = tracing::debug_span!(
            "request",
            request_id = %ctx.request_id(),
            method = %ctx.request().method(),
            uri = %ctx.request().uri(),
        );
        self.run(ctx, handler).instrument(span).await
    }

    async fn run<H>(&self, mut ctx: RequestContext, handler: &H) -> HttpResponse
    where
        H: RequestHandler + ?Sized,
    {
        // Snapshot taken once; state changes during the request do not
        // affect it.
        let chain = self.table.enabled_middlewares();
        let mut applied = Vec::with_capacity(chain.len());

        for entry in chain {
            match self.pre_process(&entry, &mut ctx).await {
                PreOutcome::Skipped => {}
                PreOutcome::Continue => applied.push(entry),
                PreOutcome::ShortCircuit(response) => {
                    debug!(plugin = %entry.name(), status = %response.status(), "Request answered by plugin");
                    return response;
                }
                PreOutcome::Failed => return internal_error_response(),
            }
        }

        let request = ctx.take_request();
        let (response, handler_error) = match AssertUnwindSafe(handler.handle(request))
            .catch_unwind()
            .await
        {
            Ok(Ok(response)) => (response, None),
            Ok(Err(e)) => {
                error!(error = %e, "Request handler failed");
                (internal_error_response(), Some(e.to_string()))
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                error!(panic = %message, "Request handler panicked");
                (internal_error_response(), Some(format!("handler panicked: {message}")))
            }
        };

        let mut ctx = ctx.into_response(response, handler_error);
        for entry in applied.iter().rev() {
            if self.post_process(entry, &mut ctx).await == PostOutcome::Panicked {
                return internal_error_response();
            }
        }

        debug!(
            status = %ctx.status(),
            latency_ms = ctx.duration().as_millis() as u64,
            "Request completed"
        );
        ctx.into_response()
    }

    async fn pre_process(&self, entry: &PluginEntry, ctx: &mut RequestContext) -> PreOutcome {
        let plugin = entry.instance().read().await;
        let Some(middleware) = plugin.as_middleware() else {
            return PreOutcome::Skipped;
        };
        ctx.enter_plugin(entry.name());

        let applies =
            std::panic::catch_unwind(AssertUnwindSafe(|| middleware.should_apply(ctx.request())));
        match applies {
            Ok(true) => {}
            Ok(false) => return PreOutcome::Skipped,
            Err(payload) => {
                let err = PluginError::Panic {
                    plugin: entry.name().to_string(),
                    operation: Operation::PreProcess,
                    message: panic_message(&*payload),
                };
                error!(plugin = %entry.name(), error = %err, "Middleware failed");
                self.record(entry, Operation::PreProcess, Duration::ZERO, Some(&err));
                return PreOutcome::Failed;
            }
        }

        let started = Instant::now();
        let outcome = AssertUnwindSafe(middleware.pre_process(ctx))
            .catch_unwind()
            .await;
        let latency = started.elapsed();

        let result = match outcome {
            Ok(Ok(action)) => Ok(action),
            Ok(Err(source)) => Err(PluginError::OperationFailed {
                plugin: entry.name().to_string(),
                operation: Operation::PreProcess,
                source,
            }),
            Err(payload) => Err(PluginError::Panic {
                plugin: entry.name().to_string(),
                operation: Operation::PreProcess,
                message: panic_message(&*payload),
            }),
        };
        self.record(entry, Operation::PreProcess, latency, result.as_ref().err());

        match result {
            Ok(action) => match action.into_response() {
                None => PreOutcome::Continue,
                Some(response) => PreOutcome::ShortCircuit(response),
            },
            Err(err) => {
                error!(plugin = %entry.name(), error = %err, "Middleware failed");
                PreOutcome::Failed
            }
        }
    }

    /// An error leaves the response untouched; a panic ends the request
    /// with a generic 500.
    async fn post_process(&self, entry: &PluginEntry, ctx: &mut ResponseContext) -> PostOutcome {
        let plugin = entry.instance().read().await;
        let Some(middleware) = plugin.as_middleware() else {
            return PostOutcome::Done;
        };
        ctx.enter_plugin(entry.name());

        let started = Instant::now();
        let outcome = AssertUnwindSafe(middleware.post_process(ctx))
            .catch_unwind()
            .await;
        let latency = started.elapsed();

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(source)) => Some(PluginError::OperationFailed {
                plugin: entry.name().to_string(),
                operation: Operation::PostProcess,
                source,
            }),
            Err(payload) => Some(PluginError::Panic {
                plugin: entry.name().to_string(),
                operation: Operation::PostProcess,
                message: panic_message(&*payload),
            }),
        };
        self.record(entry, Operation::PostProcess, latency, error.as_ref());
        match error {
            Some(err @ PluginError::Panic { .. }) => {
                error!(plugin = %entry.name(), error = %err, "Post-process panicked");
                PostOutcome::Panicked
            }
            Some(err) => {
                warn!(plugin = %entry.name(), error = %err, "Post-process failed");
                PostOutcome::Done
            }
            None => PostOutcome::Done,
        }
    }

    fn record(
        &self,
        entry: &PluginEntry,
        operation: Operation,
        latency: Duration,
        error: Option<&PluginError>,
    ) {
        let message = error.map(ToString::to_string);
        entry.record_invocation(latency, message.as_deref());
        self.metrics
            .record_operation(entry.name(), operation, error.is_none());
        self.metrics.record_latency(entry.name(), operation, latency);
        if let Some(err) = error {
            self.metrics.record_error(entry.name(), err.category());
        }
    }
}

/// Handler returned by [`PipelineExecutor::wrap`]
#[derive(Debug, Clone)]
pub struct PipelineHandler<H> {
    executor: PipelineExecutor,
    handler: H,
}

impl<H> PipelineHandler<H> {
    pub fn inner(&self) -> &H {
        &self.handler
    }
}

#[async_trait]
impl<H: RequestHandler> RequestHandler for PipelineHandler<H> {
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, BoxError> {
        Ok(self.executor.execute(request, &self.handler).await)
    }
}
