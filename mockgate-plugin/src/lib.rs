//! # Mockgate Plugin Core
//!
//! This crate manages the plugins of the Mockgate HTTP mocking gateway and
//! runs them as middleware around the gateway's request handler.
//!
//! ## Features
//!
//! - **Async-First** - Every plugin hook is async
//! - **Lifecycle Management** - `loaded`, `enabled`, `disabled` and `error`
//!   states with dependency checks and bounded `init`/`cleanup` calls
//! - **Hot Reload** - Apply new configuration in place, or recreate the instance
//! - **Failure Isolation** - Plugin errors and panics never reach the client
//!   beyond a generic 500
//! - **Health Checks** - Periodic probing moves unhealthy plugins to `error`
//! - **Built-in Plugins** - API key auth, rate limiting, CORS and request logging
//!
//! ## Quick Start
//!
//! ### Creating a Custom Plugin
//!
//! ```rust
//! use async_trait::async_trait;
//! use mockgate_plugin::{BoxError, Middleware, Plugin, PluginAction, RequestContext};
//!
//! struct AdminGuard;
//!
//! #[async_trait]
//! impl Plugin for AdminGuard {
//!     fn name(&self) -> &str {
//!         "admin-guard"
//!     }
//!
//!     fn as_middleware(&self) -> Option<&dyn Middleware> {
//!         Some(self)
//!     }
//! }
//!
//! #[async_trait]
//! impl Middleware for AdminGuard {
//!     fn priority(&self) -> i32 {
//!         1
//!     }
//!
//!     async fn pre_process(&self, ctx: &mut RequestContext) -> Result<PluginAction, BoxError> {
//!         if ctx.request().uri().path().starts_with("/admin") {
//!             return Ok(PluginAction::Reject {
//!                 status: 403,
//!                 reason: "Access denied".to_string(),
//!             });
//!         }
//!         Ok(PluginAction::Continue)
//!     }
//! }
//! ```
//!
//! ### Running Plugins
//!
//! ```rust,no_run
//! use mockgate_plugin::{BoxError, HttpRequest, HttpResponse, PluginManager, RequestHandler};
//! # struct AdminGuard;
//! # #[async_trait::async_trait]
//! # impl mockgate_plugin::Plugin for AdminGuard {
//! #     fn name(&self) -> &str { "admin-guard" }
//! # }
//!
//! async fn mock_handler(_req: HttpRequest) -> Result<HttpResponse, BoxError> {
//!     Ok(http::Response::new(b"{}".to_vec()))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let manager = PluginManager::new();
//!     manager.register_plugin("admin-guard", || Ok(Box::new(AdminGuard) as Box<dyn mockgate_plugin::Plugin>))?;
//!     manager.load_plugin("admin-guard", Default::default()).await?;
//!     manager.enable_plugin("admin-guard")?;
//!
//!     let handler = manager.pipeline().wrap(mock_handler);
//!     let request = http::Request::builder().uri("/admin").body(Vec::new())?;
//!     let response = handler.handle(request).await?;
//!     assert_eq!(response.status(), 403);
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Plugin Actions
//!
//! - `PluginAction::Continue` - Allow request, continue to next plugin
//! - `PluginAction::Reject { status, reason }` - Reject with HTTP status
//! - `PluginAction::Respond { status, headers, body }` - Send custom response
//!
//! ## See Also
//!
//! - [`Plugin`] - Core plugin trait
//! - [`PluginManager`] - Lifecycle and administration
//! - [`PipelineExecutor`] - Request-path execution

pub mod builtin;
pub mod config;
pub mod context;
pub mod entry;
pub mod error;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod table;
pub mod traits;

pub use config::{
    create_plugin_from_config, prepare_config, ConfigSubstitutor, ConfigValidator, EnvSubstitutor,
};
pub use context::{HttpRequest, HttpResponse, PluginContext, PluginData, RequestContext, ResponseContext};
pub use entry::{PluginEntry, PluginHandle, PluginInfo, PluginMetrics, PluginState};
pub use error::{BoxError, ErrorCategory, Operation, PluginError, Result};
pub use health::{check_plugin, HealthMonitor};
pub use manager::{
    LoadReport, ManagerMetrics, PluginManager, PluginManagerBuilder, ShutdownReport, UnloadOutcome,
};
pub use metrics::{CollectedStats, InMemoryMetrics, MetricsCollector, OperationStats};
pub use mockgate_common::{ManagerConfig, PluginConfig, PluginSpec};
pub use pipeline::{internal_error_response, PipelineExecutor, PipelineHandler, RequestHandler};
pub use registry::{PluginFactory, PluginRegistry};
pub use table::PluginTable;
pub use traits::{
    DependencyAware, HealthChecker, HealthStatus, HotReloadable, Middleware, Plugin, PluginAction,
};
