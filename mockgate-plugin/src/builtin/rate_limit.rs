//! Per-client rate limiting plugin

use super::parse_config;
use crate::context::{PluginContext, RequestContext};
use crate::error::BoxError;
use crate::traits::{HealthChecker, HealthStatus, HotReloadable, Middleware, Plugin, PluginAction};
use async_trait::async_trait;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use mockgate_common::PluginConfig;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const NAME: &str = "rate-limit";

/// Key used when the client cannot be identified
pub const ANONYMOUS_CLIENT: &str = "anonymous";

type Limiter = DefaultKeyedRateLimiter<String>;

/// Settings for [`RateLimitPlugin`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    /// Defaults to `requests_per_second`
    pub burst: Option<u32>,
    /// Header identifying the client; the first comma-separated value is used
    pub client_header: String,
    /// How often idle client buckets are dropped
    #[serde(with = "secs")]
    pub eviction_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 100,
            burst: None,
            client_header: "x-forwarded-for".to_string(),
            eviction_interval: Duration::from_secs(60),
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

impl RateLimitConfig {
    fn quota(&self) -> Result<Quota, BoxError> {
        let rate = NonZeroU32::new(self.requests_per_second)
            .ok_or("requests_per_second must be greater than zero")?;
        let burst = NonZeroU32::new(self.burst.unwrap_or(self.requests_per_second))
            .ok_or("burst must be greater than zero")?;
        if self.eviction_interval.is_zero() {
            return Err("eviction_interval must be greater than zero".into());
        }
        Ok(Quota::per_second(rate).allow_burst(burst))
    }
}

struct Eviction {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Token bucket per client, answering 429 once a client's bucket is empty
#[derive(Default)]
pub struct RateLimitPlugin {
    config: RateLimitConfig,
    limiter: Option<Arc<Limiter>>,
    eviction: Option<Eviction>,
}

impl std::fmt::Debug for RateLimitPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitPlugin")
            .field("config", &self.config)
            .field("initialized", &self.limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl RateLimitPlugin {
    fn client_key(&self, ctx: &RequestContext) -> String {
        ctx.request()
            .headers()
            .get(self.config.client_header.as_str())
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(ANONYMOUS_CLIENT)
            .to_string()
    }

    /// Build a fresh limiter and restart eviction for it.
    async fn apply(&mut self, ctx: &PluginContext, config: &PluginConfig) -> Result<(), BoxError> {
        let parsed: RateLimitConfig = parse_config(config)?;
        let limiter = Arc::new(RateLimiter::keyed(parsed.quota()?));

        self.stop_eviction().await;
        self.eviction = Some(spawn_eviction(
            limiter.clone(),
            parsed.eviction_interval,
            ctx.shutdown_token(),
        ));
        self.limiter = Some(limiter);
        self.config = parsed;
        Ok(())
    }

    async fn stop_eviction(&mut self) {
        if let Some(eviction) = self.eviction.take() {
            eviction.stop.cancel();
            if let Err(e) = eviction.task.await {
                warn!("Rate limit eviction task failed: {}", e);
            }
        }
    }
}

/// Periodically drop buckets that are back to full capacity.
///
/// Runs until `stop` fires or the manager shuts down.
fn spawn_eviction(limiter: Arc<Limiter>, every: Duration, shutdown: &CancellationToken) -> Eviction {
    let stop = shutdown.child_token();
    let token = stop.clone();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    limiter.retain_recent();
                    limiter.shrink_to_fit();
                    debug!(clients = limiter.len(), "Evicted idle rate limit buckets");
                }
            }
        }
    });
    Eviction { stop, task }
}

#[async_trait]
impl Plugin for RateLimitPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Limits requests per client with a token bucket"
    }

    async fn init(&mut self, ctx: &PluginContext, config: &PluginConfig) -> Result<(), BoxError> {
        self.apply(ctx, config).await?;
        info!(
            parent: ctx.span(),
            rps = self.config.requests_per_second,
            burst = ?self.config.burst,
            "Rate limiter ready"
        );
        Ok(())
    }

    async fn cleanup(&mut self, _ctx: &PluginContext) -> Result<(), BoxError> {
        self.stop_eviction().await;
        self.limiter = None;
        Ok(())
    }

    fn as_middleware(&self) -> Option<&dyn Middleware> {
        Some(self)
    }

    fn as_health_checker(&self) -> Option<&dyn HealthChecker> {
        Some(self)
    }

    fn as_hot_reloadable(&mut self) -> Option<&mut dyn HotReloadable> {
        Some(self)
    }
}

#[async_trait]
impl Middleware for RateLimitPlugin {
    fn priority(&self) -> i32 {
        10
    }

    async fn pre_process(&self, ctx: &mut RequestContext) -> Result<PluginAction, BoxError> {
        let limiter = self.limiter.as_ref().ok_or("rate limiter not initialized")?;
        let key = self.client_key(ctx);

        match limiter.check_key(&key) {
            Ok(()) => Ok(PluginAction::Continue),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                debug!(client = %key, wait_ms = wait.as_millis() as u64, "Rate limit exceeded");
                Ok(PluginAction::Respond {
                    status: 429,
                    headers: vec![
                        ("content-type".to_string(), "text/plain".to_string()),
                        ("retry-after".to_string(), wait.as_secs().max(1).to_string()),
                    ],
                    body: b"Rate limit exceeded".to_vec(),
                })
            }
        }
    }
}

#[async_trait]
impl HealthChecker for RateLimitPlugin {
    async fn health_check(&self, _ctx: &PluginContext) -> HealthStatus {
        let Some(limiter) = &self.limiter else {
            return HealthStatus::unhealthy("rate limiter not initialized");
        };
        let evicting = self
            .eviction
            .as_ref()
            .is_some_and(|eviction| !eviction.task.is_finished());
        if !evicting {
            return HealthStatus::unhealthy("eviction task is not running");
        }
        HealthStatus::healthy("rate limiter operational")
            .with_detail("tracked_clients", limiter.len())
            .with_detail("requests_per_second", self.config.requests_per_second)
    }
}

#[async_trait]
impl HotReloadable for RateLimitPlugin {
    async fn reload(&mut self, ctx: &PluginContext, config: &PluginConfig) -> Result<(), BoxError> {
        self.apply(ctx, config).await?;
        info!(parent: ctx.span(), rps = self.config.requests_per_second, "Rate limit reloaded");
        Ok(())
    }
}
