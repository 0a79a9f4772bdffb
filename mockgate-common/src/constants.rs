//! Default timings for the Mockgate plugin core.
//!
//! Use these constants instead of magic numbers so defaults stay consistent
//! between the manager, the health monitor, and embedding applications.

use std::time::Duration;

/// Upper bound for a plugin `init`, `cleanup` or `reload` call.
pub const DEFAULT_LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Period between two health check sweeps.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound for a single plugin health check.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Status code returned to clients when a middleware fails.
pub const INTERNAL_ERROR_STATUS: u16 = 500;

/// Body returned to clients when a middleware fails.
pub const INTERNAL_ERROR_BODY: &str = "Internal Server Error";
