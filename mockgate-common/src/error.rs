//! Error types shared across Mockgate crates

use thiserror::Error;

/// Error type for configuration and process-level failures
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Observability backend error
    #[error("Observability error: {0}")]
    Observability(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, GatewayError>;
