//! Error types for a3s-bridge

use thiserror::Error;

/// Errors that can occur while running the bridge
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Gateway connection or protocol failure
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Gateway did not report readiness, so the webhook listener was never started
    #[error("Gateway never became ready: {0}")]
    GatewayNotReady(String),

    /// Event could not be handed to the dispatch pipeline
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Lifecycle misuse (e.g. running a coordinator twice)
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// IO error (socket bind, accept)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;
