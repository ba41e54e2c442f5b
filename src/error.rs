//! Error types for p3-bridge.

use thiserror::Error;

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error during socket or queue-file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config, queue file, envelope).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration is syntactically valid but unusable (bad base URL, bad method).
    #[error("config error: {0}")]
    Config(String),

    /// The UDP listen socket could not be bound. Fatal at startup.
    #[error("UDP bind failed on {addr}: {source}")]
    UdpBind {
        addr: String,
        source: std::io::Error,
    },

    /// Queue file could not be persisted or reloaded.
    #[error("queue I/O error: {0}")]
    QueueIo(std::io::Error),

    /// The bridge was asked to do something after shutdown.
    #[error("bridge is shut down")]
    Stopped,
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
