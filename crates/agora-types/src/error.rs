//! Shared error types for the Agora framework.

use thiserror::Error;

/// Top-level error type shared across Agora crates.
#[derive(Error, Debug)]
pub enum AgoraError {
    /// The requested agent was not found.
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// The named capability is not supported by the target agent.
    #[error("Capability not supported: {0}")]
    UnknownCapability(String),

    /// Invalid caller input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Access to a resource was denied.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Alias for results carrying an [`AgoraError`].
pub type AgoraResult<T> = Result<T, AgoraError>;
