//! Error types for the bus layer.

use std::time::Duration;
use thiserror::Error;

/// Errors from the transport-facing bus client and the relay protocol.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Transport unavailable: {0}")]
    Transport(String),
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },
    #[error("Bus not initialized")]
    NotInitialized,
    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Errors surfaced to `send_task` callers.
#[derive(Debug, Error)]
pub enum TaskError {
    /// No response arrived before the deadline. The remote side may still
    /// complete the task after this fires; the result is then discarded.
    #[error("Task {task_id} timed out after {timeout:?}")]
    Timeout { task_id: String, timeout: Duration },

    /// The remote agent answered with `success = false`.
    #[error("Task rejected by {agent}: {reason}")]
    Rejected { agent: String, reason: String },

    /// The request could not be published.
    #[error(transparent)]
    Bus(#[from] BusError),
}
