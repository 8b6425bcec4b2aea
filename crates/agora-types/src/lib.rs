//! Core types for the Agora agent framework.
//!
//! This crate defines the data structures shared across the Agora bus,
//! capability agents, gateway, and CLI. It contains no business logic.

pub mod capability;
pub mod config;
pub mod envelope;
pub mod error;

pub use capability::{Capability, ParamSpec};
pub use envelope::{Envelope, EnvelopeKind, BROADCAST_RECIPIENT};
pub use error::AgoraError;
