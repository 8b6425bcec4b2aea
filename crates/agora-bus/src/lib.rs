//! Agora agent-to-agent (A2A) communication substrate.
//!
//! Independent agents expose named capabilities and exchange signed task
//! envelopes over a shared publish/subscribe transport. This crate is the
//! core of that exchange:
//!
//! - **Transport**: abstract pub/sub channel provider, with a
//!   process-local hub ([`InProcessTransport`]) and a TCP relay
//!   ([`RelayNode`] / [`RelayTransport`])
//! - **SecurityGate**: Ed25519 envelope signing plus the inbound
//!   admission pipeline (authenticity, trust, rate limiting)
//! - **Bus**: per-agent transport client owning the subscription and the
//!   inbound dispatch loop
//! - **Dispatcher**: routes validated envelopes by kind and turns
//!   capability executions into response envelopes
//! - **Correlator**: pending-task table giving callers a synchronous
//!   `send task, await result` view of the asynchronous medium
//! - **Agent**: per-agent façade wiring the pieces together
//!
//! The transport is assumed to be at-least-once and best-effort; the
//! substrate is correct under message loss and duplication but does not
//! eliminate them.

pub mod agent;
pub mod client;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod hooks;
pub mod memory;
pub mod registry;
pub mod relay;
pub mod security;
pub mod store;
pub mod transport;

pub use agent::{Agent, AgentHealth};
pub use client::Bus;
pub use correlator::{Correlator, TaskRecord, TaskState};
pub use dispatcher::{Dispatcher, TaskExecutor};
pub use error::{BusError, TaskError};
pub use hooks::{EventHooks, NoopHooks};
pub use memory::InProcessTransport;
pub use registry::{AgentDirectory, CapabilityRegistry, RemoteAgent};
pub use relay::{RelayNode, RelayTransport};
pub use security::{
    AllowListTrust, PermissiveTrust, RateLimiter, SecurityGate, TrustPolicy, ValidationFailure,
};
pub use store::SqliteStore;
pub use transport::{agent_channel, Subscription, Transport, BROADCAST_CHANNEL};
