//! Observation hooks for persistence collaborators.
//!
//! The core emits these events and ignores their outcome entirely —
//! storage schema, durability, and failure handling are the
//! collaborator's concern. The default implementation does nothing.

use agora_types::capability::Capability;
use agora_types::envelope::Envelope;
use serde_json::Value;

/// Callbacks the core fires as it operates.
pub trait EventHooks: Send + Sync {
    /// An agent finished initializing on this node.
    fn on_agent_registered(&self, agent_id: &str, name: &str, capabilities: &[Capability]) {
        let _ = (agent_id, name, capabilities);
    }

    /// A tracked task reached a terminal state.
    fn on_task_result(
        &self,
        task_id: &str,
        status: &str,
        result: Option<&Value>,
        error: Option<&str>,
    ) {
        let _ = (task_id, status, result, error);
    }

    /// A validated envelope passed admission on the inbound loop.
    fn on_message_observed(&self, envelope: &Envelope) {
        let _ = envelope;
    }
}

/// Hooks that drop everything.
pub struct NoopHooks;

impl EventHooks for NoopHooks {}
