//! Capability registry and the directory of remote agents.
//!
//! [`CapabilityRegistry`] holds what *this* agent can do: populated at
//! construction, read-mostly afterwards. [`AgentDirectory`] tracks what
//! *other* agents advertise, built from observed capability
//! announcements and responses; it is the local routing table for peer
//! discovery.

use agora_types::capability::Capability;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// This agent's own capability table.
#[derive(Clone)]
pub struct CapabilityRegistry {
    capabilities: Arc<RwLock<HashMap<String, Capability>>>,
}

impl CapabilityRegistry {
    /// Create a registry from the agent's construction-time capability
    /// list. Later names overwrite earlier duplicates.
    pub fn new(capabilities: Vec<Capability>) -> Self {
        let map = capabilities
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        Self {
            capabilities: Arc::new(RwLock::new(map)),
        }
    }

    /// Whether the named operation is supported.
    pub fn supports(&self, name: &str) -> bool {
        let caps = self.capabilities.read().unwrap_or_else(|e| e.into_inner());
        caps.contains_key(name)
    }

    /// Snapshot of all capabilities, sorted by name for stable
    /// announcements.
    pub fn describe(&self) -> Vec<Capability> {
        let caps = self.capabilities.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<Capability> = caps.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Add or replace a capability after construction. Serialized
    /// against concurrent reads by the registry lock.
    pub fn register(&self, capability: Capability) {
        let mut caps = self.capabilities.write().unwrap_or_else(|e| e.into_inner());
        caps.insert(capability.name.clone(), capability);
    }

    /// Number of registered capabilities.
    pub fn len(&self) -> usize {
        let caps = self.capabilities.read().unwrap_or_else(|e| e.into_inner());
        caps.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A remote agent as observed on the bus.
#[derive(Debug, Clone)]
pub struct RemoteAgent {
    /// The agent's bus identity.
    pub agent_id: String,
    /// Human-readable name from the announcement.
    pub name: String,
    /// Capabilities the agent advertised.
    pub capabilities: Vec<Capability>,
    /// When the advertisement was last observed.
    pub announced_at: DateTime<Utc>,
}

/// Thread-safe directory of all remote agents observed on the bus.
#[derive(Clone, Default)]
pub struct AgentDirectory {
    agents: Arc<RwLock<HashMap<String, RemoteAgent>>>,
}

impl AgentDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observed advertisement. Returns true when this is the
    /// first time the agent was seen.
    pub fn observe(
        &self,
        agent_id: impl Into<String>,
        name: impl Into<String>,
        capabilities: Vec<Capability>,
    ) -> bool {
        let agent_id = agent_id.into();
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        agents
            .insert(
                agent_id.clone(),
                RemoteAgent {
                    agent_id,
                    name: name.into(),
                    capabilities,
                    announced_at: Utc::now(),
                },
            )
            .is_none()
    }

    /// Snapshot of a specific agent.
    pub fn get(&self, agent_id: &str) -> Option<RemoteAgent> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents.get(agent_id).cloned()
    }

    /// All observed agents.
    pub fn all(&self) -> Vec<RemoteAgent> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents.values().cloned().collect()
    }

    /// All agents advertising the named capability.
    pub fn find_capability(&self, name: &str) -> Vec<RemoteAgent> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents
            .values()
            .filter(|a| a.capabilities.iter().any(|c| c.name == name))
            .cloned()
            .collect()
    }

    /// Forget an agent.
    pub fn remove(&self, agent_id: &str) -> Option<RemoteAgent> {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        agents.remove(agent_id)
    }

    /// Number of observed agents.
    pub fn len(&self) -> usize {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents.len()
    }

    /// Whether nothing has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
