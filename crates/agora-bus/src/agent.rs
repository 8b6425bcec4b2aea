//! Per-agent façade over the bus, gate, registry, correlator, and
//! dispatcher.
//!
//! Collaborators are injected at construction, so tests can substitute
//! an in-process transport, a strict trust policy, or a tight rate
//! limit without touching the wiring.

use agora_types::capability::Capability;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::client::Bus;
use crate::correlator::{Correlator, TaskRecord};
use crate::dispatcher::{Dispatcher, TaskExecutor};
use crate::error::{BusError, TaskError};
use crate::hooks::{EventHooks, NoopHooks};
use crate::registry::{AgentDirectory, CapabilityRegistry, RemoteAgent};
use crate::security::SecurityGate;
use crate::transport::Transport;

/// Liveness snapshot for ops tooling.
#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    pub connected: bool,
    pub handlers_registered: usize,
    pub pending_tasks: usize,
    pub active_tasks: usize,
}

/// One agent: an identity on the bus plus the capability implementation
/// behind it.
pub struct Agent {
    id: String,
    name: String,
    bus: Arc<Bus>,
    registry: CapabilityRegistry,
    directory: AgentDirectory,
    correlator: Arc<Correlator>,
    dispatcher: Arc<Dispatcher>,
    hooks: Arc<dyn EventHooks>,
}

impl Agent {
    /// Create an agent with a fresh security gate and no persistence
    /// hooks.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        capabilities: Vec<Capability>,
        executor: Arc<dyn TaskExecutor>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let id = id.into();
        let gate = Arc::new(SecurityGate::new(id.clone()));
        Self::with_parts(id, name, capabilities, executor, transport, gate, Arc::new(NoopHooks))
    }

    /// Create an agent from fully injected collaborators.
    pub fn with_parts(
        id: impl Into<String>,
        name: impl Into<String>,
        capabilities: Vec<Capability>,
        executor: Arc<dyn TaskExecutor>,
        transport: Arc<dyn Transport>,
        gate: Arc<SecurityGate>,
        hooks: Arc<dyn EventHooks>,
    ) -> Arc<Self> {
        let id = id.into();
        let name = name.into();
        let bus = Bus::new(id.clone(), transport, gate, Arc::clone(&hooks));
        let registry = CapabilityRegistry::new(capabilities);
        let directory = AgentDirectory::new();
        let correlator = Correlator::new(Arc::clone(&bus), Arc::clone(&hooks));
        let dispatcher = Dispatcher::new(
            name.clone(),
            Arc::clone(&bus),
            Arc::clone(&correlator),
            registry.clone(),
            directory.clone(),
            executor,
        );

        Arc::new(Self {
            id,
            name,
            bus,
            registry,
            directory,
            correlator,
            dispatcher,
            hooks,
        })
    }

    /// Bring the agent up: subscribe, start the inbound loop, announce
    /// capabilities. Transport failure propagates — startup aborts.
    pub async fn initialize(&self) -> Result<(), BusError> {
        self.dispatcher.install_handlers();
        self.bus.initialize().await?;
        self.dispatcher.announce().await?;
        self.hooks
            .on_agent_registered(&self.id, &self.name, &self.registry.describe());
        info!(agent_id = %self.id, name = %self.name, "Agent initialized");
        Ok(())
    }

    /// Stop the inbound loop and release the transport subscription.
    pub async fn shutdown(&self) {
        self.bus.shutdown().await;
        info!(agent_id = %self.id, "Agent shut down");
    }

    /// Send a task to another agent and wait for its result.
    pub async fn send_task(
        &self,
        recipient: &str,
        task_type: &str,
        data: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, TaskError> {
        self.correlator
            .send_task(recipient, task_type, data, timeout)
            .await
    }

    /// Submit a task without waiting; poll with [`Self::poll_result`].
    pub fn submit_task(
        &self,
        recipient: &str,
        task_type: &str,
        data: Map<String, Value>,
        timeout: Duration,
    ) -> String {
        Arc::clone(&self.correlator).submit_task(recipient, task_type, data, timeout)
    }

    /// Current record of a submitted task.
    pub fn poll_result(&self, task_id: &str) -> Option<TaskRecord> {
        self.correlator.poll_result(task_id)
    }

    /// Re-broadcast this agent's capability announcement.
    pub async fn announce(&self) -> Result<(), BusError> {
        self.dispatcher.announce().await
    }

    /// The agent's bus identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The agent's human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This agent's own capability registry.
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Remote agents observed on the bus.
    pub fn directory(&self) -> &AgentDirectory {
        &self.directory
    }

    /// A specific observed peer, if any.
    pub fn peer(&self, agent_id: &str) -> Option<RemoteAgent> {
        self.directory.get(agent_id)
    }

    /// The security gate guarding this agent's bus.
    pub fn gate(&self) -> &Arc<SecurityGate> {
        self.bus.gate()
    }

    /// Liveness snapshot.
    pub fn health(&self) -> AgentHealth {
        AgentHealth {
            connected: self.bus.is_connected(),
            handlers_registered: self.bus.handlers_registered(),
            pending_tasks: self.correlator.pending_count(),
            active_tasks: self.dispatcher.active_tasks(),
        }
    }
}
