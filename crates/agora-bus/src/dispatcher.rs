//! Routes validated inbound envelopes to their semantics.
//!
//! The dispatcher owns the in-flight task bookkeeping and the seam to
//! the capability implementation: a [`TaskExecutor`] with exactly one
//! required method. It never knows concrete agent types.

use agora_types::capability::Capability;
use agora_types::envelope::{Envelope, EnvelopeKind};
use agora_types::error::AgoraError;
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::client::Bus;
use crate::correlator::Correlator;
use crate::error::BusError;
use crate::registry::{AgentDirectory, CapabilityRegistry};

/// The one method a capability implementation must provide.
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    /// Execute a supported task type against its input data.
    async fn execute(&self, task_type: &str, data: &Map<String, Value>)
        -> Result<Value, AgoraError>;
}

/// Per-agent envelope router.
pub struct Dispatcher {
    agent_name: String,
    bus: Arc<Bus>,
    correlator: Arc<Correlator>,
    registry: CapabilityRegistry,
    directory: AgentDirectory,
    executor: Arc<dyn TaskExecutor>,
    /// Task ids currently executing locally. Introspection only.
    active: Mutex<HashSet<String>>,
}

impl Dispatcher {
    /// Wire a dispatcher over injected collaborators.
    pub fn new(
        agent_name: impl Into<String>,
        bus: Arc<Bus>,
        correlator: Arc<Correlator>,
        registry: CapabilityRegistry,
        directory: AgentDirectory,
        executor: Arc<dyn TaskExecutor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            agent_name: agent_name.into(),
            bus,
            correlator,
            registry,
            directory,
            executor,
            active: Mutex::new(HashSet::new()),
        })
    }

    /// Register this dispatcher's handlers on the bus, one per kind it
    /// understands.
    pub fn install_handlers(self: &Arc<Self>) {
        let dispatcher = Arc::clone(self);
        self.bus.register_handler(
            EnvelopeKind::TaskRequest,
            Arc::new(move |env| {
                let dispatcher = Arc::clone(&dispatcher);
                Box::pin(async move { dispatcher.handle_task_request(env).await })
            }),
        );

        let dispatcher = Arc::clone(self);
        self.bus.register_handler(
            EnvelopeKind::TaskResponse,
            Arc::new(move |env| {
                let dispatcher = Arc::clone(&dispatcher);
                Box::pin(async move { dispatcher.handle_task_response(env) })
            }),
        );

        let dispatcher = Arc::clone(self);
        self.bus.register_handler(
            EnvelopeKind::CapabilityQuery,
            Arc::new(move |env| {
                let dispatcher = Arc::clone(&dispatcher);
                Box::pin(async move { dispatcher.handle_capability_query(env).await })
            }),
        );

        let dispatcher = Arc::clone(self);
        self.bus.register_handler(
            EnvelopeKind::CapabilityAnnouncement,
            Arc::new(move |env| {
                let dispatcher = Arc::clone(&dispatcher);
                Box::pin(async move { dispatcher.handle_capability_announcement(env).await })
            }),
        );

        let dispatcher = Arc::clone(self);
        self.bus.register_handler(
            EnvelopeKind::CapabilityResponse,
            Arc::new(move |env| {
                let dispatcher = Arc::clone(&dispatcher);
                Box::pin(async move { dispatcher.handle_capability_response(env) })
            }),
        );
    }

    /// Broadcast this agent's capability list so peers can build their
    /// routing tables. Expects no response.
    pub async fn announce(&self) -> Result<(), BusError> {
        let envelope = Envelope::new(
            EnvelopeKind::CapabilityAnnouncement,
            self.bus.agent_id(),
            agora_types::envelope::BROADCAST_RECIPIENT,
        )
        .with_payload(self.advertisement());
        self.bus.broadcast(envelope).await?;
        info!(agent_id = %self.bus.agent_id(), "Announced capabilities");
        Ok(())
    }

    fn advertisement(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert(
            "agent_name".to_string(),
            Value::from(self.agent_name.clone()),
        );
        payload.insert(
            "capabilities".to_string(),
            serde_json::to_value(self.registry.describe())
                .unwrap_or(Value::Array(Vec::new())),
        );
        payload.insert("status".to_string(), Value::from("active"));
        payload.insert(
            "public_key".to_string(),
            Value::from(self.bus.gate().public_key_b64()),
        );
        payload
    }

    /// Number of inbound tasks currently executing.
    pub fn active_tasks(&self) -> usize {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.len()
    }

    /// Execute an inbound task request and answer with a response
    /// envelope in every case.
    async fn handle_task_request(&self, envelope: Envelope) {
        let task_id = envelope
            .payload_str("task_id")
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let requester = envelope.sender.clone();

        let Some(task_type) = envelope.payload_str("task_type").map(str::to_string) else {
            self.send_task_response(&requester, &task_id, Err("missing task_type".to_string()))
                .await;
            return;
        };

        if !self.registry.supports(&task_type) {
            debug!(task_id = %task_id, task_type = %task_type, "Unsupported capability requested");
            self.send_task_response(
                &requester,
                &task_id,
                Err(format!("Capability '{task_type}' not supported")),
            )
            .await;
            return;
        }

        let data = match envelope.payload_field("data") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.insert(task_id.clone());
        }
        // A panicking executor must neither leak the active entry nor
        // leave the requester without a response.
        let outcome = std::panic::AssertUnwindSafe(self.executor.execute(&task_type, &data))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(AgoraError::Internal(format!(
                    "execution of '{task_type}' panicked"
                )))
            })
            .map_err(|e| e.to_string());
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.remove(&task_id);
        }

        self.send_task_response(&requester, &task_id, outcome).await;
    }

    /// Forward a response to the correlator. Unknown or already-resolved
    /// ids are silently ignored there.
    fn handle_task_response(&self, envelope: Envelope) {
        let Some(task_id) = envelope.payload_str("task_id").map(str::to_string) else {
            warn!(sender = %envelope.sender, "Task response without task_id, dropping");
            return;
        };
        self.correlator.resolve(&task_id, envelope.payload);
    }

    /// Answer a capability query with this agent's current registry.
    async fn handle_capability_query(&self, envelope: Envelope) {
        let response = Envelope::new(
            EnvelopeKind::CapabilityResponse,
            self.bus.agent_id(),
            &envelope.sender,
        )
        .with_payload(self.advertisement());
        if let Err(e) = self.bus.send(response).await {
            error!(error = %e, recipient = %envelope.sender, "Failed to answer capability query");
        }
    }

    /// Record a peer's advertisement in the local directory. The local
    /// registry is never touched — an agent's own announcement cannot
    /// change what it can do.
    async fn handle_capability_announcement(&self, envelope: Envelope) {
        let name = envelope
            .payload_str("agent_name")
            .unwrap_or(&envelope.sender)
            .to_string();
        let capabilities: Vec<Capability> = envelope
            .payload_field("capabilities")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let first_contact = self
            .directory
            .observe(envelope.sender.clone(), name, capabilities);
        debug!(
            agent_id = %self.bus.agent_id(),
            peer = %envelope.sender,
            first_contact,
            "Observed capability announcement"
        );

        // Welcome a newly seen peer with a directed capability response
        // so it learns this agent's identity and key in turn. Directed,
        // so no announcement storm.
        if first_contact {
            let welcome = Envelope::new(
                EnvelopeKind::CapabilityResponse,
                self.bus.agent_id(),
                &envelope.sender,
            )
            .with_payload(self.advertisement());
            if let Err(e) = self.bus.send(welcome).await {
                warn!(error = %e, peer = %envelope.sender, "Failed to send welcome response");
            }
        }
    }

    /// Record a directed capability response in the directory.
    pub(crate) fn handle_capability_response(&self, envelope: Envelope) {
        let name = envelope
            .payload_str("agent_name")
            .unwrap_or(&envelope.sender)
            .to_string();
        let capabilities: Vec<Capability> = envelope
            .payload_field("capabilities")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        self.directory
            .observe(envelope.sender.clone(), name, capabilities);
    }

    async fn send_task_response(
        &self,
        recipient: &str,
        task_id: &str,
        outcome: Result<Value, String>,
    ) {
        let mut payload = Map::new();
        payload.insert("task_id".to_string(), Value::from(task_id));
        match outcome {
            Ok(result) => {
                payload.insert("success".to_string(), Value::from(true));
                payload.insert("result".to_string(), result);
            }
            Err(message) => {
                payload.insert("success".to_string(), Value::from(false));
                payload.insert("error".to_string(), Value::from(message));
            }
        }

        let response = Envelope::new(EnvelopeKind::TaskResponse, self.bus.agent_id(), recipient)
            .with_payload(payload);
        if let Err(e) = self.bus.send(response).await {
            error!(error = %e, task_id, recipient, "Failed to send task response");
        }
    }
}
