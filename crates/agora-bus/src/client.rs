//! The per-agent bus client.
//!
//! A [`Bus`] owns exactly one transport subscription covering the
//! agent's private channel and the shared broadcast channel, signs
//! everything it publishes, and runs the inbound dispatch loop: parse,
//! admit through the [`SecurityGate`], hand to the handler registered
//! for the envelope's kind. One handler per kind, last registration
//! wins; kinds without a handler are logged and dropped.

use agora_types::envelope::{Envelope, EnvelopeKind, BROADCAST_RECIPIENT};
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::BusError;
use crate::hooks::EventHooks;
use crate::security::{SecurityGate, ValidationFailure};
use crate::transport::{agent_channel, Subscription, Transport, BROADCAST_CHANNEL};

/// An inbound message handler for one envelope kind.
pub type HandlerFn = Arc<dyn Fn(Envelope) -> BoxFuture<'static, ()> + Send + Sync>;

/// Per-agent transport client.
pub struct Bus {
    agent_id: String,
    transport: Arc<dyn Transport>,
    gate: Arc<SecurityGate>,
    hooks: Arc<dyn EventHooks>,
    handlers: DashMap<EnvelopeKind, HandlerFn>,
    running: AtomicBool,
    listen_task: Mutex<Option<JoinHandle<()>>>,
}

impl Bus {
    /// Create a bus for one agent identity over an injected transport
    /// and security gate.
    pub fn new(
        agent_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        gate: Arc<SecurityGate>,
        hooks: Arc<dyn EventHooks>,
    ) -> Arc<Self> {
        Arc::new(Self {
            agent_id: agent_id.into(),
            transport,
            gate,
            hooks,
            handlers: DashMap::new(),
            running: AtomicBool::new(false),
            listen_task: Mutex::new(None),
        })
    }

    /// The agent identity this bus speaks for.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// The security gate guarding this bus.
    pub fn gate(&self) -> &Arc<SecurityGate> {
        &self.gate
    }

    /// Establish the subscription and start the inbound loop.
    ///
    /// A transport failure here is fatal and propagates — an agent that
    /// cannot reach the bus must not come up half-connected.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), BusError> {
        let channels = [
            agent_channel(&self.agent_id),
            BROADCAST_CHANNEL.to_string(),
        ];
        let subscription = self.transport.subscribe(&channels).await?;

        self.running.store(true, Ordering::SeqCst);
        let bus = Arc::clone(self);
        let handle = tokio::spawn(async move {
            bus.listen(subscription).await;
        });
        {
            let mut task = self.listen_task.lock().unwrap_or_else(|e| e.into_inner());
            *task = Some(handle);
        }

        info!(agent_id = %self.agent_id, "Bus initialized");
        Ok(())
    }

    /// Associate a handler with an envelope kind. Last registration wins.
    pub fn register_handler(&self, kind: EnvelopeKind, handler: HandlerFn) {
        self.handlers.insert(kind, handler);
        debug!(agent_id = %self.agent_id, kind = %kind, "Registered handler");
    }

    /// Sign and publish an envelope. Never waits for a response.
    ///
    /// The sender is stamped with this agent's identity if absent; the
    /// timestamp was stamped at construction. The target channel is the
    /// recipient's private channel, or the broadcast channel for `"*"`.
    pub async fn send(&self, mut envelope: Envelope) -> Result<(), BusError> {
        if envelope.sender.is_empty() {
            envelope.sender = self.agent_id.clone();
        }
        envelope.signature = Some(self.gate.sign(&envelope)?);

        let channel = if envelope.is_broadcast() {
            BROADCAST_CHANNEL.to_string()
        } else {
            agent_channel(&envelope.recipient)
        };
        let bytes = envelope.encode()?;
        self.transport.publish(&channel, bytes).await?;

        debug!(
            agent_id = %self.agent_id,
            envelope_id = %envelope.id,
            kind = %envelope.kind,
            recipient = %envelope.recipient,
            "Sent envelope"
        );
        Ok(())
    }

    /// Publish an envelope to every subscribed agent.
    pub async fn broadcast(&self, mut envelope: Envelope) -> Result<(), BusError> {
        envelope.recipient = BROADCAST_RECIPIENT.to_string();
        self.send(envelope).await
    }

    /// Inbound dispatch loop. Runs until shutdown or transport hangup;
    /// no single message — malformed, inadmissible, or with a failing
    /// handler — may terminate it.
    async fn listen(self: Arc<Self>, mut subscription: Subscription) {
        info!(agent_id = %self.agent_id, "Listening for bus messages");

        while let Some(bytes) = subscription.next().await {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let envelope = match Envelope::decode(&bytes) {
                Ok(env) => env,
                Err(e) => {
                    error!(agent_id = %self.agent_id, error = %e, "Failed to parse message, skipping");
                    continue;
                }
            };

            match self.gate.admit(&envelope) {
                Ok(()) => {}
                Err(ValidationFailure::SelfOriginated) => continue,
                Err(reason) => {
                    warn!(
                        agent_id = %self.agent_id,
                        sender = %envelope.sender,
                        kind = %envelope.kind,
                        ?reason,
                        "Dropping inadmissible envelope"
                    );
                    continue;
                }
            }

            self.hooks.on_message_observed(&envelope);

            match self.handlers.get(&envelope.kind) {
                Some(entry) => {
                    // Run the handler in its own task so a panic inside
                    // it cannot take the loop down with it.
                    let handler = Arc::clone(entry.value());
                    drop(entry);
                    tokio::spawn((*handler)(envelope));
                }
                None => {
                    warn!(
                        agent_id = %self.agent_id,
                        kind = %envelope.kind,
                        "No handler registered for envelope kind, dropping"
                    );
                }
            }
        }

        info!(agent_id = %self.agent_id, "Bus listener stopped");
    }

    /// Stop the loop and release the subscription. Safe to call even if
    /// `initialize` never ran or partially failed.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = {
            let mut task = self.listen_task.lock().unwrap_or_else(|e| e.into_inner());
            task.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }
        self.handlers.clear();
        info!(agent_id = %self.agent_id, "Bus shut down");
    }

    /// Whether the inbound loop is up.
    pub fn is_connected(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of kinds with a registered handler.
    pub fn handlers_registered(&self) -> usize {
        self.handlers.len()
    }
}
