//! Transport abstraction — the pub/sub medium the bus rides on.
//!
//! The bus depends only on `publish(channel, bytes)` and
//! `subscribe(channels) -> stream of bytes`. The backing medium is an
//! external collaborator; this crate ships a process-local hub
//! ([`crate::memory::InProcessTransport`]) and a TCP relay
//! ([`crate::relay::RelayTransport`]).

use crate::error::BusError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// The shared channel delivering a message to all subscribed agents.
pub const BROADCAST_CHANNEL: &str = "bus:broadcast";

/// The private channel for a specific agent identity.
pub fn agent_channel(agent_id: &str) -> String {
    format!("bus:agent:{agent_id}")
}

/// A live subscription: an ordered stream of raw message bytes covering
/// every channel it was opened for.
pub struct Subscription {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Subscription {
    /// Wrap a receiver fed by a transport implementation.
    pub fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }

    /// Next raw message, or `None` once the transport side hung up.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// Abstract publish/subscribe channel provider.
///
/// Delivery is at-least-once at best; implementations may drop messages
/// under backpressure. Messages published to one channel by one sender
/// are delivered to a given subscriber in publish order; nothing is
/// guaranteed across channels or senders.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Publish raw bytes to a channel. Fire-and-forget.
    async fn publish(&self, channel: &str, bytes: Vec<u8>) -> Result<(), BusError>;

    /// Open a subscription covering the given channels.
    async fn subscribe(&self, channels: &[String]) -> Result<Subscription, BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_naming() {
        assert_eq!(agent_channel("calc-1"), "bus:agent:calc-1");
        assert_eq!(BROADCAST_CHANNEL, "bus:broadcast");
    }
}
