//! Process-local transport — a broadcast-channel hub.
//!
//! Agents colocated in one process (and deterministic tests) share the
//! bus through this hub. Each channel name is backed by a tokio
//! broadcast channel; a subscription forwards every covered channel into
//! one ordered stream.

use crate::error::BusError;
use crate::transport::{Subscription, Transport};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

/// Buffered messages per channel before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 256;

/// In-process pub/sub hub.
pub struct InProcessTransport {
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
}

impl InProcessTransport {
    /// Create a new empty hub.
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        let entry = self.channels.entry(channel.to_string()).or_insert_with(|| {
            let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
            tx
        });
        entry.clone()
    }
}

impl Default for InProcessTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn publish(&self, channel: &str, bytes: Vec<u8>) -> Result<(), BusError> {
        // A send error only means no subscriber is listening yet; the
        // medium is best-effort, so that is not a failure.
        let _ = self.sender_for(channel).send(bytes);
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription, BusError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        for channel in channels {
            let mut source = self.sender_for(channel).subscribe();
            let sink = tx.clone();
            let name = channel.clone();
            tokio::spawn(async move {
                loop {
                    match source.recv().await {
                        Ok(bytes) => {
                            if sink.send(bytes).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel = %name, skipped, "Subscriber lagged, messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let hub = InProcessTransport::new();
        let mut sub = hub.subscribe(&["bus:agent:a".to_string()]).await.unwrap();

        hub.publish("bus:agent:a", b"hello".to_vec()).await.unwrap();
        assert_eq!(sub.next().await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_subscription_covers_multiple_channels() {
        let hub = InProcessTransport::new();
        let mut sub = hub
            .subscribe(&["bus:agent:a".to_string(), "bus:broadcast".to_string()])
            .await
            .unwrap();

        hub.publish("bus:broadcast", b"to-all".to_vec()).await.unwrap();
        hub.publish("bus:agent:a", b"to-a".to_vec()).await.unwrap();

        let mut seen = vec![sub.next().await.unwrap(), sub.next().await.unwrap()];
        seen.sort();
        assert_eq!(seen, vec![b"to-a".to_vec(), b"to-all".to_vec()]);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let hub = InProcessTransport::new();
        hub.publish("bus:agent:ghost", b"nobody home".to_vec())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unrelated_channels_are_isolated() {
        let hub = InProcessTransport::new();
        let mut sub_a = hub.subscribe(&["bus:agent:a".to_string()]).await.unwrap();
        let mut sub_b = hub.subscribe(&["bus:agent:b".to_string()]).await.unwrap();

        hub.publish("bus:agent:b", b"for-b".to_vec()).await.unwrap();
        assert_eq!(sub_b.next().await.unwrap(), b"for-b".to_vec());

        // Nothing should show up for a.
        let nothing =
            tokio::time::timeout(std::time::Duration::from_millis(50), sub_a.next()).await;
        assert!(nothing.is_err());
    }
}
