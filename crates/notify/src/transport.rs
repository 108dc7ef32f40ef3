//! Transport trait and in-process implementations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};

use crate::error::TransportError;
use crate::event::Channel;

/// A message as handed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub channel: Channel,
    pub event: String,
    pub payload: serde_json::Value,
}

/// Real-time delivery to subscribers of a channel.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(
        &self,
        channel: &Channel,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), TransportError>;
}

/// Fan-out to in-process subscribers over a tokio broadcast channel.
///
/// Subscribers that fall behind by more than the buffer lose the oldest
/// messages; nobody listening is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastTransport {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastTransport {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self { sender }
    }

    /// Receives every notification published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl Transport for BroadcastTransport {
    async fn publish(
        &self,
        channel: &Channel,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), TransportError> {
        let _ = self.sender.send(Notification {
            channel: *channel,
            event: event.to_string(),
            payload,
        });
        Ok(())
    }
}

/// Records every delivery; for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    delivered: Arc<Mutex<Vec<Notification>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following publish fail until switched back.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.delivered.lock().await.clone()
    }

    /// Deliveries with the given event name, in delivery order.
    pub async fn named(&self, event: &str) -> Vec<Notification> {
        self.delivered
            .lock()
            .await
            .iter()
            .filter(|n| n.event == event)
            .cloned()
            .collect()
    }

    pub async fn clear(&self) {
        self.delivered.lock().await.clear();
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(
        &self,
        channel: &Channel,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Delivery {
                channel: channel.to_string(),
                event: event.to_string(),
                reason: "transport offline".to_string(),
            });
        }

        self.delivered.lock().await.push(Notification {
            channel: *channel,
            event: event.to_string(),
            payload,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let transport = BroadcastTransport::new(8);
        let mut first = transport.subscribe();
        let mut second = transport.subscribe();
        assert_eq!(transport.subscriber_count(), 2);

        transport
            .publish(&Channel::Global, "stock:low", serde_json::json!({"qty": 1}))
            .await
            .unwrap();

        assert_eq!(first.recv().await.unwrap().event, "stock:low");
        assert_eq!(second.recv().await.unwrap().channel, Channel::Global);
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_ok() {
        let transport = BroadcastTransport::new(8);
        let result = transport
            .publish(&Channel::Global, "stock:low", serde_json::json!({}))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn in_memory_transport_records_and_fails_on_demand() {
        let transport = InMemoryTransport::new();
        transport
            .publish(&Channel::Global, "a", serde_json::json!(1))
            .await
            .unwrap();

        transport.set_fail(true);
        let err = transport
            .publish(&Channel::Global, "b", serde_json::json!(2))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Delivery { .. }));

        let delivered = transport.notifications().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].event, "a");
    }
}
