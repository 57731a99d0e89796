//! In-process telemetry broker.
//!
//! [`LocalTransport`] implements [`TelemetryTransport`] without a network
//! broker: subscriptions are channels in a [`RouteTable`] behind a
//! `tokio::sync::RwLock`. Used when no MQTT broker is configured and in
//! tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{RwLock, mpsc};

use super::routes::{RouteTable, valid_filter, valid_topic};
use super::{QoS, Subscription, TelemetryMessage, TelemetryTransport};
use crate::error::TransportError;

/// Default per-subscription buffer.
pub(crate) const DEFAULT_BUFFER: usize = 1024;

/// In-process publish/subscribe broker.
///
/// `QoS::AtMostOnce` publishes drop the message for a subscriber whose
/// buffer is full; higher levels wait for room.
#[derive(Debug)]
pub struct LocalTransport {
    connected: AtomicBool,
    routes: RwLock<RouteTable>,
    buffer: usize,
}

impl LocalTransport {
    /// Creates a connected broker with the default subscription buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    /// Creates a connected broker whose subscriptions buffer up to
    /// `buffer` messages each.
    #[must_use]
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            connected: AtomicBool::new(true),
            routes: RwLock::new(RouteTable::default()),
            buffer: buffer.max(1),
        }
    }

    /// Marks the broker connection as lost. Existing subscriptions stay
    /// registered but nothing new is accepted.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Marks the broker connection as restored.
    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Returns the number of live subscriptions across all filters.
    pub async fn subscription_count(&self) -> usize {
        self.routes.read().await.live_count()
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetryTransport for LocalTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<Subscription, TransportError> {
        self.ensure_connected()?;
        if !valid_filter(topic) {
            return Err(TransportError::SubscribeFailed {
                topic: topic.to_string(),
                reason: "invalid topic filter".to_string(),
            });
        }
        let rx = self.routes.write().await.add(topic, qos, self.buffer);
        Ok(Subscription::new(topic, rx))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;
        if self.routes.write().await.remove(topic) {
            Ok(())
        } else {
            Err(TransportError::UnsubscribeFailed {
                topic: topic.to_string(),
                reason: "not subscribed".to_string(),
            })
        }
    }

    async fn publish(&self, topic: &str, qos: QoS, payload: Bytes) -> Result<(), TransportError> {
        self.ensure_connected()?;
        if !valid_topic(topic) {
            return Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: "wildcards are not allowed in publish topics".to_string(),
            });
        }
        let targets = self.routes.read().await.targets(topic);
        let message = TelemetryMessage {
            topic: topic.to_string(),
            payload,
        };
        for tx in targets {
            match qos {
                QoS::AtMostOnce => {
                    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(message.clone()) {
                        tracing::warn!(topic, "subscriber buffer full, message dropped");
                    }
                }
                QoS::AtLeastOnce | QoS::ExactlyOnce => {
                    let _ = tx.send(message.clone()).await;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    async fn subscribe(transport: &LocalTransport, topic: &str) -> Subscription {
        let Ok(sub) = transport.subscribe(topic, QoS::AtMostOnce).await else {
            panic!("subscribe failed");
        };
        sub
    }

    #[tokio::test]
    async fn publish_reaches_matching_subscribers() {
        let transport = LocalTransport::new();
        let mut exact = subscribe(&transport, "sensor/information").await;
        let mut wildcard = subscribe(&transport, "sensor/#").await;
        let mut other = subscribe(&transport, "device/status").await;

        let result = transport
            .publish("sensor/information", QoS::AtMostOnce, Bytes::from_static(b"{}"))
            .await;
        assert!(result.is_ok());

        let expected = TelemetryMessage {
            topic: "sensor/information".to_string(),
            payload: Bytes::from_static(b"{}"),
        };
        assert_eq!(exact.recv().await, Some(expected.clone()));
        assert_eq!(wildcard.recv().await, Some(expected));
        assert!(other.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnected_transport_refuses_everything() {
        let transport = LocalTransport::new();
        transport.disconnect();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.subscribe("sensor/information", QoS::AtMostOnce).await,
            Err(TransportError::NotConnected)
        ));
        assert_eq!(
            transport
                .publish("sensor/information", QoS::AtMostOnce, Bytes::new())
                .await,
            Err(TransportError::NotConnected)
        );
        transport.connect();
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn unsubscribe_ends_the_stream() {
        let transport = LocalTransport::new();
        let mut sub = subscribe(&transport, "sensor/information").await;
        assert_eq!(transport.subscription_count().await, 1);

        assert!(transport.unsubscribe("sensor/information").await.is_ok());
        assert_eq!(sub.recv().await, None);
        assert_eq!(transport.subscription_count().await, 0);

        assert!(matches!(
            transport.unsubscribe("sensor/information").await,
            Err(TransportError::UnsubscribeFailed { .. })
        ));
    }

    #[tokio::test]
    async fn at_most_once_drops_when_buffer_full() {
        let transport = LocalTransport::with_buffer(1);
        let mut sub = subscribe(&transport, "t").await;
        for payload in [b"1", b"2"] {
            let _ = transport
                .publish("t", QoS::AtMostOnce, Bytes::from_static(payload))
                .await;
        }
        assert_eq!(
            sub.recv().await.map(|m| m.payload),
            Some(Bytes::from_static(b"1"))
        );
        assert!(sub.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_rejects_wildcard_topics() {
        let transport = LocalTransport::new();
        assert!(matches!(
            transport
                .publish("sensor/#", QoS::AtMostOnce, Bytes::new())
                .await,
            Err(TransportError::PublishFailed { .. })
        ));
    }
}
