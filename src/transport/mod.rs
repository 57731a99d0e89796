//! Telemetry transport abstraction.
//!
//! The ingest bridge consumes telemetry through [`TelemetryTransport`], a
//! minimal publish/subscribe interface modelled on an MQTT client:
//! connection state, topic subscription with a QoS level, unsubscription,
//! and publishing. Messages are delivered through a [`Subscription`]
//! stream rather than a callback.
//!
//! [`MqttTransport`] talks to a network broker; [`LocalTransport`] is an
//! in-process broker for running without one and for tests.

pub mod local;
pub mod mqtt;
mod routes;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;

pub use local::LocalTransport;
pub use mqtt::{MqttConfig, MqttTransport};

/// Delivery guarantee requested for a subscription or publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QoS {
    /// Fire and forget; may be dropped under load.
    #[default]
    AtMostOnce,
    /// Delivered at least once.
    AtLeastOnce,
    /// Delivered exactly once.
    ExactlyOnce,
}

impl QoS {
    /// Maps an MQTT numeric level (0, 1, 2) to a `QoS`.
    #[must_use]
    pub const fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }

    /// Returns the MQTT numeric level.
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// One message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryMessage {
    /// Concrete topic the message was published on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Bytes,
}

/// Stream of messages for one subscribed topic filter.
///
/// Ends (yields `None`) once the transport drops the subscription, for
/// example after [`TelemetryTransport::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    messages: mpsc::Receiver<TelemetryMessage>,
}

impl Subscription {
    /// Wraps a receiver fed by a transport implementation.
    #[must_use]
    pub fn new(topic: impl Into<String>, messages: mpsc::Receiver<TelemetryMessage>) -> Self {
        Self {
            topic: topic.into(),
            messages,
        }
    }

    /// Topic filter this subscription was created for.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next message.
    pub async fn recv(&mut self) -> Option<TelemetryMessage> {
        self.messages.recv().await
    }
}

/// Publish/subscribe client used by the ingest bridge.
///
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait TelemetryTransport: Send + Sync + fmt::Debug {
    /// Returns `true` while the transport has a live broker connection.
    fn is_connected(&self) -> bool;

    /// Subscribes to a topic filter.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] when disconnected, or
    /// [`TransportError::SubscribeFailed`] if the broker refuses.
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<Subscription, TransportError>;

    /// Drops every subscription for a topic filter.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] when disconnected, or
    /// [`TransportError::UnsubscribeFailed`] if the broker refuses.
    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Publishes a payload on a topic.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] when disconnected, or
    /// [`TransportError::PublishFailed`] if the broker refuses.
    async fn publish(&self, topic: &str, qos: QoS, payload: Bytes) -> Result<(), TransportError>;
}
