//! MQTT broker client.
//!
//! [`MqttTransport`] implements [`TelemetryTransport`] on a `rumqttc`
//! [`AsyncClient`]. A background task polls the client's event loop: it
//! tracks the connection from `ConnAck` and connection errors, restores
//! subscriptions after a reconnect without a persistent session, and routes
//! incoming publishes to the matching [`Subscription`] channels.
//!
//! `rumqttc` reconnects on the next poll after a failure; the driver waits
//! [`RECONNECT_DELAY`] between attempts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish,
};
use tokio::sync::{RwLock, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, debug, info, warn};

use super::local::DEFAULT_BUFFER;
use super::routes::{RouteTable, valid_filter, valid_topic};
use super::{QoS, Subscription, TelemetryMessage, TelemetryTransport};
use crate::error::TransportError;

/// Default MQTT broker port.
pub const DEFAULT_PORT: u16 = 1883;

/// Pause between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Capacity of the client → event loop request queue.
const REQUEST_CAPACITY: usize = 64;

/// How long [`MqttTransport::close`] waits for the disconnect to go out.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Broker connection settings.
#[derive(Clone)]
pub struct MqttConfig {
    /// Broker host name or address.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// Client identifier presented to the broker.
    pub client_id: String,
    /// Optional user name.
    pub username: Option<String>,
    /// Optional password; only sent together with a user name.
    pub password: Option<String>,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// How long startup waits for the first `ConnAck`.
    pub connect_timeout: Duration,
}

impl MqttConfig {
    /// Builds a configuration for `broker` with default timeouts and no
    /// credentials. Returns `None` if the broker address is malformed.
    #[must_use]
    pub fn new(broker: &str, client_id: impl Into<String>) -> Option<Self> {
        let (host, port) = parse_broker(broker)?;
        Some(Self {
            host,
            port,
            client_id: client_id.into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        })
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.clone().unwrap_or_default());
        }
        options
    }
}

impl fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("keep_alive", &self.keep_alive)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Splits `tcp://host:port`, `mqtt://host:port`, or `host[:port]` into host
/// and port. The port defaults to [`DEFAULT_PORT`].
#[must_use]
pub fn parse_broker(broker: &str) -> Option<(String, u16)> {
    let trimmed = broker.trim();
    let address = match trimmed.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some(_) => return None,
        None => trimmed,
    };
    let address = address.trim_end_matches('/');
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().ok()?),
        None => (address, DEFAULT_PORT),
    };
    if host.is_empty() || port == 0 {
        return None;
    }
    Some((host.to_string(), port))
}

const fn mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// Network MQTT client.
///
/// Subscribe and publish calls enqueue requests on the client; the broker's
/// acknowledgements are handled by the driver task. Incoming messages for a
/// subscription whose buffer is full are dropped with a warning so the
/// driver keeps answering pings.
pub struct MqttTransport {
    client: AsyncClient,
    connected: watch::Receiver<bool>,
    routes: Arc<RwLock<RouteTable>>,
    buffer: usize,
    driver: TaskTracker,
    stop: CancellationToken,
}

impl MqttTransport {
    /// Creates the client and spawns its event-loop driver. Returns at once;
    /// use [`MqttTransport::wait_connected`] to wait for the broker.
    #[must_use]
    pub fn start(config: &MqttConfig, span: Span) -> Self {
        let (client, eventloop) = AsyncClient::new(config.options(), REQUEST_CAPACITY);
        let (connected_tx, connected) = watch::channel(false);
        let routes = Arc::new(RwLock::new(RouteTable::default()));
        let stop = CancellationToken::new();
        let driver = TaskTracker::new();
        driver.spawn(
            drive(
                eventloop,
                client.clone(),
                Arc::clone(&routes),
                connected_tx,
                stop.clone(),
            )
            .instrument(span),
        );
        driver.close();
        Self {
            client,
            connected,
            routes,
            buffer: DEFAULT_BUFFER,
            driver,
            stop,
        }
    }

    /// Waits up to `timeout` for the broker to accept the connection.
    /// Returns `true` once connected.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut connected = self.connected.clone();
        matches!(
            tokio::time::timeout(timeout, connected.wait_for(|up| *up)).await,
            Ok(Ok(_))
        )
    }

    /// Sends a disconnect to the broker and stops the driver.
    pub async fn close(&self) {
        if let Err(err) = self.client.try_disconnect() {
            debug!(error = %err, "disconnect request not queued");
        }
        if tokio::time::timeout(CLOSE_TIMEOUT, self.driver.wait())
            .await
            .is_err()
        {
            debug!("MQTT driver did not stop after disconnect, cancelling");
        }
        self.stop.cancel();
        self.driver.wait().await;
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

impl fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttTransport")
            .field("connected", &self.is_connected())
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[async_trait]
impl TelemetryTransport for MqttTransport {
    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<Subscription, TransportError> {
        self.ensure_connected()?;
        if !valid_filter(topic) {
            return Err(TransportError::SubscribeFailed {
                topic: topic.to_string(),
                reason: "invalid topic filter".to_string(),
            });
        }
        // Route first so nothing published right after the SubAck is lost.
        let rx = self.routes.write().await.add(topic, qos, self.buffer);
        if let Err(err) = self.client.subscribe(topic, mqtt_qos(qos)).await {
            self.routes.write().await.remove(topic);
            return Err(TransportError::SubscribeFailed {
                topic: topic.to_string(),
                reason: err.to_string(),
            });
        }
        Ok(Subscription::new(topic, rx))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;
        if !self.routes.write().await.remove(topic) {
            return Err(TransportError::UnsubscribeFailed {
                topic: topic.to_string(),
                reason: "not subscribed".to_string(),
            });
        }
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|err| TransportError::UnsubscribeFailed {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }

    async fn publish(&self, topic: &str, qos: QoS, payload: Bytes) -> Result<(), TransportError> {
        self.ensure_connected()?;
        if !valid_topic(topic) {
            return Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: "wildcards are not allowed in publish topics".to_string(),
            });
        }
        self.client
            .publish(topic, mqtt_qos(qos), false, payload.to_vec())
            .await
            .map_err(|err| TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }
}

/// Polls the event loop until a disconnect is sent or `stop` fires.
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    routes: Arc<RwLock<RouteTable>>,
    connected: watch::Sender<bool>,
    stop: CancellationToken,
) {
    let mut failing = false;
    loop {
        let event = tokio::select! {
            () = stop.cancelled() => break,
            event = eventloop.poll() => event,
        };
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    info!(session_present = ack.session_present, "connected to MQTT broker");
                    failing = false;
                    connected.send_replace(true);
                    if !ack.session_present {
                        resubscribe(&client, &routes).await;
                    }
                } else {
                    warn!(code = ?ack.code, "MQTT broker refused connection");
                    connected.send_replace(false);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => deliver(&routes, publish).await,
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("MQTT broker closed the session");
                connected.send_replace(false);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("disconnected from MQTT broker");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                connected.send_replace(false);
                if failing {
                    debug!(error = %err, "MQTT reconnect failed");
                } else {
                    warn!(error = %err, "MQTT connection lost, reconnecting");
                    failing = true;
                }
                tokio::select! {
                    () = stop.cancelled() => break,
                    () = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
    connected.send_replace(false);
}

/// Re-sends every routed filter after a clean-session reconnect. Uses
/// `try_subscribe` because the request queue is drained by the caller.
async fn resubscribe(client: &AsyncClient, routes: &RwLock<RouteTable>) {
    for (filter, qos) in routes.read().await.filters() {
        match client.try_subscribe(filter.as_str(), mqtt_qos(qos)) {
            Ok(()) => debug!(topic = %filter, "resubscribed"),
            Err(err) => warn!(topic = %filter, error = %err, "resubscribe failed"),
        }
    }
}

async fn deliver(routes: &RwLock<RouteTable>, publish: Publish) {
    let targets = routes.read().await.targets(&publish.topic);
    if targets.is_empty() {
        debug!(topic = %publish.topic, "message on unrouted topic");
        return;
    }
    let message = TelemetryMessage {
        topic: publish.topic,
        payload: publish.payload,
    };
    for tx in targets {
        if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(message.clone()) {
            warn!(topic = %message.topic, "subscriber buffer full, message dropped");
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn broker_addresses() {
        assert_eq!(
            parse_broker("tcp://broker.local:1884"),
            Some(("broker.local".to_string(), 1884))
        );
        assert_eq!(
            parse_broker("mqtt://10.0.0.5"),
            Some(("10.0.0.5".to_string(), DEFAULT_PORT))
        );
        assert_eq!(
            parse_broker("localhost:1883/"),
            Some(("localhost".to_string(), 1883))
        );
        assert_eq!(parse_broker("ws://broker:80"), None);
        assert_eq!(parse_broker("broker:notaport"), None);
        assert_eq!(parse_broker("tcp://:1883"), None);
        assert_eq!(parse_broker(""), None);
    }

    #[test]
    fn qos_maps_to_client_levels() {
        assert_eq!(mqtt_qos(QoS::AtMostOnce), rumqttc::QoS::AtMostOnce);
        assert_eq!(mqtt_qos(QoS::AtLeastOnce), rumqttc::QoS::AtLeastOnce);
        assert_eq!(mqtt_qos(QoS::ExactlyOnce), rumqttc::QoS::ExactlyOnce);
    }

    #[test]
    fn debug_hides_the_password() {
        let Some(mut config) = MqttConfig::new("localhost", "hub") else {
            panic!("broker must parse");
        };
        config.username = Some("device".to_string());
        config.password = Some("hunter2".to_string());
        let rendered = format!("{config:?}");
        assert!(rendered.contains("device"));
        assert!(!rendered.contains("hunter2"));
    }

    #[tokio::test]
    async fn unreachable_broker_stays_disconnected() {
        // Port 1 on loopback refuses connections.
        let Some(config) = MqttConfig::new("tcp://127.0.0.1:1", "sensor-hub-test") else {
            panic!("broker must parse");
        };
        let transport = MqttTransport::start(&config, Span::none());

        assert!(!transport.wait_connected(Duration::from_millis(300)).await);
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

        transport.close().await;
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn incoming_publish_reaches_matching_routes() {
        let routes = RwLock::new(RouteTable::default());
        let mut matching = routes
            .write()
            .await
            .add("sensor/#", QoS::AtMostOnce, 4);
        let mut other = routes.write().await.add("device/+", QoS::AtMostOnce, 4);

        let publish = Publish::new("sensor/information", rumqttc::QoS::AtMostOnce, b"{}".to_vec());
        deliver(&routes, publish).await;

        assert_eq!(
            matching.recv().await,
            Some(TelemetryMessage {
                topic: "sensor/information".to_string(),
                payload: Bytes::from_static(b"{}"),
            })
        );
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_route_drops_instead_of_blocking() {
        let routes = RwLock::new(RouteTable::default());
        let mut rx = routes.write().await.add("t", QoS::AtMostOnce, 1);
        for body in [b"1", b"2"] {
            deliver(&routes, Publish::new("t", rumqttc::QoS::AtMostOnce, body.to_vec())).await;
        }
        assert_eq!(
            rx.recv().await.map(|m| m.payload),
            Some(Bytes::from_static(b"1"))
        );
        assert!(rx.try_recv().is_err());
    }
}
