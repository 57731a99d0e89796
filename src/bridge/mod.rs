//! Ingest bridge: telemetry feed → hub broadcast + persistence.
//!
//! For every message on the subscribed topic the bridge:
//!
//! 1. offers the raw payload to the hub's broadcast path without waiting
//!    (a saturated hub drops the message with a warning);
//! 2. decodes a [`TelemetryReading`] (invalid payloads are logged and
//!    dropped);
//! 3. persists the reading in a tracked background task. The task waits
//!    for one of `max_in_flight` semaphore slots, so a burst queues instead
//!    of being dropped; the sink call itself has a per-call timeout.
//!
//! Persistence is at-most-once: failures and timeouts are logged, never
//! retried. On shutdown the bridge stops dispatching, waits for in-flight
//! persistence up to the drain timeout, then unsubscribes.
//!
//! ```text
//! Idle ──subscribe──▶ Subscribed ──shutdown──▶ Draining ──▶ Unsubscribed
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, debug, error, info, warn};
use utoipa::ToSchema;

use crate::domain::TelemetryReading;
use crate::error::{BridgeError, HubError, TransportError};
use crate::hub::Hub;
use crate::persistence::ReadingSink;
use crate::transport::{QoS, TelemetryMessage, TelemetryTransport};

/// Bridge lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    /// Not yet subscribed.
    Idle,
    /// Subscribed and dispatching.
    Subscribed,
    /// Shutdown requested; waiting for in-flight persistence.
    Draining,
    /// Unsubscribe attempted; the bridge is finished.
    Unsubscribed,
}

/// Bridge tuning.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Topic filter to subscribe to.
    pub topic: String,
    /// Subscription QoS.
    pub qos: QoS,
    /// Upper bound on one persistence call.
    pub persist_timeout: Duration,
    /// Upper bound on waiting for in-flight persistence at shutdown.
    pub drain_timeout: Duration,
    /// Maximum concurrent persistence calls. Readings beyond this wait in
    /// their own task for a free slot; ingestion never blocks on them.
    pub max_in_flight: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            topic: "sensor/information".to_string(),
            qos: QoS::AtMostOnce,
            persist_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(10),
            max_in_flight: 64,
        }
    }
}

/// Adapts a [`TelemetryTransport`] into hub broadcasts and sink writes.
#[derive(Debug)]
pub struct IngestBridge {
    transport: Arc<dyn TelemetryTransport>,
    hub: Hub,
    sink: Arc<dyn ReadingSink>,
    config: BridgeConfig,
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    state: watch::Sender<BridgeState>,
    span: Span,
}

impl IngestBridge {
    /// Creates an idle bridge.
    #[must_use]
    pub fn new(
        transport: Arc<dyn TelemetryTransport>,
        hub: Hub,
        sink: Arc<dyn ReadingSink>,
        config: BridgeConfig,
        span: Span,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        let (state, _) = watch::channel(BridgeState::Idle);
        Self {
            transport,
            hub,
            sink,
            config,
            tracker: TaskTracker::new(),
            permits,
            state,
            span,
        }
    }

    /// Returns a receiver that observes lifecycle transitions.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Subscribes, dispatches until `shutdown` fires, drains, and
    /// unsubscribes.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] if the transport is not connected
    /// or refuses the subscription (the bridge stays `Idle`), or if the
    /// final unsubscribe fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), BridgeError> {
        let span = self.span.clone();
        self.serve(shutdown).instrument(span).await
    }

    async fn serve(self, shutdown: CancellationToken) -> Result<(), BridgeError> {
        let topic = self.config.topic.clone();
        if !self.transport.is_connected() {
            error!(%topic, "telemetry transport not connected");
            return Err(TransportError::NotConnected.into());
        }
        let mut subscription = match self.transport.subscribe(&topic, self.config.qos).await {
            Ok(subscription) => subscription,
            Err(err) => {
                error!(%topic, error = %err, "failed to subscribe");
                return Err(err.into());
            }
        };
        self.state.send_replace(BridgeState::Subscribed);
        info!(topic = subscription.topic(), qos = %self.config.qos, "subscribed to topic");

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                message = subscription.recv() => match message {
                    Some(message) => self.dispatch(message),
                    None => {
                        warn!(
                            topic = subscription.topic(),
                            "subscription ended by transport, waiting for shutdown"
                        );
                        shutdown.cancelled().await;
                        break;
                    }
                },
            }
        }
        drop(subscription);

        self.state.send_replace(BridgeState::Draining);
        info!(in_flight = self.tracker.len(), "shutdown signal received, waiting for pending operations");
        self.tracker.close();
        match tokio::time::timeout(self.config.drain_timeout, self.tracker.wait()).await {
            Ok(()) => info!("all pending operations completed"),
            Err(_) => warn!(
                in_flight = self.tracker.len(),
                "shutdown timeout exceeded, some operations may be incomplete"
            ),
        }

        let result = self.transport.unsubscribe(&topic).await;
        self.state.send_replace(BridgeState::Unsubscribed);
        match result {
            Ok(()) => {
                info!(%topic, "unsubscribed from topic");
                Ok(())
            }
            Err(err) => {
                error!(%topic, error = %err, "failed to unsubscribe");
                Err(err.into())
            }
        }
    }

    fn dispatch(&self, message: TelemetryMessage) {
        let TelemetryMessage { topic, payload } = message;
        debug!(%topic, bytes = payload.len(), "telemetry message received");

        match self.hub.try_broadcast(payload.clone()) {
            Ok(()) => {}
            Err(HubError::Saturated) => warn!("broadcast channel full, message dropped"),
            Err(HubError::Closed) => warn!("hub stopped, message not broadcast"),
        }

        let reading = match TelemetryReading::decode(&payload) {
            Ok(reading) => reading,
            Err(err) => {
                warn!(error = %err, "invalid sensor payload");
                return;
            }
        };

        let permits = Arc::clone(&self.permits);
        let sink = Arc::clone(&self.sink);
        let timeout = self.config.persist_timeout;
        self.tracker
            .spawn(persist(permits, sink, reading, timeout).in_current_span());
    }
}

/// Waits for a persistence slot, then stores the reading. The timeout
/// covers only the sink call; time spent queued for a slot is bounded by
/// the drain timeout at shutdown.
async fn persist(
    permits: Arc<Semaphore>,
    sink: Arc<dyn ReadingSink>,
    reading: TelemetryReading,
    timeout: Duration,
) {
    let Ok(_permit) = permits.acquire_owned().await else {
        warn!("persistence semaphore closed, reading dropped");
        return;
    };
    match tokio::time::timeout(timeout, sink.create(reading)).await {
        Ok(Ok(())) => debug!("sensor data saved"),
        Ok(Err(err)) => error!(error = %err, "failed to save sensor data"),
        Err(_) => warn!(
            timeout_secs = timeout.as_secs(),
            "save operation timed out, reading dropped"
        ),
    }
}
