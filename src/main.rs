//! sensor-hub server entry point.
//!
//! Connects the telemetry transport (an MQTT broker when `MQTT_BROKER` is
//! set), starts the hub event loop, the ingest bridge, and the Axum HTTP server
//! with REST and WebSocket endpoints, then shuts them down in order on
//! SIGINT/SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};

use sensor_hub::api;
use sensor_hub::app_state::AppState;
use sensor_hub::bridge::IngestBridge;
use sensor_hub::config::GatewayConfig;
use sensor_hub::hub::Hub;
use sensor_hub::logging::init_tracing;
use sensor_hub::persistence::{DiscardSink, PostgresReadingSink, ReadingSink};
use sensor_hub::transport::{LocalTransport, MqttTransport, TelemetryTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("loading configuration")?;
    init_tracing(&config.log_level, config.log_format);
    info!(addr = %config.listen_addr, "starting sensor-hub");

    // Hub
    let hub_shutdown = CancellationToken::new();
    let (hub, hub_loop) = Hub::new(config.hub_command_capacity, info_span!("hub"));
    let hub_task = tokio::spawn(hub_loop.run(hub_shutdown.clone()));

    // Telemetry transport + persistence
    let (transport, mqtt): (Arc<dyn TelemetryTransport>, Option<Arc<MqttTransport>>) =
        match &config.mqtt {
            Some(mqtt_config) => {
                let mqtt = Arc::new(MqttTransport::start(
                    mqtt_config,
                    info_span!("mqtt", broker = %mqtt_config.host, port = mqtt_config.port),
                ));
                if !mqtt.wait_connected(mqtt_config.connect_timeout).await {
                    mqtt.close().await;
                    anyhow::bail!(
                        "MQTT broker {}:{} not reachable within {:?}",
                        mqtt_config.host,
                        mqtt_config.port,
                        mqtt_config.connect_timeout
                    );
                }
                info!(client_id = %mqtt_config.client_id, "MQTT transport connected");
                (Arc::clone(&mqtt) as Arc<dyn TelemetryTransport>, Some(mqtt))
            }
            None => {
                info!("MQTT_BROKER not set, using the in-process transport");
                (Arc::new(LocalTransport::new()), None)
            }
        };
    let sink: Arc<dyn ReadingSink> = if config.persistence_enabled {
        let sink = PostgresReadingSink::connect(&config)
            .await
            .context("connecting to database")?;
        info!("persistence enabled");
        Arc::new(sink)
    } else {
        info!("persistence disabled, readings will be discarded");
        Arc::new(DiscardSink)
    };

    // Ingest bridge
    let shutdown = CancellationToken::new();
    let bridge = IngestBridge::new(
        Arc::clone(&transport),
        hub.clone(),
        sink,
        config.bridge_config(),
        info_span!("bridge", topic = %config.telemetry_topic),
    );
    let bridge_state = bridge.state();
    let bridge_task = tokio::spawn(bridge.run(shutdown.clone()));

    let app_state = AppState {
        hub,
        transport,
        telemetry_topic: config.telemetry_topic.clone(),
        telemetry_qos: config.telemetry_qos,
        bridge_state,
        session_config: config.session_config(),
        session_span: info_span!("sessions"),
    };

    let app = api::build_app(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding to {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "server listening");

    // Bridge drains before the hub stops so late readings can still fan
    // out. The broker connection closes once the bridge has unsubscribed.
    // Stopping the hub closes every session, which lets the server's
    // graceful shutdown finish.
    let stopping = shutdown.clone();
    let teardown = tokio::spawn(async move {
        stopping.cancelled().await;
        match bridge_task.await {
            Ok(Ok(())) => info!("ingest bridge stopped"),
            Ok(Err(err)) => warn!(error = %err, "ingest bridge stopped with error"),
            Err(err) => warn!(error = %err, "ingest bridge task failed"),
        }
        if let Some(mqtt) = mqtt {
            mqtt.close().await;
        }
        hub_shutdown.cancel();
        if let Err(err) = hub_task.await {
            warn!(error = %err, "hub task failed");
        }
    });

    let signal = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            signal.cancel();
        })
        .await
        .context("running server");

    shutdown.cancel();
    if let Err(err) = teardown.await {
        warn!(error = %err, "teardown task failed");
    }
    served?;
    info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
