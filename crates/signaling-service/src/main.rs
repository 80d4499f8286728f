//! Mesh signaling coordinator
//!
//! # Servers
//!
//! - HTTP server for client signaling: `GET /ws`, `POST /rooms`, `GET /rooms/:id`
//!   (default: 0.0.0.0:8443)
//! - HTTP server for health endpoints and `/metrics` (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing and the Prometheus metrics recorder
//! 3. Start the room directory (`RoomControllerActorHandle`)
//! 4. Start the health server
//! 5. Start the signaling server
//! 6. Wait for shutdown signal, then drain

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use signaling_service::actors::{ActorMetrics, RoomControllerActorHandle};
use signaling_service::config::Config;
use signaling_service::identity::HmacIdentityVerifier;
use signaling_service::observability::{health_router, init_metrics_recorder, HealthState};
use signaling_service::transport::{self, AppState};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Grace period handed to the room directory on shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration first: it decides the log format.
    let config = Config::from_env();
    let log_json = config.as_ref().is_ok_and(|c| c.log_json);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "signaling_service=debug,tower_http=debug".into());
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting signaling coordinator");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        max_rooms = config.max_rooms,
        room_capacity = config.room.capacity,
        heartbeat_interval_ms = config.room.heartbeat_interval.as_millis(),
        heartbeat_timeout_multiplier = config.room.heartbeat_timeout_multiplier,
        reconnect_grace_period_secs = config.room.reconnect_grace_period.as_secs(),
        renegotiation_debounce_ms = config.room.renegotiation_debounce.as_millis(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded.
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let actor_metrics = ActorMetrics::new();
    let health_state = Arc::new(HealthState::new(Arc::clone(&actor_metrics)));

    let controller_handle = RoomControllerActorHandle::new(
        config.instance_id.clone(),
        config.max_rooms,
        config.room,
        Arc::clone(&actor_metrics),
    );
    info!("Room directory started");

    let shutdown_token = controller_handle.child_token();

    // Health server (MUST bind, fail startup otherwise)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;
    let health_app = health_router(Arc::clone(&health_state), Some(prometheus_handle));
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Signaling server
    let bind_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;
    let app = transport::router(AppState {
        controller: controller_handle.clone(),
        verifier: Arc::new(HmacIdentityVerifier::new(&config.identity_secret)),
        outbound_queue_capacity: config.outbound_queue_capacity,
    });
    let listener = tokio::net::TcpListener::bind(bind_addr).await.map_err(|e| {
        error!(error = %e, addr = %bind_addr, "Failed to bind signaling server");
        format!("Failed to bind signaling server to {bind_addr}: {e}")
    })?;

    let server_shutdown = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %bind_addr, "Signaling server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_shutdown.cancelled().await;
            info!("Signaling server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Signaling server failed");
        }
    });

    health_state.set_ready();
    info!("Signaling coordinator running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    health_state.set_not_ready();

    // Room workers tell their members to reconnect elsewhere, then the
    // listeners close.
    if let Err(e) = controller_handle.shutdown(SHUTDOWN_DEADLINE).await {
        warn!(error = %e, "Room directory shutdown error");
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    info!(
        participants = actor_metrics.participant_count(),
        "Signaling coordinator shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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
