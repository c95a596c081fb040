//! Room Coordinator
//!
//! WebSocket signaling relay for two-party telehealth consultations.
//!
//! # Listeners
//!
//! - Signaling WebSocket at `/signaling` (`RC_BIND_ADDRESS`, default 0.0.0.0:8443)
//! - Probes and Prometheus metrics (`RC_HEALTH_BIND_ADDRESS`, default 0.0.0.0:8081)
//!
//! Both listeners are bound before readiness is reported, so a bad address
//! fails startup instead of leaving a half-running process. On SIGTERM or
//! Ctrl+C readiness drops first, rooms drain, then the listeners stop.

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use room_coordinator::actors::RoomCoordinatorActorHandle;
use room_coordinator::config::Config;
use room_coordinator::observability::{health_router, init_metrics_recorder, HealthState};
use room_coordinator::ws::{signaling_router, SignalingState};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time rooms get to stop once shutdown starts.
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Grace period for in-flight socket closes after cancellation.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_coordinator=debug,rc=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading configuration")?;
    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        max_rooms = config.max_rooms,
        require_auth_token = config.require_auth_token,
        "Room Coordinator starting"
    );

    // Installed before anything records a metric.
    let prometheus = init_metrics_recorder()
        .map_err(anyhow::Error::msg)
        .context("installing Prometheus recorder")?;

    let health = Arc::new(HealthState::new());
    let coordinator = RoomCoordinatorActorHandle::new(
        config.instance_id.clone(),
        usize::try_from(config.max_rooms).context("RC_MAX_ROOMS")?,
    );

    let probes_app = health_router(Arc::clone(&health)).route(
        "/metrics",
        get(move || {
            let prometheus = prometheus.clone();
            async move { prometheus.render() }
        }),
    );
    let signaling_app = signaling_router(SignalingState {
        coordinator: coordinator.clone(),
        require_auth_token: config.require_auth_token,
    })
    .layer(TraceLayer::new_for_http());

    let probes_listener = bind("probes", &config.health_bind_address).await?;
    let signaling_listener = bind("signaling", &config.bind_address).await?;

    serve("probes", probes_listener, probes_app, coordinator.child_token());
    serve(
        "signaling",
        signaling_listener,
        signaling_app,
        coordinator.child_token(),
    );

    health.accepting();
    info!("Room Coordinator accepting joins");

    shutdown_signal().await;
    info!("Shutdown signal received, draining rooms");
    health.draining();

    if let Err(e) = coordinator.shutdown(DRAIN_DEADLINE).await {
        warn!(error = %e, "Room drain incomplete");
    }
    coordinator.cancel();
    tokio::time::sleep(CLOSE_GRACE).await;

    info!("Room Coordinator stopped");
    Ok(())
}

async fn bind(name: &'static str, address: &str) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("binding {name} listener to {address}"))?;
    info!(listener = name, addr = %address, "Listener bound");
    Ok(listener)
}

/// Serve `app` on `listener` until `stop` is cancelled.
fn serve(name: &'static str, listener: TcpListener, app: Router, stop: CancellationToken) {
    tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await;
        match result {
            Ok(()) => info!(listener = name, "Server stopped"),
            Err(e) => error!(listener = name, error = %e, "Server failed"),
        }
    });
}

/// Resolves on Ctrl+C or SIGTERM. If a handler cannot be installed that
/// source is ignored and the other one still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
