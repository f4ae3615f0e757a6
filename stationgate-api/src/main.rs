//! stationgate Server Entry Point
//!
//! Loads configuration, opens the message buffer, connects the control
//! plane, and serves the HTTP API until Ctrl-C or SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;

use stationgate_api::broker::{NatsConnector, NatsControlPlane};
use stationgate_api::jobs::{buffer_retention_task, connection_reaper_task, connection_sync_task};
use stationgate_api::telemetry::{init_tracing, TelemetryConfig};
use stationgate_api::{
    create_router, ApiError, ApiResult, AppState, ConnectionService, GatewayConfig,
};
use stationgate_core::{ControlPlane, SystemClock};
use stationgate_storage::open_message_buffer;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::from_env())?;

    let config = GatewayConfig::from_env()?;
    config.validate()?;
    let config = Arc::new(config);

    let buffer = open_message_buffer(&config.buffer).await;
    let control_plane = connect_control_plane(&config).await?;

    let mut connections = ConnectionService::new(
        Arc::new(NatsConnector::new(config.broker.clone())),
        config.broker.clone(),
        Arc::new(SystemClock),
    )
    .with_compat_ttl_minutes(config.auth.default_policy.jwt_expires_in_minutes)
    .with_expiry_grace_secs(config.auth.clock_skew_secs);
    if let Some(control_plane) = &control_plane {
        connections =
            connections.with_control_plane(control_plane.clone(), config.sync.subject.clone());
    }
    let connections = Arc::new(connections);

    let state = AppState::new(config.clone(), connections.clone(), buffer.clone());
    let app = create_router(state);

    // Background jobs share one shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut jobs = Vec::new();

    let reaper = connection_reaper_task(
        connections.clone(),
        config.reaper.clone(),
        shutdown_rx.clone(),
    );
    jobs.push(tokio::spawn(async move {
        reaper.await;
    }));

    if let Some(control_plane) = control_plane {
        let task = connection_sync_task(
            connections.clone(),
            control_plane,
            config.sync.clone(),
            shutdown_rx.clone(),
        );
        jobs.push(tokio::spawn(async move {
            task.await;
        }));
    }

    if let Some(max_age) = config.buffer.max_age {
        let task = buffer_retention_task(
            buffer.clone(),
            max_age,
            config.buffer.retention_interval,
            Arc::new(SystemClock),
            shutdown_rx.clone(),
        );
        jobs.push(tokio::spawn(async move {
            task.await;
        }));
    }

    let addr = resolve_bind_addr(&config)?;
    tracing::info!(
        %addr,
        instance_id = %config.server.instance_id,
        buffer_backend = buffer.backend_name(),
        cluster_sync = connections.sync_enabled(),
        "Starting stationgate server"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    tracing::info!("HTTP server stopped, stopping background jobs");
    let _ = shutdown_tx.send(true);
    for job in jobs {
        if let Err(e) = job.await {
            tracing::error!(error = %e, "Background job panicked");
        }
    }

    let closed = connections.close_all().await;
    tracing::info!(closed, "Closed cached broker connections");
    Ok(())
}

/// Connect the system connection used for cluster sync. Failure is fatal only
/// when sync is enabled.
async fn connect_control_plane(
    config: &GatewayConfig,
) -> ApiResult<Option<Arc<dyn ControlPlane>>> {
    if !config.sync.enabled {
        tracing::info!("Cluster sync disabled");
        return Ok(None);
    }

    let login = config.broker.root_login()?;
    match NatsControlPlane::connect(&config.broker, &login).await {
        Ok(control_plane) => {
            tracing::info!(subject = %config.sync.subject, "Control plane connected");
            let control_plane: Arc<dyn ControlPlane> = Arc::new(control_plane);
            Ok(Some(control_plane))
        }
        Err(e) => {
            tracing::error!(error = %e, host = %config.broker.host, "Failed to connect control plane");
            Err(e.into())
        }
    }
}

fn resolve_bind_addr(config: &GatewayConfig) -> ApiResult<SocketAddr> {
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
