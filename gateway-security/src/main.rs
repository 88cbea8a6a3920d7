use gateway_security::{build_router, config::GatewayConfig, db, services::metrics, AppState};
use service_core::error::AppError;
use service_core::observability::logging::{init_tracing, shutdown_tracing};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Fail fast on a missing or weak signing secret
    let config = GatewayConfig::load()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )
    .map_err(AppError::ConfigError)?;

    metrics::init_metrics().map_err(|e| AppError::InternalError(e.into()))?;

    tracing::info!(
        service = %config.service_name,
        port = config.port,
        "Starting gateway security service"
    );

    let store = Arc::new(
        db::connect(&config.database)
            .await
            .map_err(AppError::DatabaseError)?,
    );

    let state = AppState::from_store(config.clone(), store)?;

    let report = state.developer_guard.enforce().await?;
    tracing::info!(
        role_id = report.role_id,
        permissions_granted = report.permissions_granted,
        root_assigned = report.root_assigned,
        "Developer role verified"
    );

    spawn_maintenance(state.clone(), config.maintenance.interval_seconds);

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    shutdown_tracing();
    Ok(())
}

/// Periodically drop expired ledger rows and rate-limit windows.
fn spawn_maintenance(state: AppState, interval_seconds: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;

            match state.auth.purge_expired_tokens().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "Purged expired tokens"),
                Err(e) => tracing::warn!(error = %e, "Token purge failed"),
            }

            match state.rate_limiter.clean_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "Purged expired rate limit windows"),
                Err(e) => tracing::warn!(error = %e, "Rate limit cleanup failed"),
            }

            match state.password_resets.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "Purged spent password resets"),
                Err(e) => tracing::warn!(error = %e, "Password reset purge failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
