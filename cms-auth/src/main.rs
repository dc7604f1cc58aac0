use cms_auth::{
    build_router,
    config::AuthConfig,
    services::{spawn_session_sweeper, InMemoryCredentialStore},
    utils::Password,
    AppState,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::observability::{init_tracing, install_recorder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(&config.service_name, &config.log_level);
    let metrics_handle = install_recorder()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting authentication service"
    );

    let addr = config.common.socket_addr();
    let bootstrap_admin = config.bootstrap_admin.clone();
    let retention = chrono::Duration::days(config.session.retention_days);
    let sweep_every = std::time::Duration::from_secs(config.session.sweep_interval_seconds.max(1));

    // Signing keys are built here; a weak or missing secret aborts startup.
    let state = AppState::new(
        config,
        Arc::new(InMemoryCredentialStore::new()),
        Some(metrics_handle),
    )?;

    if let Some(admin) = bootstrap_admin {
        state
            .auth
            .bootstrap_super_admin(
                &admin.email,
                &Password::new(admin.password.expose_secret().as_str()),
            )
            .await?;
    }

    let sweeper = spawn_session_sweeper(
        state.auth.sessions().clone(),
        state.auth.limiter().clone(),
        retention,
        sweep_every,
    );

    let app = build_router(state);

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();
    tracing::info!("Service shutdown complete");
    Ok(())
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
            Ok(mut stream) => {
                stream.recv().await;
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
