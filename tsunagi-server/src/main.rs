//! tsunagi - multi-source FHIR router entry point

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tsunagi_store::AuditLog;

use tsunagi_server::{
    build_router,
    config::{LogFormat, LogSettings, ServerConfig},
    routing::{ReqwestTransport, Transport},
    AppState,
};

#[tokio::main]
async fn main() {
    // Load configuration
    let config_result = ServerConfig::load(
        std::path::Path::new("config.yaml")
            .exists()
            .then_some("config.yaml"),
    );
    let log = match &config_result {
        Ok(config) => config.log.clone(),
        Err(_) => LogSettings::default(),
    };

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log.level));
    match log.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json())
            .with(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(filter)
            .init(),
    }

    tracing::info!("Starting tsunagi server...");

    let config = config_result.unwrap_or_else(|e| {
        tracing::error!("Failed to load config: {}", e);
        std::process::exit(1);
    });

    // Create data directory
    if let Err(e) = std::fs::create_dir_all(&config.storage.data_dir) {
        tracing::error!("Failed to create data directory: {}", e);
        std::process::exit(1);
    }

    // Initialize stores
    let sessions = config.open_session_store().unwrap_or_else(|e| {
        tracing::error!("Failed to open session store: {}", e);
        std::process::exit(1);
    });
    tracing::info!(
        "Session store: {:?} ({})",
        config.session.backend,
        config.session_db_path().display()
    );

    let audit_log = AuditLog::open(config.audit_db_path()).unwrap_or_else(|e| {
        tracing::error!("Failed to open audit log: {}", e);
        std::process::exit(1);
    });

    // Build sources
    let transport: Arc<dyn Transport> = match ReqwestTransport::new(config.outbound_timeout()) {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            tracing::error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let router = config.build_router(transport).unwrap_or_else(|e| {
        tracing::error!("Invalid source configuration: {}", e);
        std::process::exit(1);
    });

    tracing::info!(
        "Primary: {} ({})",
        router.primary().name,
        router.primary().grant
    );
    if router.sources().is_empty() {
        tracing::info!("Sources: none configured, fallback disabled");
    } else {
        let names: Vec<&str> = router.sources().iter().map(|s| s.name()).collect();
        tracing::info!("Sources: {}", names.join(" → "));
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    let state = Arc::new(AppState {
        config,
        router,
        sessions,
        audit: Arc::new(Mutex::new(audit_log)),
    });

    // Build router
    let app = build_router(state);

    // Bind TCP listener
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Server error: {}", e);
        });

    tracing::info!("Server shut down gracefully");
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
