//! tsunagi - multi-source FHIR router
//!
//! Proxies SMART-launched FHIR requests to the launch server and falls back
//! to secondary FHIR servers when the launch server has nothing.

pub mod audit;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routing;

use axum::{
    http::Method,
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tsunagi_store::{AuditLog, SessionStore};

use routing::{FhirRouter, PROXY_HEADERS};

/// Application state
pub struct AppState {
    pub config: config::ServerConfig,
    pub router: FhirRouter,
    pub sessions: Arc<dyn SessionStore>,
    pub audit: Arc<Mutex<AuditLog>>,
}

/// Build the application router with all routes and middleware
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(PROXY_HEADERS);

    Router::new()
        .route("/", get(handlers::metadata::root))
        .route("/health", get(handlers::metadata::health_check))
        .route("/auditlog", post(handlers::auditlog::add_event))
        // Next-page requests arrive with only a query string
        .route(
            "/fhir-router/{session_id}/",
            any(handlers::fhir_router::route_fhir),
        )
        .route(
            "/fhir-router/{session_id}/{*relative_path}",
            any(handlers::fhir_router::route_fhir),
        )
        .layer(RequestBodyLimitLayer::new(16 * 1024 * 1024)) // 16MB
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
