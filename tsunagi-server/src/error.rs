use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::Value;
use thiserror::Error;
use tsunagi_core::{CoreError, OperationOutcome};
use tsunagi_store::StoreError;

/// Everything routing a request can fail with
#[derive(Error, Debug)]
pub enum RouteError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Source {source_name} is misconfigured: {detail}")]
    MisconfiguredSource { source_name: String, detail: String },

    #[error("Source {source_name} responded {status}")]
    Upstream {
        source_name: String,
        status: u16,
        body: Option<Value>,
    },

    #[error("Transport failure calling {source_name}: {detail}")]
    Transport { source_name: String, detail: String },

    #[error("Timed out calling {source_name}")]
    Timeout { source_name: String },

    #[error("Request scope {0} not granted by any source")]
    Forbidden(String),

    #[error("no {0} found in session; can't continue")]
    MissingSessionValue(&'static str),

    #[error("Session store error: {0}")]
    Session(#[from] StoreError),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Request body exceeds the size limit")]
    PayloadTooLarge,
}

pub type Result<T> = std::result::Result<T, RouteError>;

impl RouteError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RouteError::Core(CoreError::UnsupportedMethod(_)) => StatusCode::METHOD_NOT_ALLOWED,
            RouteError::Core(CoreError::UnexpectedShape(_)) => StatusCode::BAD_GATEWAY,
            RouteError::Core(CoreError::InvalidScope(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            RouteError::MisconfiguredSource { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RouteError::Upstream { status, .. } => match StatusCode::from_u16(*status) {
                Ok(code) if code.is_client_error() || code.is_server_error() => code,
                _ => StatusCode::BAD_GATEWAY,
            },
            RouteError::Transport { .. } => StatusCode::BAD_GATEWAY,
            RouteError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RouteError::Forbidden(_) => StatusCode::FORBIDDEN,
            RouteError::MissingSessionValue(_) => StatusCode::BAD_REQUEST,
            RouteError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RouteError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            RouteError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// Caller-facing OperationOutcome; store and transport details stay in the logs
    pub fn outcome(&self) -> OperationOutcome {
        match self {
            RouteError::Core(CoreError::UnsupportedMethod(method)) => {
                OperationOutcome::not_supported(format!("Unsupported HTTP method: {}", method))
            }
            RouteError::Core(CoreError::UnexpectedShape(_)) => {
                OperationOutcome::unexpected_shape("Unexpected response shape from upstream")
            }
            RouteError::Core(CoreError::InvalidScope(_))
            | RouteError::MisconfiguredSource { .. }
            | RouteError::Session(_) => OperationOutcome::fatal("Internal server error"),
            RouteError::Upstream {
                source_name, status, ..
            } => OperationOutcome::upstream(source_name, format!("responded {}", status)),
            RouteError::Transport { source_name, .. } => {
                OperationOutcome::upstream(source_name, "unreachable")
            }
            RouteError::Timeout { source_name } => {
                OperationOutcome::timeout(format!("{}: timed out", source_name))
            }
            RouteError::Forbidden(scope) => {
                OperationOutcome::forbidden(format!("Scope {} not granted", scope))
            }
            RouteError::MissingSessionValue(_) => OperationOutcome::required(self.to_string()),
            RouteError::InvalidBody(_) => {
                OperationOutcome::invalid("Request body is not valid JSON")
            }
            RouteError::PayloadTooLarge => OperationOutcome::too_long(self.to_string()),
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{}", self);
        } else {
            tracing::warn!(status = status.as_u16(), "{}", self);
        }

        (
            status,
            [(header::CONTENT_TYPE, "application/fhir+json; charset=utf-8")],
            Json(self.outcome()),
        )
            .into_response()
    }
}
