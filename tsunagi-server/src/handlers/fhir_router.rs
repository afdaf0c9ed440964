use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use http_body_util::{BodyExt, LengthLimitError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;
use tsunagi_store::Session;

use crate::audit;
use crate::error::RouteError;
use crate::routing::{proxy_headers, InboundRequest, RouteOutcome};
use crate::AppState;

const FHIR_JSON: &str = "application/fhir+json; charset=utf-8";

/// A streamed body over `RequestBodyLimitLayer`'s limit surfaces as a body
/// error wrapped in one or more `axum::Error` layers
fn body_error(err: axum::Error) -> RouteError {
    let mut inner = err.into_inner();
    loop {
        match inner.downcast::<axum::Error>() {
            Ok(wrapped) => inner = wrapped.into_inner(),
            Err(other) => {
                inner = other;
                break;
            }
        }
    }

    if inner.is::<LengthLimitError>() {
        RouteError::PayloadTooLarge
    } else {
        RouteError::InvalidBody(inner.to_string())
    }
}

/// Split a request into the router's view of it
async fn inbound_request(
    relative_path: String,
    request: Request,
) -> Result<InboundRequest, RouteError> {
    let (parts, body) = request.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(body_error)?
        .to_bytes();

    let body = if bytes.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(
            serde_json::from_slice::<Value>(&bytes)
                .map_err(|e| RouteError::InvalidBody(e.to_string()))?,
        )
    };

    Ok(InboundRequest {
        relative_path,
        query: parts.uri.query().map(String::from),
        method: parts.method,
        headers: proxy_headers(&parts.headers),
        body,
    })
}

fn into_response(outcome: RouteOutcome) -> Response {
    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::BAD_GATEWAY);
    match outcome.body {
        Some(body) => (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON))],
            Json(body),
        )
            .into_response(),
        None => status.into_response(),
    }
}

/// Proxy a FHIR request for a launched session
/// (ANY /fhir-router/{session_id}/{*relative_path})
pub async fn route_fhir(
    State(state): State<Arc<AppState>>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
) -> Response {
    let session_id = params.get("session_id").cloned().unwrap_or_default();
    let relative_path = params.get("relative_path").cloned().unwrap_or_default();
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("fhir_router", %request_id, session_id = %session_id);

    async move {
        tracing::debug!(relative_path = %relative_path, "received session_id as path parameter");

        let inbound = match inbound_request(relative_path, request).await {
            Ok(inbound) => inbound,
            Err(e) => return e.into_response(),
        };
        let session = Session::new(Arc::clone(&state.sessions), session_id.clone());

        match state.router.route(&inbound, &session).await {
            Ok(outcome) => {
                audit::log_route_success(&session_id, &inbound, &outcome, &state.audit);
                into_response(outcome)
            }
            Err(e) => {
                audit::log_route_error(&session_id, &inbound, &e, &state.audit);
                e.into_response()
            }
        }
    }
    .instrument(span)
    .await
}
