use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::audit::{self, EventLevel};
use crate::AppState;

fn reply(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "message": message.into() }))).into_response()
}

/// Add a client application event to the audit log (POST /auditlog)
///
/// Body: `{"message": ..., "level": "info", ...}`; every other field is kept
/// as extra event data.
pub async fn add_event(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let mut fields = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(fields)) if !fields.is_empty() => fields,
        _ => return reply(StatusCode::BAD_REQUEST, "Missing JSON data"),
    };

    let message = fields.remove("message");
    let level = match fields.remove("level") {
        None => EventLevel::Info,
        Some(Value::String(level)) => match level.parse::<EventLevel>() {
            Ok(level) => level,
            Err(level) => {
                return reply(
                    StatusCode::BAD_REQUEST,
                    format!("Unknown logging `level`: {}", level),
                );
            }
        },
        Some(other) => {
            return reply(
                StatusCode::BAD_REQUEST,
                format!("Unknown logging `level`: {}", other),
            );
        }
    };

    let message = match message {
        Some(Value::String(message)) if !message.is_empty() => message,
        _ => return reply(StatusCode::BAD_REQUEST, "missing required 'message' in post"),
    };

    let extra: Map<String, Value> = fields;
    audit::log_client_event(level, &message, extra, &state.audit);

    reply(StatusCode::OK, "ok")
}
