//! Source-agnostic classification of upstream FHIR responses

use serde_json::Value;
use std::fmt;

use crate::bundle;

/// Why a response counts as empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// 404
    NotFound,
    /// 410, typically a next-page token this server does not recognize
    Gone,
    /// 400, some servers reject query shapes for some resource types
    Rejected,
    /// 2xx bundle with no entries
    NoResults,
}

impl EmptyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmptyReason::NotFound => "not-found",
            EmptyReason::Gone => "gone",
            EmptyReason::Rejected => "rejected",
            EmptyReason::NoResults => "no-results",
        }
    }
}

/// Outcome of a single upstream call
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Success(Value),
    Empty(EmptyReason),
    Paginated(Value),
    Error { status: u16, body: Option<Value> },
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        matches!(self, Classification::Empty(_))
    }

    /// Short label for logs and audit rows
    pub fn label(&self) -> &'static str {
        match self {
            Classification::Success(_) => "success",
            Classification::Empty(reason) => reason.as_str(),
            Classification::Paginated(_) => "paginated",
            Classification::Error { .. } => "error",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Error { status, .. } => write!(f, "error ({})", status),
            other => f.write_str(other.label()),
        }
    }
}

/// Classify an upstream response from its status code and JSON body.
pub fn classify(status: u16, body: Option<Value>) -> Classification {
    match status {
        404 => return Classification::Empty(EmptyReason::NotFound),
        410 => return Classification::Empty(EmptyReason::Gone),
        400 => return Classification::Empty(EmptyReason::Rejected),
        400..=599 => return Classification::Error { status, body },
        _ => {}
    }

    let Some(body) = body else {
        return Classification::Success(Value::Null);
    };

    if !bundle::is_bundle(&body) {
        return Classification::Success(body);
    }

    if bundle::has_next_link(&body) {
        return Classification::Paginated(body);
    }

    if bundle::is_empty(&body) {
        return Classification::Empty(EmptyReason::NoResults);
    }

    Classification::Success(body)
}
