//! Minimal read-only view of FHIR Bundle JSON

use serde_json::Value;

pub fn is_bundle(body: &Value) -> bool {
    body.get("resourceType").and_then(|t| t.as_str()) == Some("Bundle")
}

/// `Bundle.total`, when the server reported it
pub fn total(body: &Value) -> Option<u64> {
    body.get("total").and_then(|t| t.as_u64())
}

/// Entries of the bundle; missing `entry` yields an empty slice
pub fn entries(body: &Value) -> &[Value] {
    body.get("entry")
        .and_then(|e| e.as_array())
        .map(|e| e.as_slice())
        .unwrap_or_default()
}

/// True if the bundle carries a `next` navigation link
pub fn has_next_link(body: &Value) -> bool {
    body.get("link")
        .and_then(|l| l.as_array())
        .is_some_and(|links| {
            links
                .iter()
                .any(|link| link.get("relation").and_then(|r| r.as_str()) == Some("next"))
        })
}

/// True if the bundle reports zero results or carries no entries.
///
/// Some servers omit `total`, so an absent or empty `entry` list also counts.
pub fn is_empty(body: &Value) -> bool {
    total(body) == Some(0) || entries(body).is_empty()
}
