//! Interpreting patient identity searches against a secondary source

use serde_json::Value;

use crate::bundle;
use crate::error::{CoreError, Result};
use crate::resource::Resource;

/// Result of searching a secondary source for the launch patient's MRN
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityMatch {
    None,
    Single(Value),
    /// More than one candidate; `first` is the one used
    Multiple { count: usize, first: Value },
}

impl IdentityMatch {
    /// The record the router maps to, if any
    pub fn record(&self) -> Option<&Value> {
        match self {
            IdentityMatch::None => None,
            IdentityMatch::Single(record) | IdentityMatch::Multiple { first: record, .. } => {
                Some(record)
            }
        }
    }

    /// Patient id of the mapped record
    pub fn patient_id(&self) -> Option<&str> {
        self.record()
            .and_then(|r| r.get("id"))
            .and_then(|id| id.as_str())
    }
}

/// `identifier` search parameter value: `system|value`
pub fn identifier_token(system: &str, value: &str) -> String {
    format!("{}|{}", system, value)
}

/// Interpret a `Patient?identifier=...` search response.
///
/// The body must be a Bundle whose entries all hold Patient resources with
/// an id.
pub fn match_search_bundle(body: &Value) -> Result<IdentityMatch> {
    if !bundle::is_bundle(body) {
        let found = body
            .get("resourceType")
            .and_then(|t| t.as_str())
            .unwrap_or("nothing");
        return Err(CoreError::UnexpectedShape(format!(
            "identity search returned {} instead of a Bundle",
            found
        )));
    }

    let mut patients = Vec::new();
    for entry in bundle::entries(body) {
        let Some(resource) = entry.get("resource") else {
            return Err(CoreError::UnexpectedShape(
                "identity search entry without a resource".to_string(),
            ));
        };
        let parsed = Resource::from_value(resource.clone())
            .map_err(|e| CoreError::UnexpectedShape(format!("identity search entry: {}", e)))?;
        if !parsed.is_type("Patient") {
            return Err(CoreError::UnexpectedShape(format!(
                "identity search entry is {}, not Patient",
                parsed.resource_type
            )));
        }
        if parsed.id.is_none() {
            return Err(CoreError::UnexpectedShape(
                "identity search matched a Patient without id".to_string(),
            ));
        }
        patients.push(resource);
    }

    let count = patients
        .len()
        .max(bundle::total(body).unwrap_or(0) as usize);

    match patients.first() {
        None => Ok(IdentityMatch::None),
        Some(first) if count == 1 => Ok(IdentityMatch::Single((*first).clone())),
        Some(first) => Ok(IdentityMatch::Multiple {
            count,
            first: (*first).clone(),
        }),
    }
}
