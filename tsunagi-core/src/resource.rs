use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The handful of resource fields identity matching reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "resourceType")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,

    /// All other fields are stored here
    #[serde(flatten)]
    pub rest: Value,
}

/// FHIR Identifier (business identifier such as an MRN)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Resource {
    /// Parse a resource from a JSON value
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn is_type(&self, resource_type: &str) -> bool {
        self.resource_type == resource_type
    }

    /// Value of the first identifier whose system is one of `systems`
    pub fn identifier_value<S: AsRef<str>>(&self, systems: &[S]) -> Option<&str> {
        self.identifier
            .iter()
            .filter(|ident| {
                ident
                    .system
                    .as_deref()
                    .is_some_and(|system| systems.iter().any(|s| s.as_ref() == system))
            })
            .find_map(|ident| ident.value.as_deref())
    }
}
