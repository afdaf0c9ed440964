//! Secondary FHIR server reached by MRN lookup

use async_trait::async_trait;
use axum::http::{header, HeaderValue};
use serde_json::Value;
use std::sync::Arc;
use tsunagi_core::{identifier_token, match_search_bundle, CoreError, IdentityMatch, Resource};
use tsunagi_store::Session;

use super::source::{SourceDescriptor, SourceStrategy};
use super::transport::{OutboundRequest, Transport, UpstreamResponse};
use crate::error::{Result, RouteError};

pub struct SecondaryFhirStrategy {
    descriptor: SourceDescriptor,
    transport: Arc<dyn Transport>,
}

impl SecondaryFhirStrategy {
    pub fn new(descriptor: SourceDescriptor, transport: Arc<dyn Transport>) -> Self {
        Self {
            descriptor,
            transport,
        }
    }

    /// `{base}/Patient?identifier={system}|{value}`, percent-encoded
    fn identity_search_url(&self, base: &str, token: &str) -> Result<String> {
        reqwest::Url::parse_with_params(&format!("{}/Patient", base), [("identifier", token)])
            .map(String::from)
            .map_err(|e| self.descriptor.misconfigured(format!("invalid server_url: {}", e)))
    }
}

#[async_trait]
impl SourceStrategy for SecondaryFhirStrategy {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn reconcile_identity(
        &self,
        primary_patient: &Value,
        session: &Session,
    ) -> Result<IdentityMatch> {
        let missing = self.descriptor.missing_identity_settings();
        if !missing.is_empty() {
            return Err(self
                .descriptor
                .misconfigured(format!("missing {}", missing.join(", "))));
        }
        let (Some(base), Some(mrn_system)) = (
            self.descriptor.base_url.as_deref(),
            self.descriptor.mrn_system.as_deref(),
        ) else {
            return Err(self.descriptor.misconfigured("missing identity settings"));
        };

        let patient = Resource::from_value(primary_patient.clone())
            .map_err(|e| CoreError::UnexpectedShape(format!("primary Patient: {}", e)))?;

        let Some(mrn) = patient.identifier_value(&self.descriptor.launch_mrn_systems) else {
            tracing::info!(
                source = %self.descriptor.name,
                patient_id = patient.id.as_deref().unwrap_or(""),
                "Launch patient has no MRN from an accepted system; nothing to reconcile"
            );
            return Ok(IdentityMatch::None);
        };

        let token = identifier_token(mrn_system, mrn);
        let mut request = OutboundRequest::get(self.identity_search_url(base, &token)?);
        request.headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/fhir+json"),
        );

        let response = self.execute_request(request).await?;
        if !response.is_success() {
            return Err(RouteError::Upstream {
                source_name: self.descriptor.name.clone(),
                status: response.status,
                body: response.body,
            });
        }
        let body = response.body.ok_or_else(|| {
            CoreError::UnexpectedShape(format!(
                "{}: empty identity search response",
                self.descriptor.name
            ))
        })?;

        let found = match_search_bundle(&body)?;
        match &found {
            IdentityMatch::None => {
                tracing::info!(source = %self.descriptor.name, "No patient found for MRN");
            }
            IdentityMatch::Single(_) => {
                tracing::debug!(source = %self.descriptor.name, "Patient found for MRN");
            }
            IdentityMatch::Multiple { count, .. } => {
                tracing::warn!(
                    source = %self.descriptor.name,
                    count = *count,
                    "Multiple patients found for MRN; using the first"
                );
            }
        }

        if let Some(id) = found.patient_id() {
            session.set(&self.descriptor.session_key, Value::String(id.to_string()))?;
        }

        Ok(found)
    }

    async fn execute_request(&self, request: OutboundRequest) -> Result<UpstreamResponse> {
        tracing::debug!(source = %self.descriptor.name, method = %request.method, url = %request.url, "Calling source");
        self.transport
            .send(request)
            .await
            .map_err(|e| e.into_route_error(&self.descriptor.name))
    }
}
