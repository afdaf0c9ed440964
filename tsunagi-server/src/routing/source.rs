//! Per-source configuration and the strategy seam the router talks to

use async_trait::async_trait;
use serde_json::Value;
use tsunagi_core::{classify, rewrite, Classification, IdentityMatch, RequestScope, ScopeGrant};
use tsunagi_store::Session;

use super::transport::{OutboundRequest, UpstreamResponse};
use crate::config::{ConfigError, SourceSettings};
use crate::error::{Result, RouteError};

/// Immutable description of one secondary source, built at startup
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
    pub name: String,
    /// Base URL without trailing `/`
    pub base_url: Option<String>,
    /// Identifier systems on the launch patient accepted as a link
    pub launch_mrn_systems: Vec<String>,
    /// This source's own MRN system
    pub mrn_system: Option<String>,
    pub grant: ScopeGrant,
    /// Session key the translated patient id lives under
    pub session_key: String,
}

impl SourceDescriptor {
    pub fn from_settings(settings: &SourceSettings) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            name: settings.name.clone(),
            base_url: settings
                .server_url
                .as_deref()
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            launch_mrn_systems: settings.launch_mrn_systems.clone(),
            mrn_system: settings.mrn_system.clone(),
            grant: settings.grant()?,
            session_key: settings.session_key(),
        })
    }

    /// Missing pieces that make identity reconciliation impossible
    pub fn missing_identity_settings(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.base_url.is_none() {
            missing.push("server_url");
        }
        if self.mrn_system.is_none() {
            missing.push("mrn_system");
        }
        if self.launch_mrn_systems.is_empty() {
            missing.push("launch_mrn_systems");
        }
        missing
    }

    pub fn misconfigured(&self, detail: impl Into<String>) -> RouteError {
        RouteError::MisconfiguredSource {
            source_name: self.name.clone(),
            detail: detail.into(),
        }
    }
}

/// A secondary FHIR source the router can fall back to
#[async_trait]
pub trait SourceStrategy: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Patient id on this source for the session, if reconciled
    fn translated_patient_id(&self, session: &Session) -> Result<Option<String>> {
        Ok(session.get_str(&self.descriptor().session_key)?)
    }

    fn allowed_request(&self, request: &RequestScope) -> bool {
        self.descriptor().grant.allows(request)
    }

    fn classify(&self, response: &UpstreamResponse) -> Classification {
        classify(response.status, response.body.clone())
    }

    /// Rewrite `full_path` from the launch patient id to this source's id
    /// and prefix the base URL.
    fn rewrite_for_source(
        &self,
        full_path: &str,
        launch_patient_id: &str,
        translated_id: &str,
    ) -> Result<String> {
        let base = self
            .descriptor()
            .base_url
            .as_deref()
            .ok_or_else(|| self.descriptor().misconfigured("missing server_url"))?;
        let path = rewrite(full_path, launch_patient_id, translated_id);
        Ok(format!("{}/{}", base, path.trim_start_matches('/')))
    }

    /// Find this source's record of `primary_patient` and cache its id
    async fn reconcile_identity(
        &self,
        primary_patient: &Value,
        session: &Session,
    ) -> Result<IdentityMatch>;

    async fn execute_request(&self, request: OutboundRequest) -> Result<UpstreamResponse>;
}
