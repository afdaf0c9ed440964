//! Primary-then-fallback routing of one proxied FHIR request

use axum::http::{HeaderMap, Method};
use serde_json::Value;
use std::sync::Arc;
use tsunagi_core::{
    classify, Classification, Context, IdentityMatch, IssueType, OperationOutcome, RequestScope,
    ScopeGrant,
};
use tsunagi_store::Session;

use super::source::SourceStrategy;
use super::transport::{OutboundRequest, Transport};
use crate::error::{Result, RouteError};

/// The launch server; its base URL is the session's `iss`
#[derive(Debug, Clone)]
pub struct PrimarySource {
    pub name: String,
    pub grant: ScopeGrant,
}

/// A request as received on `/fhir-router/{session_id}/...`
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Path below the session id, e.g. `Observation` or `Patient/123`
    pub relative_path: String,
    pub query: Option<String>,
    pub method: Method,
    /// Only the forwarded subset
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl InboundRequest {
    /// Relative path with the query string appended verbatim
    pub fn full_path(&self) -> String {
        match self.query.as_deref() {
            Some(query) if !query.is_empty() => format!("{}?{}", self.relative_path, query),
            _ => self.relative_path.clone(),
        }
    }
}

/// Launch values the session must hold before anything is routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchContext {
    pub iss: String,
    pub patient_id: String,
}

impl LaunchContext {
    /// Patient id from the token response, falling back to the launch token
    pub fn from_session(session: &Session) -> Result<Self> {
        let token_patient = session
            .get("token_response")?
            .and_then(|token| token.get("patient").and_then(|p| p.as_str()).map(String::from));
        let patient_id = match token_patient {
            Some(id) if !id.is_empty() => id,
            _ => session
                .get_str("launch_token_patient")?
                .filter(|id| !id.is_empty())
                .ok_or(RouteError::MissingSessionValue("patient ID"))?,
        };

        let iss = session
            .get_str("iss")?
            .filter(|iss| !iss.is_empty())
            .ok_or(RouteError::MissingSessionValue("iss"))?;

        Ok(Self { iss, patient_id })
    }
}

/// Why a secondary source was passed over without being called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoTranslatedId,
    ScopeNotGranted,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoTranslatedId => "no translated patient id",
            SkipReason::ScopeNotGranted => "scope not granted",
        }
    }
}

/// Whether a fallback source is skipped, checked before any call
pub fn skip_source(translated_id: Option<&str>, scope_allowed: bool) -> Option<SkipReason> {
    if translated_id.is_none() {
        Some(SkipReason::NoTranslatedId)
    } else if !scope_allowed {
        Some(SkipReason::ScopeNotGranted)
    } else {
        None
    }
}

/// First non-empty answer ends the fallback
pub fn stops_fallback(classification: &Classification) -> bool {
    !classification.is_empty()
}

/// Identity reconciliation performed while serving a request
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityResult {
    pub source: String,
    pub found: IdentityMatch,
}

impl IdentityResult {
    pub fn label(&self) -> &'static str {
        match self.found {
            IdentityMatch::None => "no-match",
            IdentityMatch::Single(_) => "matched",
            IdentityMatch::Multiple { .. } => "multiple-matches",
        }
    }
}

/// The response selected for the caller
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub status: u16,
    pub body: Option<Value>,
    /// Name of the source whose response is returned
    pub served_by: String,
    /// Classification label of the returned response
    pub outcome: &'static str,
    pub scope: RequestScope,
    pub identities: Vec<IdentityResult>,
}

pub struct FhirRouter {
    primary: PrimarySource,
    sources: Vec<Arc<dyn SourceStrategy>>,
    transport: Arc<dyn Transport>,
}

impl FhirRouter {
    pub fn new(
        primary: PrimarySource,
        sources: Vec<Arc<dyn SourceStrategy>>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            primary,
            sources,
            transport,
        }
    }

    pub fn primary(&self) -> &PrimarySource {
        &self.primary
    }

    pub fn sources(&self) -> &[Arc<dyn SourceStrategy>] {
        &self.sources
    }

    /// Route one request: primary first, then secondary sources in order
    /// while answers are empty.
    pub async fn route(&self, request: &InboundRequest, session: &Session) -> Result<RouteOutcome> {
        let launch = LaunchContext::from_session(session)?;
        let full_path = request.full_path();
        let scope = RequestScope::new(Context::Patient, &full_path, request.method.as_str())?;

        let mut primary_empty = None;

        if self.primary.grant.allows(&scope) {
            let outbound = OutboundRequest {
                method: request.method.clone(),
                url: join_url(&launch.iss, &full_path),
                headers: request.headers.clone(),
                body: request.body.clone(),
            };
            tracing::debug!(source = %self.primary.name, url = %outbound.url, "Calling primary");
            let response = self
                .transport
                .send(outbound)
                .await
                .map_err(|e| e.into_route_error(&self.primary.name))?;

            let status = response.status;
            match classify(status, response.body.clone()) {
                Classification::Error { status, body } => {
                    return Err(RouteError::Upstream {
                        source_name: self.primary.name.clone(),
                        status,
                        body,
                    });
                }
                classification @ (Classification::Success(_) | Classification::Paginated(_)) => {
                    let outcome = classification.label();
                    let identities = match &classification {
                        Classification::Success(body) if is_patient_read(&scope, body) => {
                            self.reconcile_sources(body, session).await?
                        }
                        _ => Vec::new(),
                    };
                    return Ok(RouteOutcome {
                        status,
                        body: response.body,
                        served_by: self.primary.name.clone(),
                        outcome,
                        scope,
                        identities,
                    });
                }
                classification @ Classification::Empty(_) => {
                    tracing::debug!(
                        source = %self.primary.name,
                        resource_type = %scope.resource_type,
                        outcome = classification.label(),
                        "Primary answer empty"
                    );
                    primary_empty = Some((status, response.body, classification.label()));
                }
            }
        } else {
            tracing::debug!(scope = %scope, "Primary grant does not cover request");
        }

        for source in &self.sources {
            let translated = source.translated_patient_id(session)?;
            if let Some(reason) =
                skip_source(translated.as_deref(), source.allowed_request(&scope))
            {
                tracing::debug!(source = source.name(), reason = reason.as_str(), "Skipping source");
                continue;
            }
            let Some(translated) = translated else {
                continue;
            };

            let outbound = OutboundRequest {
                method: request.method.clone(),
                url: source.rewrite_for_source(&full_path, &launch.patient_id, &translated)?,
                headers: request.headers.clone(),
                body: request.body.clone(),
            };
            let response = source.execute_request(outbound).await?;
            let classification = source.classify(&response);

            if let Classification::Error { status, body } = classification {
                return Err(RouteError::Upstream {
                    source_name: source.name().to_string(),
                    status,
                    body,
                });
            }
            if stops_fallback(&classification) {
                tracing::info!(
                    source = source.name(),
                    resource_type = %scope.resource_type,
                    outcome = classification.label(),
                    "Served from secondary source"
                );
                return Ok(RouteOutcome {
                    status: response.status,
                    body: response.body,
                    served_by: source.name().to_string(),
                    outcome: classification.label(),
                    scope,
                    identities: Vec::new(),
                });
            }
            tracing::debug!(source = source.name(), outcome = classification.label(), "Source answer empty");
        }

        match primary_empty {
            Some((status, body, outcome)) => Ok(RouteOutcome {
                status,
                body: Some(body.unwrap_or_else(|| {
                    serde_json::json!(OperationOutcome::error(
                        IssueType::NotFound,
                        format!("No data found for {}", scope.resource_type)
                    ))
                })),
                served_by: self.primary.name.clone(),
                outcome,
                scope,
                identities: Vec::new(),
            }),
            None => Err(RouteError::Forbidden(scope.to_string())),
        }
    }

    /// Reconcile the launch patient against every source not yet mapped
    async fn reconcile_sources(
        &self,
        primary_patient: &Value,
        session: &Session,
    ) -> Result<Vec<IdentityResult>> {
        let mut results = Vec::new();
        for source in &self.sources {
            if source.translated_patient_id(session)?.is_some() {
                continue;
            }
            let found = source.reconcile_identity(primary_patient, session).await?;
            results.push(IdentityResult {
                source: source.name().to_string(),
                found,
            });
        }
        Ok(results)
    }
}

/// A read that returned the launch patient record
fn is_patient_read(scope: &RequestScope, body: &Value) -> bool {
    scope.resource_type == "Patient"
        && body.get("resourceType").and_then(|t| t.as_str()) == Some("Patient")
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::secondary::SecondaryFhirStrategy;
    use crate::routing::source::SourceDescriptor;
    use crate::routing::transport::fake::FakeTransport;
    use crate::routing::transport::TransportError;
    use serde_json::json;
    use tsunagi_store::{MemorySessionStore, SessionStore};

    const EHR: &str = "http://ehr/fhir";
    const APP: &str = "http://app-fhir/fhir";
    const PDMP: &str = "http://pdmp/fhir";

    fn session(translated: &[(&str, &str)]) -> Session {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let session = Session::new(store, "s1");
        session.set("iss", json!(EHR)).unwrap();
        session
            .set("token_response", json!({"patient": "123", "scope": "launch"}))
            .unwrap();
        for (key, id) in translated {
            session.set(key, json!(id)).unwrap();
        }
        session
    }

    fn descriptor(name: &str, base: &str, scopes: &str) -> SourceDescriptor {
        SourceDescriptor {
            name: name.to_string(),
            base_url: Some(base.to_string()),
            launch_mrn_systems: vec!["http://ehr/mrn".to_string()],
            mrn_system: Some(format!("http://{}/mrn", name)),
            grant: ScopeGrant::parse(scopes).unwrap(),
            session_key: format!("{}_patient_id", name),
        }
    }

    fn router(primary_scopes: &str, fake: Arc<FakeTransport>) -> FhirRouter {
        let transport: Arc<dyn Transport> = fake;
        let sources: Vec<Arc<dyn SourceStrategy>> = vec![
            Arc::new(SecondaryFhirStrategy::new(
                descriptor("app", APP, "patient/Observation.rs patient/Patient.rs"),
                transport.clone(),
            )),
            Arc::new(SecondaryFhirStrategy::new(
                descriptor("pdmp", PDMP, "patient/*.rs"),
                transport.clone(),
            )),
        ];
        FhirRouter::new(
            PrimarySource {
                name: "launch".to_string(),
                grant: ScopeGrant::parse(primary_scopes).unwrap(),
            },
            sources,
            transport,
        )
    }

    fn get(path: &str) -> InboundRequest {
        let (relative_path, query) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path.to_string(), None),
        };
        InboundRequest {
            relative_path,
            query,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    fn bundle(total: usize) -> Value {
        let entries: Vec<Value> = (0..total)
            .map(|i| json!({"resource": {"resourceType": "Observation", "id": format!("o{}", i)}}))
            .collect();
        json!({"resourceType": "Bundle", "type": "searchset", "total": total, "entry": entries})
    }

    #[test]
    fn test_skip_source_predicate() {
        assert_eq!(skip_source(None, true), Some(SkipReason::NoTranslatedId));
        assert_eq!(skip_source(None, false), Some(SkipReason::NoTranslatedId));
        assert_eq!(skip_source(Some("abc"), false), Some(SkipReason::ScopeNotGranted));
        assert_eq!(skip_source(Some("abc"), true), None);
    }

    #[test]
    fn test_stops_fallback_predicate() {
        assert!(stops_fallback(&Classification::Success(json!({}))));
        assert!(stops_fallback(&Classification::Paginated(json!({}))));
        assert!(stops_fallback(&Classification::Error {
            status: 500,
            body: None
        }));
        assert!(!stops_fallback(&classify(404, None)));
    }

    #[test]
    fn test_full_path() {
        assert_eq!(get("Observation?patient=123").full_path(), "Observation?patient=123");
        assert_eq!(get("Patient/123").full_path(), "Patient/123");
        let mut request = get("Patient/123");
        request.query = Some(String::new());
        assert_eq!(request.full_path(), "Patient/123");
    }

    #[test]
    fn test_launch_context_fallbacks() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let session = Session::new(store, "s1");

        let err = LaunchContext::from_session(&session).unwrap_err();
        assert!(matches!(err, RouteError::MissingSessionValue("patient ID")));

        session.set("launch_token_patient", json!("fEMR-1")).unwrap();
        let err = LaunchContext::from_session(&session).unwrap_err();
        assert!(matches!(err, RouteError::MissingSessionValue("iss")));

        session.set("iss", json!(EHR)).unwrap();
        let launch = LaunchContext::from_session(&session).unwrap();
        assert_eq!(launch.patient_id, "fEMR-1");

        session.set("token_response", json!({"patient": "123"})).unwrap();
        let launch = LaunchContext::from_session(&session).unwrap();
        assert_eq!(launch.patient_id, "123");
        assert_eq!(launch.iss, EHR);
    }

    #[tokio::test]
    async fn test_primary_success_returned_verbatim() {
        let patient = json!({"resourceType": "Patient", "id": "123"});
        let fake = Arc::new(FakeTransport::new().respond(EHR, 200, Some(patient.clone())));
        let router = router("patient/Patient.r", fake.clone());
        let session = session(&[("app_patient_id", "abc"), ("pdmp_patient_id", "p1")]);

        let outcome = router.route(&get("Patient/123"), &session).await.unwrap();

        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.body, Some(patient));
        assert_eq!(outcome.served_by, "launch");
        assert_eq!(outcome.outcome, "success");
        assert!(outcome.identities.is_empty());
        assert_eq!(fake.urls(), vec!["http://ehr/fhir/Patient/123"]);
    }

    #[tokio::test]
    async fn test_empty_primary_falls_back_to_secondary() {
        let fake = Arc::new(
            FakeTransport::new()
                .respond(EHR, 200, Some(bundle(0)))
                .respond(APP, 200, Some(bundle(2))),
        );
        let router = router("patient/*.rs", fake.clone());
        let session = session(&[("app_patient_id", "abc")]);

        let outcome = router
            .route(&get("Observation?patient=123"), &session)
            .await
            .unwrap();

        assert_eq!(outcome.served_by, "app");
        assert_eq!(outcome.body.unwrap()["total"], 2);
        assert_eq!(
            fake.urls(),
            vec![
                "http://ehr/fhir/Observation?patient=123",
                "http://app-fhir/fhir/Observation?patient=abc",
            ]
        );
    }

    #[tokio::test]
    async fn test_paginated_primary_never_falls_back() {
        let mut paged = bundle(0);
        paged["link"] = json!([{"relation": "next", "url": "http://ehr/fhir?page=2"}]);
        let fake = Arc::new(
            FakeTransport::new()
                .respond(EHR, 200, Some(paged))
                .respond(APP, 200, Some(bundle(2))),
        );
        let router = router("patient/*.rs", fake.clone());
        let session = session(&[("app_patient_id", "abc")]);

        let outcome = router
            .route(&get("Condition?patient=123"), &session)
            .await
            .unwrap();

        assert_eq!(outcome.served_by, "launch");
        assert_eq!(outcome.outcome, "paginated");
        assert_eq!(fake.urls().len(), 1);
    }

    #[tokio::test]
    async fn test_unmapped_source_skipped() {
        let fake = Arc::new(
            FakeTransport::new()
                .respond(EHR, 404, None)
                .respond(APP, 200, Some(bundle(2)))
                .respond(PDMP, 200, Some(bundle(1))),
        );
        let router = router("patient/*.rs", fake.clone());
        let session = session(&[("pdmp_patient_id", "p1")]);

        let outcome = router
            .route(&get("Observation?patient=123"), &session)
            .await
            .unwrap();

        assert_eq!(outcome.served_by, "pdmp");
        assert_eq!(
            fake.urls(),
            vec![
                "http://ehr/fhir/Observation?patient=123",
                "http://pdmp/fhir/Observation?patient=p1",
            ]
        );
    }

    #[tokio::test]
    async fn test_all_empty_returns_primary_result() {
        let fake = Arc::new(
            FakeTransport::new()
                .respond(EHR, 404, None)
                .respond(APP, 200, Some(bundle(0))),
        );
        let router = router("patient/*.rs", fake.clone());
        let session = session(&[("app_patient_id", "abc")]);

        let outcome = router
            .route(&get("Observation?patient=123"), &session)
            .await
            .unwrap();

        assert_eq!(outcome.status, 404);
        assert_eq!(outcome.served_by, "launch");
        assert_eq!(outcome.outcome, "not-found");
        assert_eq!(outcome.body.unwrap()["resourceType"], "OperationOutcome");
    }

    #[tokio::test]
    async fn test_secondary_scope_gate() {
        let fake = Arc::new(
            FakeTransport::new()
                .respond(EHR, 200, Some(bundle(0)))
                .respond(APP, 200, Some(bundle(2)))
                .respond(PDMP, 200, Some(bundle(1))),
        );
        let router = router("patient/*.rs", fake.clone());
        let session = session(&[("app_patient_id", "abc"), ("pdmp_patient_id", "p1")]);

        // `app` grants only Observation and Patient
        let outcome = router
            .route(&get("MedicationRequest?patient=123"), &session)
            .await
            .unwrap();

        assert_eq!(outcome.served_by, "pdmp");
        assert!(!fake.urls().iter().any(|u| u.starts_with(APP)));
    }

    #[tokio::test]
    async fn test_primary_scope_denied_uses_secondary() {
        let fake = Arc::new(FakeTransport::new().respond(PDMP, 200, Some(bundle(1))));
        let router = router("patient/Patient.r", fake.clone());
        let session = session(&[("pdmp_patient_id", "p1")]);

        let outcome = router
            .route(&get("MedicationRequest?patient=123"), &session)
            .await
            .unwrap();

        assert_eq!(outcome.served_by, "pdmp");
        assert_eq!(fake.urls(), vec!["http://pdmp/fhir/MedicationRequest?patient=p1"]);
    }

    #[tokio::test]
    async fn test_forbidden_when_primary_never_called() {
        let fake = Arc::new(FakeTransport::new());
        let router = router("patient/Patient.r", fake.clone());
        let session = session(&[]);

        let err = router
            .route(&get("Observation?patient=123"), &session)
            .await
            .unwrap_err();

        assert!(matches!(err, RouteError::Forbidden(ref s) if s == "patient/Observation.rs"));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_primary_error_aborts_fallback() {
        let fake = Arc::new(
            FakeTransport::new()
                .respond(EHR, 503, Some(json!({"resourceType": "OperationOutcome"})))
                .respond(APP, 200, Some(bundle(2))),
        );
        let router = router("patient/*.rs", fake.clone());
        let session = session(&[("app_patient_id", "abc")]);

        let err = router
            .route(&get("Observation?patient=123"), &session)
            .await
            .unwrap_err();

        assert!(matches!(err, RouteError::Upstream { status: 503, ref source_name, .. } if source_name == "launch"));
        assert_eq!(fake.urls().len(), 1);
    }

    #[tokio::test]
    async fn test_secondary_error_propagates() {
        let fake = Arc::new(
            FakeTransport::new()
                .respond(EHR, 200, Some(bundle(0)))
                .respond(APP, 500, None)
                .respond(PDMP, 200, Some(bundle(1))),
        );
        let router = router("patient/*.rs", fake.clone());
        let session = session(&[("app_patient_id", "abc"), ("pdmp_patient_id", "p1")]);

        let err = router
            .route(&get("Observation?patient=123"), &session)
            .await
            .unwrap_err();

        assert!(matches!(err, RouteError::Upstream { status: 500, ref source_name, .. } if source_name == "app"));
        assert!(!fake.urls().iter().any(|u| u.starts_with(PDMP)));
    }

    #[tokio::test]
    async fn test_primary_timeout_propagates() {
        let fake = Arc::new(FakeTransport::new().fail(EHR, || TransportError::Timeout));
        let router = router("patient/*.rs", fake);
        let session = session(&[]);

        let err = router.route(&get("Patient/123"), &session).await.unwrap_err();
        assert!(matches!(err, RouteError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_patient_read_reconciles_unmapped_sources() {
        let patient = json!({
            "resourceType": "Patient",
            "id": "123",
            "identifier": [{"system": "http://ehr/mrn", "value": "M1"}]
        });
        let matches = json!({
            "resourceType": "Bundle",
            "total": 2,
            "entry": [
                {"resource": {"resourceType": "Patient", "id": "p1"}},
                {"resource": {"resourceType": "Patient", "id": "p2"}}
            ]
        });
        let fake = Arc::new(
            FakeTransport::new()
                .respond(EHR, 200, Some(patient))
                .respond(PDMP, 200, Some(matches)),
        );
        let router = router("patient/*.rs", fake.clone());
        let session = session(&[("app_patient_id", "abc")]);

        let outcome = router.route(&get("Patient/123"), &session).await.unwrap();

        assert_eq!(outcome.identities.len(), 1);
        assert_eq!(outcome.identities[0].source, "pdmp");
        assert_eq!(outcome.identities[0].label(), "multiple-matches");
        assert_eq!(
            session.get_str("pdmp_patient_id").unwrap().as_deref(),
            Some("p1")
        );
        assert_eq!(
            session.get_str("app_patient_id").unwrap().as_deref(),
            Some("abc")
        );
        assert_eq!(fake.urls().len(), 2);
    }

    #[tokio::test]
    async fn test_reconciliation_error_propagates() {
        let patient = json!({
            "resourceType": "Patient",
            "id": "123",
            "identifier": [{"system": "http://ehr/mrn", "value": "M1"}]
        });
        let fake = Arc::new(
            FakeTransport::new()
                .respond(EHR, 200, Some(patient))
                .respond(APP, 500, None),
        );
        let router = router("patient/*.rs", fake);
        let session = session(&[]);

        let err = router.route(&get("Patient/123"), &session).await.unwrap_err();
        assert!(matches!(err, RouteError::Upstream { ref source_name, .. } if source_name == "app"));
    }

    #[tokio::test]
    async fn test_unsupported_method() {
        let fake = Arc::new(FakeTransport::new());
        let router = router("patient/*.cruds", fake);
        let mut request = get("Patient/123");
        request.method = Method::OPTIONS;

        let err = router.route(&request, &session(&[])).await.unwrap_err();
        assert!(matches!(err, RouteError::Core(tsunagi_core::CoreError::UnsupportedMethod(_))));
    }
}
