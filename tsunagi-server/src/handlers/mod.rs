pub mod auditlog;
pub mod fhir_router;
pub mod metadata;
