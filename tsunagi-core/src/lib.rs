pub mod bundle;
pub mod classify;
pub mod error;
pub mod identity;
pub mod operation_outcome;
pub mod resource;
pub mod rewrite;
pub mod scope;

pub use classify::{classify, Classification, EmptyReason};
pub use error::{CoreError, Result};
pub use identity::{identifier_token, match_search_bundle, IdentityMatch};
pub use operation_outcome::{IssueSeverity, IssueType, OperationOutcome, OperationOutcomeIssue};
pub use resource::{Identifier, Resource};
pub use rewrite::rewrite;
pub use scope::{
    allowed, resource_type_of, Access, Context, RequestScope, ResourceSelector, Scope,
    ScopeGrant, FALLBACK_RESOURCE_TYPE,
};
