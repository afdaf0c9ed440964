//! SMART-style scope grammar
//!
//! A scope triple has the form `context/selector.access`:
//! - context: `patient` | `user` | `system`
//! - selector: a resource type, or `*` for every type
//! - access: one or more of `c r u d s` (SMART v2), or the v1 forms
//!   `read`, `write` and `*`
//!
//! Examples: `patient/Observation.rs`, `user/*.cruds`, `system/Patient.read`

use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Resource type assumed when a request path carries no resource segment.
///
/// Happens when a client follows a bundle `next` link, which only carries
/// query parameters.
pub const FALLBACK_RESOURCE_TYPE: &str = "Patient";

/// Launch context a scope applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Context {
    Patient,
    User,
    System,
}

impl Context {
    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Patient => "patient",
            Context::User => "user",
            Context::System => "system",
        }
    }
}

impl FromStr for Context {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "patient" => Ok(Context::Patient),
            "user" => Ok(Context::User),
            "system" => Ok(Context::System),
            other => Err(CoreError::InvalidScope(format!("unknown context '{}'", other))),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource part of a scope triple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceSelector {
    Any,
    Type(String),
}

impl ResourceSelector {
    pub fn matches(&self, resource_type: &str) -> bool {
        match self {
            ResourceSelector::Any => true,
            ResourceSelector::Type(t) => t == resource_type,
        }
    }
}

impl fmt::Display for ResourceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceSelector::Any => f.write_str("*"),
            ResourceSelector::Type(t) => f.write_str(t),
        }
    }
}

/// Set of access letters, stored as bit flags in `cruds` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Access(u8);

impl Access {
    pub const CREATE: Access = Access(0b00001);
    pub const READ: Access = Access(0b00010);
    pub const UPDATE: Access = Access(0b00100);
    pub const DELETE: Access = Access(0b01000);
    pub const SEARCH: Access = Access(0b10000);
    pub const ALL: Access = Access(0b11111);

    const LETTERS: [(char, Access); 5] = [
        ('c', Access::CREATE),
        ('r', Access::READ),
        ('u', Access::UPDATE),
        ('d', Access::DELETE),
        ('s', Access::SEARCH),
    ];

    /// Access implied by an HTTP method.
    ///
    /// GET/HEAD read and search, POST/PUT/PATCH create and update, DELETE
    /// deletes. Anything else is rejected.
    pub fn from_method(method: &str) -> Result<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" | "HEAD" => Ok(Access::READ | Access::SEARCH),
            "POST" | "PUT" | "PATCH" => Ok(Access::CREATE | Access::UPDATE),
            "DELETE" => Ok(Access::DELETE),
            other => Err(CoreError::UnsupportedMethod(other.to_string())),
        }
    }

    /// Parse the access part of a scope triple
    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "read" => return Ok(Access::READ | Access::SEARCH),
            "write" => return Ok(Access::CREATE | Access::UPDATE | Access::DELETE),
            "*" => return Ok(Access::ALL),
            _ => {}
        }

        if text.is_empty() {
            return Err(CoreError::InvalidScope("empty access".to_string()));
        }

        let mut access = Access::default();
        for ch in text.chars() {
            let Some((_, bit)) = Self::LETTERS.iter().find(|(letter, _)| *letter == ch) else {
                return Err(CoreError::InvalidScope(format!(
                    "unknown access letter '{}' in '{}'",
                    ch, text
                )));
            };
            if access.contains(*bit) {
                return Err(CoreError::InvalidScope(format!(
                    "repeated access letter '{}' in '{}'",
                    ch, text
                )));
            }
            access = access | *bit;
        }
        Ok(access)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: Access) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: Access) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for Access {
    type Output = Access;

    fn bitor(self, rhs: Access) -> Access {
        Access(self.0 | rhs.0)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (letter, bit) in Self::LETTERS {
            if self.contains(bit) {
                write!(f, "{}", letter)?;
            }
        }
        Ok(())
    }
}

/// One `context/selector.access` triple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub context: Context,
    pub selector: ResourceSelector,
    pub access: Access,
}

impl FromStr for Scope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CoreError::InvalidScope(format!("'{}' is not context/resource.access", s));

        let (context, rest) = s.split_once('/').ok_or_else(invalid)?;
        let (selector, access) = rest.split_once('.').ok_or_else(invalid)?;

        if selector.is_empty() || selector.contains('/') {
            return Err(invalid());
        }

        let selector = if selector == "*" {
            ResourceSelector::Any
        } else if selector.chars().all(|c| c.is_ascii_alphanumeric()) {
            ResourceSelector::Type(selector.to_string())
        } else {
            return Err(invalid());
        };

        Ok(Scope {
            context: context.parse()?,
            selector,
            access: Access::parse(access)?,
        })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}", self.context, self.selector, self.access)
    }
}

/// Parsed set of scope triples a source accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeGrant {
    scopes: Vec<Scope>,
}

impl ScopeGrant {
    /// Parse space-separated scope triples
    pub fn parse(text: &str) -> Result<Self> {
        let mut scopes: Vec<Scope> = Vec::new();
        for token in text.split_whitespace() {
            let scope: Scope = token.parse()?;
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }

        if scopes.is_empty() {
            return Err(CoreError::InvalidScope("no scopes given".to_string()));
        }

        Ok(Self { scopes })
    }

    /// Grant accepting every resource type and access in every context
    pub fn unrestricted() -> Self {
        Self {
            scopes: [Context::Patient, Context::User, Context::System]
                .into_iter()
                .map(|context| Scope {
                    context,
                    selector: ResourceSelector::Any,
                    access: Access::ALL,
                })
                .collect(),
        }
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// True if any triple shares context, resource and at least one access letter
    pub fn allows(&self, request: &RequestScope) -> bool {
        self.scopes.iter().any(|scope| {
            scope.context == request.context
                && scope.selector.matches(&request.resource_type)
                && scope.access.intersects(request.access)
        })
    }
}

impl FromStr for ScopeGrant {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ScopeGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.scopes.iter().map(|s| s.to_string()).collect();
        f.write_str(&rendered.join(" "))
    }
}

/// The scope a single inbound request needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestScope {
    pub context: Context,
    pub resource_type: String,
    pub access: Access,
}

impl RequestScope {
    /// Build the scope for `resource_path` (e.g. `Observation?patient=123`)
    /// requested with `http_method`.
    pub fn new(context: Context, resource_path: &str, http_method: &str) -> Result<Self> {
        Ok(Self {
            context,
            resource_type: resource_type_of(resource_path).to_string(),
            access: Access::from_method(http_method)?,
        })
    }
}

impl fmt::Display for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}", self.context, self.resource_type, self.access)
    }
}

/// Resource type named by a relative request path.
///
/// `Patient/123` and `Observation?subject=123` name `Patient` and
/// `Observation`; a bare query string falls back to [`FALLBACK_RESOURCE_TYPE`].
pub fn resource_type_of(resource_path: &str) -> &str {
    let path = resource_path
        .split_once('?')
        .map_or(resource_path, |(path, _)| path);
    match path.trim_start_matches('/').split('/').next() {
        Some(segment) if !segment.is_empty() => segment,
        _ => FALLBACK_RESOURCE_TYPE,
    }
}

/// True if `grant` permits `request`
pub fn allowed(request: &RequestScope, grant: &ScopeGrant) -> bool {
    grant.allows(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> RequestScope {
        RequestScope::new(Context::Patient, path, "GET").unwrap()
    }

    #[test]
    fn test_messy_relative_path() {
        let scope = get("Medication?subject=123");
        assert_eq!(scope.resource_type, "Medication");
    }

    #[test]
    fn test_resource_by_id() {
        let scope = get("Patient/5ee05359-57bf-4cee-8e89-91382c07e162");
        assert_eq!(scope.resource_type, "Patient");
        assert_eq!(scope.to_string(), "patient/Patient.rs");
    }

    #[test]
    fn test_second_page_falls_back() {
        let scope = get(
            "?_getpages=311f6eb3-d13e-4abc-863f-1882032da6e5&_getpagesoffset=40&_count=20",
        );
        assert_eq!(scope.resource_type, FALLBACK_RESOURCE_TYPE);
    }

    #[test]
    fn test_wildcard_resource_allowed() {
        let grant = ScopeGrant::parse("patient/*.r").unwrap();
        assert!(allowed(&get("Medication"), &grant));
        assert!(allowed(&get("Observation?patient=1"), &grant));
    }

    #[test]
    fn test_disallowed_resource() {
        let grant = ScopeGrant::parse("patient/Observation.r").unwrap();
        assert!(!allowed(&get("Medication"), &grant));
    }

    #[test]
    fn test_disallowed_method() {
        let grant = ScopeGrant::parse("patient/Observation.r").unwrap();
        let post = RequestScope::new(Context::Patient, "Observation", "POST").unwrap();
        assert!(!allowed(&post, &grant));
    }

    #[test]
    fn test_context_must_match() {
        let grant = ScopeGrant::parse("user/*.cruds").unwrap();
        assert!(!allowed(&get("Observation"), &grant));
    }

    #[test]
    fn test_delete_needs_d() {
        let grant = ScopeGrant::parse("patient/*.crus").unwrap();
        let delete = RequestScope::new(Context::Patient, "Observation/1", "DELETE").unwrap();
        assert!(!allowed(&delete, &grant));

        let grant = ScopeGrant::parse("patient/Observation.d").unwrap();
        assert!(allowed(&delete, &grant));
    }

    #[test]
    fn test_v1_access_forms() {
        let grant = ScopeGrant::parse("patient/Patient.read user/*.write").unwrap();
        assert_eq!(grant.to_string(), "patient/Patient.rs user/*.cud");

        let star = ScopeGrant::parse("system/*.*").unwrap();
        assert_eq!(star.scopes()[0].access, Access::ALL);
    }

    #[test]
    fn test_access_from_method() {
        assert_eq!(Access::from_method("get").unwrap().to_string(), "rs");
        assert_eq!(Access::from_method("HEAD").unwrap().to_string(), "rs");
        assert_eq!(Access::from_method("PATCH").unwrap().to_string(), "cu");
        assert_eq!(Access::from_method("DELETE").unwrap().to_string(), "d");
        assert_eq!(
            Access::from_method("OPTIONS"),
            Err(CoreError::UnsupportedMethod("OPTIONS".to_string()))
        );
    }

    #[test]
    fn test_invalid_grants() {
        for text in [
            "",
            "patient",
            "patient/Observation",
            "launch/patient",
            "doctor/*.r",
            "patient/*.x",
            "patient/*.rr",
            "patient/.r",
            "patient/Obs/1.r",
        ] {
            assert!(
                matches!(ScopeGrant::parse(text), Err(CoreError::InvalidScope(_))),
                "expected '{}' to be rejected",
                text
            );
        }
    }

    #[test]
    fn test_duplicate_triples_collapse() {
        let grant = ScopeGrant::parse("patient/*.rs patient/*.rs  user/Patient.r").unwrap();
        assert_eq!(grant.scopes().len(), 2);
    }

    #[test]
    fn test_unrestricted_allows_everything() {
        let grant = ScopeGrant::unrestricted();
        let delete = RequestScope::new(Context::System, "Task/9", "DELETE").unwrap();
        assert!(grant.allows(&delete));
        assert_eq!(
            grant.to_string(),
            "patient/*.cruds user/*.cruds system/*.cruds"
        );
    }
}
