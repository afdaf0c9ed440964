use serde::{Deserialize, Serialize};

/// FHIR OperationOutcome, the body of every error the proxy itself returns
/// See: https://www.hl7.org/fhir/operationoutcome.html
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub resource_type: String,
    pub issue: Vec<OperationOutcomeIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcomeIssue {
    pub severity: IssueSeverity,
    pub code: IssueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
}

/// Subset of the FHIR issue-type value set the proxy reports
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    Invalid,
    Structure,
    Required,
    TooLong,
    Forbidden,
    NotSupported,
    NotFound,
    Exception,
    Timeout,
    Transient,
}

impl OperationOutcome {
    /// Create a new OperationOutcome with a single issue
    pub fn new(severity: IssueSeverity, code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            issue: vec![OperationOutcomeIssue {
                severity,
                code,
                diagnostics: Some(diagnostics.into()),
            }],
        }
    }

    pub fn error(code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Error, code, diagnostics)
    }

    /// Request scope not granted by any source that could serve it
    pub fn forbidden(diagnostics: impl Into<String>) -> Self {
        Self::error(IssueType::Forbidden, diagnostics)
    }

    /// Required request input (session value, JSON body, ...) is missing
    pub fn required(diagnostics: impl Into<String>) -> Self {
        Self::error(IssueType::Required, diagnostics)
    }

    /// Request input that could not be parsed
    pub fn invalid(diagnostics: impl Into<String>) -> Self {
        Self::error(IssueType::Invalid, diagnostics)
    }

    pub fn too_long(diagnostics: impl Into<String>) -> Self {
        Self::error(IssueType::TooLong, diagnostics)
    }

    /// An upstream server failed or answered with an error status
    pub fn upstream(source: &str, diagnostics: impl Into<String>) -> Self {
        Self::error(
            IssueType::Transient,
            format!("{}: {}", source, diagnostics.into()),
        )
    }

    /// An upstream answer did not have the expected resource shape
    pub fn unexpected_shape(diagnostics: impl Into<String>) -> Self {
        Self::error(IssueType::Structure, diagnostics)
    }

    /// Proxy-side failure (configuration, storage)
    pub fn fatal(diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Fatal, IssueType::Exception, diagnostics)
    }

    pub fn timeout(diagnostics: impl Into<String>) -> Self {
        Self::error(IssueType::Timeout, diagnostics)
    }

    pub fn not_supported(diagnostics: impl Into<String>) -> Self {
        Self::error(IssueType::NotSupported, diagnostics)
    }

    /// First diagnostics string, if any
    pub fn diagnostics(&self) -> Option<&str> {
        self.issue.first().and_then(|i| i.diagnostics.as_deref())
    }
}
