use crate::types::SourceSpan;
use thiserror::Error;

/// Error surfaced to callers of the lowering pipeline.
///
/// Only document-level failures (unparseable XML, a missing required section,
/// an invalid configuration) travel through this type; recoverable content
/// problems are reported as diagnostics next to the scene instead.
#[derive(Debug, Error, Clone)]
#[error("{code}: {message}")]
pub struct ScenarioError {
    pub code: String,
    pub message: String,
    pub span: Option<SourceSpan>,
}

impl ScenarioError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            span: None,
        }
    }

    pub fn with_span(
        code: impl Into<String>,
        message: impl Into<String>,
        span: SourceSpan,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            span: Some(span),
        }
    }
}

/// Failures raised while lowering a scenario document.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LowerError {
    #[error("parameter \"{0}\" is not declared")]
    UnresolvedParameter(String),
    #[error("{kind} catalog has no entry named \"{name}\"")]
    CatalogMiss { kind: String, name: String },
    #[error("custom command kind \"{0}\" is not supported")]
    UnknownCommand(String),
    #[error("condition \"{0}\" has no supported trigger branch")]
    UnsupportedTrigger(String),
    #[error("route for \"{0}\" has no waypoints")]
    EmptyRoute(String),
    #[error("{0}")]
    MalformedDocument(String),
}

impl LowerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnresolvedParameter(_) => "UNRESOLVED_PARAMETER",
            Self::CatalogMiss { .. } => "CATALOG_MISS",
            Self::UnknownCommand(_) => "UNKNOWN_COMMAND",
            Self::UnsupportedTrigger(_) => "UNSUPPORTED_TRIGGER",
            Self::EmptyRoute(_) => "EMPTY_ROUTE",
            Self::MalformedDocument(_) => "MALFORMED_DOCUMENT",
        }
    }

    /// Whether lowering can continue after this failure.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::MalformedDocument(_))
    }
}

impl From<LowerError> for ScenarioError {
    fn from(error: LowerError) -> Self {
        ScenarioError::new(error.code(), error.to_string())
    }
}
