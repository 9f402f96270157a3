use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::LowerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

/// Ordered list of recovered problems found while lowering.
///
/// Every entry is also forwarded to `tracing` at the matching level, so a
/// subscriber sees the same stream the caller receives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, severity: Severity, code: impl Into<String>, message: impl Into<String>) {
        let code = code.into();
        let message = message.into();
        match severity {
            Severity::Info => info!(code = %code, "{}", message),
            Severity::Warning => warn!(code = %code, "{}", message),
            Severity::Error => error!(code = %code, "{}", message),
        }
        self.entries.push(Diagnostic {
            severity,
            code,
            message,
        });
    }

    pub fn warn(&mut self, code: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, code, message);
    }

    pub fn info(&mut self, code: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Info, code, message);
    }

    /// Records a recovered lowering failure under its taxonomy code.
    pub fn record(&mut self, failure: &LowerError) {
        let severity = match failure {
            LowerError::CatalogMiss { .. } => Severity::Info,
            LowerError::MalformedDocument(_) => Severity::Error,
            _ => Severity::Warning,
        };
        self.push(severity, failure.code(), failure.to_string());
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.entries.iter().any(|entry| entry.code == code)
    }

    pub fn count_code(&self, code: &str) -> usize {
        self.entries.iter().filter(|entry| entry.code == code).count()
    }
}
