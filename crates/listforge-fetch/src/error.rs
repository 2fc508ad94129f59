//! Fetch-layer errors and the non-fatal diagnostic record.

use serde::Serialize;
use thiserror::Error;

/// Errors that fail a source fetch outright.
///
/// Include-level problems never appear here: a broken `!#include` becomes a
/// [`Diagnostic`] so one bad include cannot take a whole list down.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The root source could not be retrieved.
    #[error("failed to fetch {src}{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    SourceFetch {
        src: String,
        status: Option<u16>,
        message: String,
    },

    /// Unbalanced or malformed preprocessor directives.
    #[error("directive error in {src} at line {line}: {message}")]
    DirectiveSyntax {
        src: String,
        line: usize,
        message: String,
    },
}

impl FetchError {
    pub(crate) fn fetch(source: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::SourceFetch {
            src: source.to_string(),
            status,
            message: message.into(),
        }
    }

    pub(crate) fn directive(source: &str, line: usize, message: impl Into<String>) -> Self {
        Self::DirectiveSyntax {
            src: source.to_string(),
            line,
            message: message.into(),
        }
    }
}

/// Recoverable problems observed during a download.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// The source the problem was observed in.
    pub source: String,
    pub message: String,
}

/// What went wrong, for event reporting.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    IncludeMissing,
    IncludeCycle,
    IncludeDepthExceeded,
    NetworkRetry,
}
