//! Orchestrator error type.

use std::sync::Arc;
use std::time::Duration;

use listforge_config::ConfigError;
use listforge_fetch::FetchError;
use listforge_storage::StorageError;
use thiserror::Error;

/// Everything that can fail a compilation.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The configuration failed validation; surfaced verbatim, no retry.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A required source could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The compilation observed its cancel token.
    #[error("compilation cancelled")]
    Cancelled,

    /// The compilation exceeded its deadline.
    #[error("compilation timed out after {0:?}")]
    Timeout(Duration),

    /// A batch exceeded the configured size cap.
    #[error("batch of {requested} exceeds the maximum of {limit}")]
    OverCapacity { requested: usize, limit: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("fingerprint error: {0}")]
    Fingerprint(String),

    /// A deduplicated caller observing the leader's failure.
    #[error(transparent)]
    Shared(Arc<CompileError>),
}

impl CompileError {
    /// The `reason` string reported on `compile:error` events.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration",
            Self::Fetch(_) => "source_fetch",
            Self::Cancelled => "cancelled",
            Self::Timeout(_) => "timeout",
            Self::OverCapacity { .. } => "over_capacity",
            Self::Storage(_) => "storage",
            Self::Serialization(_) | Self::Fingerprint(_) => "internal",
            Self::Shared(inner) => inner.reason(),
        }
    }

    /// True for [`CompileError::Cancelled`], looking through the shared
    /// wrapper.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Shared(inner) => inner.is_cancelled(),
            _ => false,
        }
    }
}
