//! Ordered, idempotent transformation passes over rule lists.
//!
//! Callers name a *set* of enabled passes; the pipeline always applies them
//! in the canonical order below, so the output depends only on which passes
//! are enabled, never on how the caller listed them.
//!
//! 1. `ConvertToAscii`
//! 2. `RemoveComments`
//! 3. `Compress`
//! 4. `RemoveModifiers`
//! 5. `Validate` / `ValidateAllowIp`
//! 6. `Deduplicate`
//! 7. `InvertAllow`
//! 8. `RemoveEmptyLines`
//! 9. `TrimLines`
//! 10. `InsertFinalNewLine`
//!
//! Every pass is a total function over `Vec<String>`: deterministic,
//! order-preserving, and idempotent.

mod convert;
mod modifiers;
mod passes;
mod validate;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use modifiers::DEFAULT_REMOVED_MODIFIERS;
pub use validate::DANGEROUS_PATTERNS;

/// The named transformation passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformId {
    ConvertToAscii,
    RemoveComments,
    Compress,
    RemoveModifiers,
    Validate,
    ValidateAllowIp,
    Deduplicate,
    InvertAllow,
    RemoveEmptyLines,
    TrimLines,
    InsertFinalNewLine,
}

/// Unknown transformation name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown transformation: {0}")]
pub struct UnknownTransform(pub String);

impl TransformId {
    /// All pass identifiers, in canonical order.
    pub const ALL: &'static [Self] = &[
        Self::ConvertToAscii,
        Self::RemoveComments,
        Self::Compress,
        Self::RemoveModifiers,
        Self::Validate,
        Self::ValidateAllowIp,
        Self::Deduplicate,
        Self::InvertAllow,
        Self::RemoveEmptyLines,
        Self::TrimLines,
        Self::InsertFinalNewLine,
    ];

    /// Position of this pass in the canonical composition order.
    /// `Validate` and `ValidateAllowIp` share a slot.
    #[must_use]
    pub const fn canonical_rank(self) -> u8 {
        match self {
            Self::ConvertToAscii => 0,
            Self::RemoveComments => 1,
            Self::Compress => 2,
            Self::RemoveModifiers => 3,
            Self::Validate | Self::ValidateAllowIp => 4,
            Self::Deduplicate => 5,
            Self::InvertAllow => 6,
            Self::RemoveEmptyLines => 7,
            Self::TrimLines => 8,
            Self::InsertFinalNewLine => 9,
        }
    }

    /// The pass name as it appears in configuration documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConvertToAscii => "ConvertToAscii",
            Self::RemoveComments => "RemoveComments",
            Self::Compress => "Compress",
            Self::RemoveModifiers => "RemoveModifiers",
            Self::Validate => "Validate",
            Self::ValidateAllowIp => "ValidateAllowIp",
            Self::Deduplicate => "Deduplicate",
            Self::InvertAllow => "InvertAllow",
            Self::RemoveEmptyLines => "RemoveEmptyLines",
            Self::TrimLines => "TrimLines",
            Self::InsertFinalNewLine => "InsertFinalNewLine",
        }
    }
}

impl fmt::Display for TransformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformId {
    type Err = UnknownTransform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownTransform(s.to_string()))
    }
}

/// Tuning knobs shared by the passes.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Option names stripped by `RemoveModifiers`.
    pub removed_modifiers: Vec<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            removed_modifiers: DEFAULT_REMOVED_MODIFIERS
                .iter()
                .map(|m| (*m).to_string())
                .collect(),
        }
    }
}

/// An enabled-set of passes, stored in canonical order.
#[derive(Debug, Clone)]
pub struct Pipeline {
    passes: Vec<TransformId>,
    options: PipelineOptions,
}

impl Pipeline {
    /// Build a pipeline from an enabled-set. Duplicates collapse; order of
    /// the input is irrelevant.
    #[must_use]
    pub fn new(enabled: &[TransformId]) -> Self {
        Self::with_options(enabled, PipelineOptions::default())
    }

    /// Build a pipeline with explicit options.
    #[must_use]
    pub fn with_options(enabled: &[TransformId], options: PipelineOptions) -> Self {
        let mut passes: Vec<TransformId> = TransformId::ALL
            .iter()
            .copied()
            .filter(|id| enabled.contains(id))
            .collect();
        passes.dedup();
        Self { passes, options }
    }

    /// The enabled passes in execution order.
    #[must_use]
    pub fn passes(&self) -> &[TransformId] {
        &self.passes
    }

    /// True when no pass is enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Run the full pipeline.
    #[must_use]
    pub fn apply(&self, mut lines: Vec<String>) -> Vec<String> {
        for pass in &self.passes {
            lines = self.run_pass(*pass, lines);
        }
        lines
    }

    /// Run a single pass. Exposed so the orchestrator can interleave
    /// cancellation checks and progress events between stages.
    #[must_use]
    pub fn run_pass(&self, id: TransformId, lines: Vec<String>) -> Vec<String> {
        let before = lines.len();
        let out = match id {
            TransformId::ConvertToAscii => convert::convert_to_ascii(lines),
            TransformId::RemoveComments => passes::remove_comments(lines),
            TransformId::Compress => passes::compress(lines),
            TransformId::RemoveModifiers => {
                modifiers::remove_modifiers(lines, &self.options.removed_modifiers)
            }
            TransformId::Validate => validate::validate(lines, false),
            TransformId::ValidateAllowIp => validate::validate(lines, true),
            TransformId::Deduplicate => passes::deduplicate(lines),
            TransformId::InvertAllow => passes::invert_allow(lines),
            TransformId::RemoveEmptyLines => passes::remove_empty_lines(lines),
            TransformId::TrimLines => passes::trim_lines(lines),
            TransformId::InsertFinalNewLine => passes::insert_final_new_line(lines),
        };
        debug!(pass = %id, before, after = out.len(), "transformation applied");
        out
    }
}
