//! Compilation result and metrics types.

use serde::{Deserialize, Serialize};

/// Timing and cache behavior for one source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceMetric {
    pub name: String,
    pub source: String,
    pub rule_count: usize,
    pub duration_ms: u64,
    pub from_cache: bool,
}

/// Aggregate metrics for a compilation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompileMetrics {
    pub duration_ms: u64,
    pub source_count: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub sources: Vec<SourceMetric>,
}

/// The outcome of one compile request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompilationResult {
    pub success: bool,
    pub rules: Vec<String>,
    pub rule_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<CompileMetrics>,
    /// ISO-8601 UTC.
    pub compiled_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    /// Served from the result cache.
    pub cached: bool,
    /// Attached to another in-flight compilation of the same fingerprint.
    pub deduplicated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
