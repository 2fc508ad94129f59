//! Hierarchical key/value storage with TTL.
//!
//! The [`StorageAdapter`] trait is the substitutability boundary between the
//! compiler and whatever actually persists data. Two backends ship here:
//! [`MemoryStorage`] for tests and single-process deployments, and
//! [`JsonFileStorage`] for a durable on-disk store. SQL or edge-KV backends
//! implement the same trait out of tree; nothing above the trait may depend
//! on backend-specific types.
//!
//! Keys are segment lists (`["cache", "filters", source]`). Values are
//! JSON-round-trippable. Expired entries are deleted eagerly when read and
//! are invisible to listing.

mod fs;
mod memory;
mod namespaces;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use fs::JsonFileStorage;
pub use memory::MemoryStorage;
pub use namespaces::{CacheEntry, CompilationHistory, CompilationMetadata, FilterCache};

/// Storage-layer failures.
///
/// Callers are expected to degrade gracefully: cache reads treat errors as
/// misses, history writes log a warning.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A stored value with its lifecycle timestamps (millisecond epochs).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEntry {
    pub data: Value,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: Option<i64>,
}

impl StoredEntry {
    /// True when the entry has outlived its TTL at `now_ms`.
    #[must_use]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_ms)
    }
}

/// A key/entry pair returned by [`StorageAdapter::list`].
#[derive(Debug, Clone)]
pub struct ListedEntry {
    pub key: Vec<String>,
    pub entry: StoredEntry,
}

/// Listing parameters. `start`/`end` bound the (lexicographic) key range,
/// `prefix` restricts to a subtree, `limit` caps the result count and
/// `reverse` flips the ordering.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub prefix: Option<Vec<String>>,
    pub start: Option<Vec<String>>,
    pub end: Option<Vec<String>>,
    pub limit: Option<usize>,
    pub reverse: bool,
}

/// Aggregate storage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub entry_count: u64,
    pub expired_count: u64,
    pub size_estimate_bytes: u64,
}

/// The storage contract: hierarchical keys, TTL, listing, stats.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Insert or replace the value at `key`. A replaced entry keeps its
    /// original `created_at`.
    async fn set(&self, key: &[String], value: Value, ttl_ms: Option<u64>)
        -> Result<(), StorageError>;

    /// Fetch the entry at `key`, deleting and returning `None` when it has
    /// expired.
    async fn get(&self, key: &[String]) -> Result<Option<StoredEntry>, StorageError>;

    /// Delete the entry at `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &[String]) -> Result<(), StorageError>;

    /// List entries, excluding expired ones.
    async fn list(&self, query: ListQuery) -> Result<Vec<ListedEntry>, StorageError>;

    /// Remove every expired entry, returning how many were dropped.
    async fn clear_expired(&self) -> Result<u64, StorageError>;

    /// Aggregate statistics over the stored entries.
    async fn stats(&self) -> Result<StorageStats, StorageError>;
}

/// Current time as a millisecond epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Segment separator for encoded keys. Unit separator cannot appear in
/// URLs, config names or timestamps, so encoded keys order the same way as
/// their segment lists.
pub(crate) const KEY_SEPARATOR: char = '\u{1f}';

pub(crate) fn encode_key(key: &[String]) -> String {
    key.join(&KEY_SEPARATOR.to_string())
}

pub(crate) fn decode_key(encoded: &str) -> Vec<String> {
    encoded.split(KEY_SEPARATOR).map(str::to_string).collect()
}

pub(crate) fn matches_prefix(encoded: &str, prefix: &[String]) -> bool {
    let decoded = decode_key(encoded);
    decoded.len() >= prefix.len() && decoded[..prefix.len()] == *prefix
}
