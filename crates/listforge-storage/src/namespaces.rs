//! Convenience namespaces over the raw adapter: the filter-list cache and
//! the append-only compilation history.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{ListQuery, StorageAdapter, StorageError, now_ms};

/// A cached upstream filter list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub source: String,
    pub content: Vec<String>,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// One compilation run, recorded for history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompilationMetadata {
    pub config_name: String,
    pub timestamp_ms: i64,
    pub source_count: usize,
    pub rule_count: usize,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

/// `cache/filters/<source>` namespace.
#[derive(Clone)]
pub struct FilterCache {
    storage: Arc<dyn StorageAdapter>,
}

impl FilterCache {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self { storage }
    }

    fn key(source: &str) -> Vec<String> {
        vec!["cache".to_string(), "filters".to_string(), source.to_string()]
    }

    /// Look up a cached list. Storage errors degrade to a miss.
    pub async fn get(&self, source: &str) -> Option<CacheEntry> {
        let entry = match self.storage.get(&Self::key(source)).await {
            Ok(entry) => entry?,
            Err(err) => {
                warn!(source, %err, "filter cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_value(entry.data) {
            Ok(cached) => Some(cached),
            Err(err) => {
                warn!(source, %err, "filter cache entry malformed, invalidating");
                self.invalidate(source).await;
                None
            }
        }
    }

    /// Store a fresh download. Expiry lives on the entry itself
    /// (`expires_at`), not on the storage TTL: a stale entry must survive
    /// long enough for its ETag to be replayed as `If-None-Match`. The
    /// caller deletes the entry on expiry-read.
    pub async fn put(
        &self,
        source: &str,
        content: Vec<String>,
        hash: String,
        etag: Option<String>,
        ttl_ms: Option<u64>,
    ) -> Result<(), StorageError> {
        let now = now_ms();
        let entry = CacheEntry {
            source: source.to_string(),
            content,
            hash,
            etag,
            created_at: now,
            updated_at: now,
            expires_at: ttl_ms.map(|ttl| now + ttl as i64),
        };
        let value = serde_json::to_value(&entry)?;
        self.storage.set(&Self::key(source), value, None).await
    }

    /// Drop a cached list. Failures are logged, not surfaced.
    pub async fn invalidate(&self, source: &str) {
        if let Err(err) = self.storage.delete(&Self::key(source)).await {
            warn!(source, %err, "filter cache invalidation failed");
        }
    }
}

/// `metadata/compilations/<config-name>/<timestamp>` namespace.
#[derive(Clone)]
pub struct CompilationHistory {
    storage: Arc<dyn StorageAdapter>,
}

impl CompilationHistory {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self { storage }
    }

    fn prefix(config_name: &str) -> Vec<String> {
        vec![
            "metadata".to_string(),
            "compilations".to_string(),
            config_name.to_string(),
        ]
    }

    /// Append one compilation record. History writes are non-fatal by
    /// policy; callers log the error and move on.
    pub async fn record(&self, meta: &CompilationMetadata) -> Result<(), StorageError> {
        let mut key = Self::prefix(&meta.config_name);
        // Zero-padded so lexicographic key order matches chronological order.
        key.push(format!("{:020}", meta.timestamp_ms));
        self.storage
            .set(&key, serde_json::to_value(meta)?, None)
            .await
    }

    /// Most recent compilations for a configuration, newest first.
    pub async fn recent(
        &self,
        config_name: &str,
        limit: usize,
    ) -> Result<Vec<CompilationMetadata>, StorageError> {
        let listed = self
            .storage
            .list(ListQuery {
                prefix: Some(Self::prefix(config_name)),
                limit: Some(limit),
                reverse: true,
                ..ListQuery::default()
            })
            .await?;
        Ok(listed
            .into_iter()
            .filter_map(|item| serde_json::from_value(item.entry.data).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    #[tokio::test]
    async fn filter_cache_round_trip() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorage::new());
        let cache = FilterCache::new(storage);
        let source = "https://example.org/list.txt";

        assert!(cache.get(source).await.is_none());
        cache
            .put(
                source,
                vec!["||a^".to_string()],
                "abc123".to_string(),
                Some("\"etag\"".to_string()),
                Some(60_000),
            )
            .await
            .unwrap();

        let entry = cache.get(source).await.unwrap();
        assert_eq!(entry.content, vec!["||a^".to_string()]);
        assert_eq!(entry.etag.as_deref(), Some("\"etag\""));
        assert!(entry.expires_at.is_some());

        cache.invalidate(source).await;
        assert!(cache.get(source).await.is_none());
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorage::new());
        let history = CompilationHistory::new(storage);
        for (ts, rules) in [(1_000, 10), (2_000, 20), (3_000, 30)] {
            history
                .record(&CompilationMetadata {
                    config_name: "main".to_string(),
                    timestamp_ms: ts,
                    source_count: 1,
                    rule_count: rules,
                    duration_ms: 5,
                    output_path: None,
                })
                .await
                .unwrap();
        }

        let recent = history.recent("main", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].timestamp_ms, 3_000);
        assert_eq!(recent[1].timestamp_ms, 2_000);
    }
}
