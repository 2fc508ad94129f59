//! In-memory storage backend.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{
    ListQuery, ListedEntry, StorageAdapter, StorageError, StorageStats, StoredEntry, decode_key,
    encode_key, matches_prefix, now_ms,
};

/// BTreeMap-backed storage. Safe for concurrent use; writes to the same key
/// are serialized by the write lock.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, StoredEntry>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn set(
        &self,
        key: &[String],
        value: Value,
        ttl_ms: Option<u64>,
    ) -> Result<(), StorageError> {
        let now = now_ms();
        let encoded = encode_key(key);
        let mut entries = self.entries.write().await;
        let created_at = entries
            .get(&encoded)
            .filter(|e| !e.is_expired_at(now))
            .map_or(now, |e| e.created_at);
        entries.insert(
            encoded,
            StoredEntry {
                data: value,
                created_at,
                updated_at: now,
                expires_at: ttl_ms.map(|ttl| now + ttl as i64),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &[String]) -> Result<Option<StoredEntry>, StorageError> {
        let now = now_ms();
        let encoded = encode_key(key);
        let mut entries = self.entries.write().await;
        match entries.get(&encoded) {
            Some(entry) if entry.is_expired_at(now) => {
                entries.remove(&encoded);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &[String]) -> Result<(), StorageError> {
        self.entries.write().await.remove(&encode_key(key));
        Ok(())
    }

    async fn list(&self, query: ListQuery) -> Result<Vec<ListedEntry>, StorageError> {
        let now = now_ms();
        let entries = self.entries.read().await;

        let start = query
            .start
            .as_deref()
            .map_or(Bound::Unbounded, |k| Bound::Included(encode_key(k)));
        let end = query
            .end
            .as_deref()
            .map_or(Bound::Unbounded, |k| Bound::Excluded(encode_key(k)));

        let mut listed: Vec<ListedEntry> = entries
            .range((start, end))
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .filter(|(encoded, _)| {
                query
                    .prefix
                    .as_deref()
                    .is_none_or(|prefix| matches_prefix(encoded, prefix))
            })
            .map(|(encoded, entry)| ListedEntry {
                key: decode_key(encoded),
                entry: entry.clone(),
            })
            .collect();

        if query.reverse {
            listed.reverse();
        }
        if let Some(limit) = query.limit {
            listed.truncate(limit);
        }
        Ok(listed)
    }

    async fn clear_expired(&self) -> Result<u64, StorageError> {
        let now = now_ms();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        Ok((before - entries.len()) as u64)
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        let now = now_ms();
        let entries = self.entries.read().await;
        let mut stats = StorageStats::default();
        for (encoded, entry) in entries.iter() {
            if entry.is_expired_at(now) {
                stats.expired_count += 1;
            } else {
                stats.entry_count += 1;
                stats.size_estimate_bytes +=
                    (encoded.len() + entry.data.to_string().len()) as u64;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let storage = MemoryStorage::new();
        let k = key(&["cache", "filters", "https://example.org/list.txt"]);

        storage.set(&k, json!({"rules": 3}), None).await.unwrap();
        let entry = storage.get(&k).await.unwrap().unwrap();
        assert_eq!(entry.data, json!({"rules": 3}));
        assert!(entry.expires_at.is_none());

        storage.delete(&k).await.unwrap();
        assert!(storage.get(&k).await.unwrap().is_none());
        // Idempotent delete
        storage.delete(&k).await.unwrap();
    }

    #[tokio::test]
    async fn expired_entries_vanish_on_read() {
        let storage = MemoryStorage::new();
        let k = key(&["a"]);
        storage.set(&k, json!(1), Some(0)).await.unwrap();
        assert!(storage.get(&k).await.unwrap().is_none());
        assert_eq!(storage.stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn replacing_keeps_created_at() {
        let storage = MemoryStorage::new();
        let k = key(&["a"]);
        storage.set(&k, json!(1), None).await.unwrap();
        let first = storage.get(&k).await.unwrap().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        storage.set(&k, json!(2), None).await.unwrap();
        let second = storage.get(&k).await.unwrap().unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn list_respects_prefix_limit_reverse() {
        let storage = MemoryStorage::new();
        for name in ["a", "b", "c"] {
            storage
                .set(&key(&["snapshots", "history", name]), json!(name), None)
                .await
                .unwrap();
        }
        storage.set(&key(&["other", "x"]), json!(0), None).await.unwrap();

        let listed = storage
            .list(ListQuery {
                prefix: Some(key(&["snapshots", "history"])),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].key, key(&["snapshots", "history", "a"]));

        let reversed = storage
            .list(ListQuery {
                prefix: Some(key(&["snapshots", "history"])),
                limit: Some(2),
                reverse: true,
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(reversed.len(), 2);
        assert_eq!(reversed[0].key, key(&["snapshots", "history", "c"]));
    }

    #[tokio::test]
    async fn clear_expired_counts() {
        let storage = MemoryStorage::new();
        storage.set(&key(&["live"]), json!(1), None).await.unwrap();
        storage.set(&key(&["dead1"]), json!(1), Some(0)).await.unwrap();
        storage.set(&key(&["dead2"]), json!(1), Some(0)).await.unwrap();
        assert_eq!(storage.clear_expired().await.unwrap(), 2);
        assert_eq!(storage.stats().await.unwrap().entry_count, 1);
    }
}
