//! JSON-file storage backend: one file per entry under a root directory.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::{
    ListQuery, ListedEntry, StorageAdapter, StorageError, StorageStats, StoredEntry, encode_key,
    now_ms,
};

/// Durable storage that writes each entry as a JSON file. File names are
/// the SHA-256 of the encoded key, so arbitrary key segments (URLs
/// included) never leak into path syntax. Writes go through a temp file
/// and rename so readers never observe a torn entry.
#[derive(Debug)]
pub struct JsonFileStorage {
    root: Utf8PathBuf,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    key: Vec<String>,
    entry: StoredEntry,
}

impl JsonFileStorage {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn entry_path(&self, key: &[String]) -> Utf8PathBuf {
        let digest = Sha256::digest(encode_key(key).as_bytes());
        self.root.join(format!("{}.json", hex::encode(digest)))
    }

    async fn read_entry(&self, path: &Utf8Path) -> Option<PersistedEntry> {
        let bytes = tokio::fs::read(path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(%path, %err, "corrupted storage entry, removing");
                let _ = tokio::fs::remove_file(path).await;
                None
            }
        }
    }

    async fn write_entry(&self, path: &Utf8Path, entry: &PersistedEntry) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(entry)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn entry_paths(&self) -> Result<Vec<Utf8PathBuf>, StorageError> {
        let mut paths = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = match Utf8PathBuf::from_path_buf(item.path()) {
                Ok(path) => path,
                Err(_) => continue,
            };
            if path.extension() == Some("json") {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl StorageAdapter for JsonFileStorage {
    async fn set(
        &self,
        key: &[String],
        value: Value,
        ttl_ms: Option<u64>,
    ) -> Result<(), StorageError> {
        let now = now_ms();
        let path = self.entry_path(key);
        let created_at = match self.read_entry(&path).await {
            Some(existing) if !existing.entry.is_expired_at(now) => existing.entry.created_at,
            _ => now,
        };
        let persisted = PersistedEntry {
            key: key.to_vec(),
            entry: StoredEntry {
                data: value,
                created_at,
                updated_at: now,
                expires_at: ttl_ms.map(|ttl| now + ttl as i64),
            },
        };
        self.write_entry(&path, &persisted).await
    }

    async fn get(&self, key: &[String]) -> Result<Option<StoredEntry>, StorageError> {
        let path = self.entry_path(key);
        match self.read_entry(&path).await {
            Some(persisted) if persisted.entry.is_expired_at(now_ms()) => {
                tokio::fs::remove_file(&path).await.ok();
                Ok(None)
            }
            Some(persisted) => Ok(Some(persisted.entry)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &[String]) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, query: ListQuery) -> Result<Vec<ListedEntry>, StorageError> {
        let now = now_ms();
        let start = query.start.as_deref().map(encode_key);
        let end = query.end.as_deref().map(encode_key);

        let mut listed = Vec::new();
        for path in self.entry_paths().await? {
            let Some(persisted) = self.read_entry(&path).await else {
                continue;
            };
            if persisted.entry.is_expired_at(now) {
                continue;
            }
            let encoded = encode_key(&persisted.key);
            if let Some(prefix) = query.prefix.as_deref() {
                if persisted.key.len() < prefix.len() || persisted.key[..prefix.len()] != *prefix {
                    continue;
                }
            }
            if start.as_deref().is_some_and(|s| encoded.as_str() < s) {
                continue;
            }
            if end.as_deref().is_some_and(|e| encoded.as_str() >= e) {
                continue;
            }
            listed.push(ListedEntry {
                key: persisted.key,
                entry: persisted.entry,
            });
        }

        listed.sort_by_key(|item| encode_key(&item.key));
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
        let mut removed = 0;
        for path in self.entry_paths().await? {
            let Some(persisted) = self.read_entry(&path).await else {
                continue;
            };
            if persisted.entry.is_expired_at(now) {
                tokio::fs::remove_file(&path).await.ok();
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        let now = now_ms();
        let mut stats = StorageStats::default();
        for path in self.entry_paths().await? {
            let Some(persisted) = self.read_entry(&path).await else {
                continue;
            };
            if persisted.entry.is_expired_at(now) {
                stats.expired_count += 1;
            } else {
                stats.entry_count += 1;
                stats.size_estimate_bytes += persisted.entry.data.to_string().len() as u64;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn key(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| (*s).to_string()).collect()
    }

    fn open(dir: &TempDir) -> JsonFileStorage {
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        JsonFileStorage::new(root).unwrap()
    }

    #[tokio::test]
    async fn persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let k = key(&["cache", "filters", "https://example.org/a.txt"]);
        {
            let storage = open(&dir);
            storage.set(&k, json!(["||a^"]), None).await.unwrap();
        }
        let storage = open(&dir);
        let entry = storage.get(&k).await.unwrap().unwrap();
        assert_eq!(entry.data, json!(["||a^"]));
    }

    #[tokio::test]
    async fn corrupted_file_reads_as_missing() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        let k = key(&["a"]);
        storage.set(&k, json!(1), None).await.unwrap();
        let path = storage.entry_path(&k);
        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert!(storage.get(&k).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_and_expiry() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        storage
            .set(&key(&["snapshots", "sources", "s1"]), json!(1), None)
            .await
            .unwrap();
        storage
            .set(&key(&["snapshots", "sources", "s2"]), json!(2), Some(0))
            .await
            .unwrap();

        let listed = storage
            .list(ListQuery {
                prefix: Some(key(&["snapshots"])),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, key(&["snapshots", "sources", "s1"]));

        assert_eq!(storage.clear_expired().await.unwrap(), 1);
    }
}
