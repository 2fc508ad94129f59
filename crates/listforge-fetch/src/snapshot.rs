//! Per-source snapshots and change detection.

use std::sync::Arc;

use listforge_rules::Rule;
use listforge_storage::{ListQuery, StorageAdapter, StorageError, now_ms};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// How many rules the snapshot keeps as a sample.
const SAMPLE_SIZE: usize = 10;

/// A lightweight record of a source's state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceSnapshot {
    pub source: String,
    pub timestamp_ms: i64,
    /// SHA-256 hex of the `\n`-joined content.
    pub hash: String,
    pub rule_count: usize,
    /// The first rules of the list, at most ten.
    pub rule_sample: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Outcome of comparing a fresh download against the stored snapshot.
#[derive(Debug, Clone)]
pub struct ChangeReport {
    pub changed: bool,
    pub previous: Option<SourceSnapshot>,
    pub current: SourceSnapshot,
}

/// SHA-256 hex digest of the `\n`-joined lines.
#[must_use]
pub fn content_hash(lines: &[String]) -> String {
    let mut hasher = Sha256::new();
    let mut first = true;
    for line in lines {
        if !first {
            hasher.update(b"\n");
        }
        first = false;
        hasher.update(line.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Tracks one current snapshot per source plus an archived history.
#[derive(Clone)]
pub struct ChangeDetector {
    storage: Arc<dyn StorageAdapter>,
}

impl ChangeDetector {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self { storage }
    }

    fn current_key(source: &str) -> Vec<String> {
        vec![
            "snapshots".to_string(),
            "sources".to_string(),
            source.to_string(),
        ]
    }

    fn history_prefix(source: &str) -> Vec<String> {
        vec![
            "snapshots".to_string(),
            "history".to_string(),
            source.to_string(),
        ]
    }

    /// Compare fresh content against the stored snapshot, archive the
    /// previous snapshot, and store the new one as current.
    pub async fn observe(
        &self,
        source: &str,
        lines: &[String],
        etag: Option<&str>,
    ) -> Result<ChangeReport, StorageError> {
        let rules: Vec<&String> = lines
            .iter()
            .filter(|line| Rule::parse(line).is_rule())
            .collect();
        let current = SourceSnapshot {
            source: source.to_string(),
            timestamp_ms: now_ms(),
            hash: content_hash(lines),
            rule_count: rules.len(),
            rule_sample: rules
                .iter()
                .take(SAMPLE_SIZE)
                .map(|line| (*line).clone())
                .collect(),
            etag: etag.map(str::to_string),
        };

        let previous = match self.storage.get(&Self::current_key(source)).await? {
            Some(entry) => serde_json::from_value::<SourceSnapshot>(entry.data).ok(),
            None => None,
        };

        let changed = previous.as_ref().is_none_or(|prev| prev.hash != current.hash);
        if changed {
            debug!(source, rule_count = current.rule_count, "source content changed");
            if let Some(prev) = &previous {
                let mut key = Self::history_prefix(source);
                // Hash suffix keeps rapid successive snapshots distinct even
                // within one millisecond.
                key.push(format!("{:020}-{}", prev.timestamp_ms, &prev.hash[..8]));
                self.storage
                    .set(&key, serde_json::to_value(prev)?, None)
                    .await?;
            }
        }

        self.storage
            .set(
                &Self::current_key(source),
                serde_json::to_value(&current)?,
                None,
            )
            .await?;

        Ok(ChangeReport {
            changed,
            previous,
            current,
        })
    }

    /// The stored current snapshot, if any.
    pub async fn current(&self, source: &str) -> Result<Option<SourceSnapshot>, StorageError> {
        match self.storage.get(&Self::current_key(source)).await? {
            Some(entry) => Ok(serde_json::from_value(entry.data).ok()),
            None => Ok(None),
        }
    }

    /// Archived snapshots, newest first.
    pub async fn history(
        &self,
        source: &str,
        limit: usize,
    ) -> Result<Vec<SourceSnapshot>, StorageError> {
        let listed = self
            .storage
            .list(ListQuery {
                prefix: Some(Self::history_prefix(source)),
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
    use listforge_storage::MemoryStorage;

    fn lines(input: &[&str]) -> Vec<String> {
        input.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn first_observation_is_a_change() {
        let detector = ChangeDetector::new(Arc::new(MemoryStorage::new()));
        let report = detector
            .observe("src", &lines(&["! c", "||a^", "||b^"]), None)
            .await
            .unwrap();
        assert!(report.changed);
        assert!(report.previous.is_none());
        assert_eq!(report.current.rule_count, 2);
        assert_eq!(report.current.rule_sample, lines(&["||a^", "||b^"]));
    }

    #[tokio::test]
    async fn unchanged_content_reports_no_change() {
        let detector = ChangeDetector::new(Arc::new(MemoryStorage::new()));
        let content = lines(&["||a^"]);
        detector.observe("src", &content, None).await.unwrap();
        let report = detector.observe("src", &content, None).await.unwrap();
        assert!(!report.changed);
        assert_eq!(
            report.previous.unwrap().hash,
            report.current.hash
        );
    }

    #[tokio::test]
    async fn changes_archive_history() {
        let detector = ChangeDetector::new(Arc::new(MemoryStorage::new()));
        detector.observe("src", &lines(&["||a^"]), None).await.unwrap();
        detector.observe("src", &lines(&["||b^"]), None).await.unwrap();
        detector.observe("src", &lines(&["||c^"]), None).await.unwrap();

        let history = detector.history("src", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        let current = detector.current("src").await.unwrap().unwrap();
        assert_eq!(current.rule_sample, lines(&["||c^"]));
    }

    #[test]
    fn hash_is_stable_and_sensitive() {
        let a = content_hash(&lines(&["||a^", "||b^"]));
        let b = content_hash(&lines(&["||a^", "||b^"]));
        let c = content_hash(&lines(&["||b^", "||a^"]));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
