//! Cache-first downloading: the composition of downloader, filter cache,
//! change detection and health recording.

use std::sync::Arc;
use std::time::Instant;

use listforge_storage::{FilterCache, StorageAdapter, now_ms};
use tracing::{debug, info, warn};

use crate::downloader::{Conditional, FilterDownloader};
use crate::error::{Diagnostic, FetchError};
use crate::health::SourceHealthMonitor;
use crate::snapshot::{ChangeDetector, ChangeReport, content_hash};

/// Default time a cached upstream list stays fresh.
pub const DEFAULT_CACHE_TTL_MS: u64 = 3_600_000;

/// The result of a cache-aware download.
#[derive(Debug, Clone)]
pub struct CachedDownload {
    pub lines: Vec<String>,
    /// SHA-256 of the returned content.
    pub hash: String,
    /// True when served from the cache (including a 304 revalidation).
    pub from_cache: bool,
    pub diagnostics: Vec<Diagnostic>,
    /// Present when a real download ran and change detection completed.
    pub change: Option<ChangeReport>,
}

/// Wraps a [`FilterDownloader`] with the upstream content cache, snapshot
/// change detection and health attempt recording.
pub struct CachingDownloader {
    downloader: FilterDownloader,
    cache: FilterCache,
    changes: ChangeDetector,
    health: SourceHealthMonitor,
    ttl_ms: u64,
}

impl CachingDownloader {
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        downloader: FilterDownloader,
        ttl_ms: u64,
    ) -> Self {
        Self {
            downloader,
            cache: FilterCache::new(storage.clone()),
            changes: ChangeDetector::new(storage.clone()),
            health: SourceHealthMonitor::new(storage),
            ttl_ms,
        }
    }

    /// The health monitor backing this downloader.
    #[must_use]
    pub fn health(&self) -> &SourceHealthMonitor {
        &self.health
    }

    /// The change detector backing this downloader.
    #[must_use]
    pub fn changes(&self) -> &ChangeDetector {
        &self.changes
    }

    /// Download a source, consulting the cache first.
    ///
    /// Cache hits return immediately without recording a health attempt.
    /// A stale entry's ETag is replayed as `If-None-Match`; a 304 refreshes
    /// the entry without re-reading the body. Real downloads record a
    /// health attempt either way and run change detection on success.
    pub async fn download(&self, source: &str) -> Result<CachedDownload, FetchError> {
        let mut stale: Option<listforge_storage::CacheEntry> = None;
        if let Some(entry) = self.cache.get(source).await {
            if !entry_expired(entry.expires_at) {
                debug!(source, "filter cache hit");
                return Ok(CachedDownload {
                    hash: entry.hash,
                    lines: entry.content,
                    from_cache: true,
                    diagnostics: Vec::new(),
                    change: None,
                });
            }
            // Expired on read. Keep the entry around until the refresh
            // resolves so its ETag (and on a 304, its content) can be
            // reused.
            stale = Some(entry);
        }

        let stale_etag = stale.as_ref().and_then(|entry| entry.etag.clone());
        let started = Instant::now();
        let outcome = self
            .downloader
            .download_conditional(source, stale_etag.as_deref())
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Conditional::Fresh(download)) => {
                let hash = content_hash(&download.lines);
                self.health
                    .record(source, true, duration_ms, Some(download.lines.len()), None)
                    .await;
                if let Err(err) = self
                    .cache
                    .put(
                        source,
                        download.lines.clone(),
                        hash.clone(),
                        download.etag.clone(),
                        Some(self.ttl_ms),
                    )
                    .await
                {
                    warn!(source, %err, "filter cache write failed");
                }
                let change = match self
                    .changes
                    .observe(source, &download.lines, download.etag.as_deref())
                    .await
                {
                    Ok(report) => {
                        if report.changed {
                            info!(source, rule_count = report.current.rule_count, "source changed");
                        }
                        Some(report)
                    }
                    Err(err) => {
                        warn!(source, %err, "change detection failed");
                        None
                    }
                };
                Ok(CachedDownload {
                    hash,
                    lines: download.lines,
                    from_cache: false,
                    diagnostics: download.diagnostics,
                    change,
                })
            }
            Ok(Conditional::NotModified) => {
                if let Some(entry) = stale {
                    // Upstream unchanged: refresh the entry's lifetime
                    // without re-reading the body.
                    self.health
                        .record(
                            source,
                            true,
                            duration_ms,
                            Some(entry.content.len()),
                            None,
                        )
                        .await;
                    if let Err(err) = self
                        .cache
                        .put(
                            source,
                            entry.content.clone(),
                            entry.hash.clone(),
                            entry.etag.clone(),
                            Some(self.ttl_ms),
                        )
                        .await
                    {
                        warn!(source, %err, "filter cache refresh failed");
                    }
                    Ok(CachedDownload {
                        hash: entry.hash,
                        lines: entry.content,
                        from_cache: true,
                        diagnostics: Vec::new(),
                        change: None,
                    })
                } else {
                    // A 304 without a stored entry should not happen; treat
                    // it as a fetch failure rather than inventing content.
                    self.health
                        .record(source, false, duration_ms, None, None)
                        .await;
                    Err(FetchError::fetch(source, Some(304), "304 with no cached entry"))
                }
            }
            Err(err) => {
                self.health
                    .record(source, false, duration_ms, None, Some(err.to_string()))
                    .await;
                Err(err)
            }
        }
    }
}

fn entry_expired(expires_at: Option<i64>) -> bool {
    expires_at.is_some_and(|at| at <= now_ms())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::DownloadOptions;
    use listforge_storage::MemoryStorage;

    fn caching(prefetched: &[(&str, &str)], ttl_ms: u64) -> CachingDownloader {
        let options = DownloadOptions {
            prefetched: prefetched
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            ..DownloadOptions::default()
        };
        CachingDownloader::new(
            Arc::new(MemoryStorage::new()),
            FilterDownloader::new(options).unwrap(),
            ttl_ms,
        )
    }

    #[tokio::test]
    async fn second_download_hits_cache() {
        let dl = caching(&[("mem://a", "||a^\n")], 60_000);
        let first = dl.download("mem://a").await.unwrap();
        assert!(!first.from_cache);
        assert!(first.change.as_ref().unwrap().changed);

        let second = dl.download("mem://a").await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.lines, first.lines);
        assert_eq!(second.hash, first.hash);

        // Only the real download recorded a health attempt.
        let health = dl.health().get_or_unknown("mem://a").await;
        assert_eq!(health.total_attempts, 1);
    }

    #[tokio::test]
    async fn failure_records_health() {
        let dl = caching(&[], 60_000);
        assert!(dl.download("/missing/file.txt").await.is_err());
        let health = dl.health().get_or_unknown("/missing/file.txt").await;
        assert_eq!(health.total_attempts, 1);
        assert_eq!(health.failed_attempts, 1);
        assert!(health.is_currently_failing);
    }

    #[tokio::test]
    async fn expired_cache_downloads_again() {
        let dl = caching(&[("mem://a", "||a^\n")], 0);
        let first = dl.download("mem://a").await.unwrap();
        assert!(!first.from_cache);
        let second = dl.download("mem://a").await.unwrap();
        assert!(!second.from_cache);
        assert!(!second.change.unwrap().changed);

        let health = dl.health().get_or_unknown("mem://a").await;
        assert_eq!(health.total_attempts, 2);
    }

    #[tokio::test]
    async fn include_diagnostics_surface_through_cache_layer() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.txt");
        std::fs::write(&base, "||kept^\n!#include gone.txt").unwrap();
        let dl = caching(&[], 60_000);
        let download = dl.download(base.to_str().unwrap()).await.unwrap();
        assert_eq!(download.diagnostics.len(), 1);
    }
}
