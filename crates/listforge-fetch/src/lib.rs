//! Filter-list retrieval.
//!
//! [`FilterDownloader`] fetches a source (HTTP(S), filesystem path, or a
//! pre-fetched content map), expands preprocessor directives, and guards
//! against include cycles. [`CachingDownloader`] layers the upstream cache,
//! change detection and source health recording on top.

mod cached;
mod downloader;
mod error;
mod health;
mod snapshot;

pub use cached::{CachedDownload, CachingDownloader, DEFAULT_CACHE_TTL_MS};
pub use downloader::{Conditional, Download, DownloadOptions, FilterDownloader};
pub use error::{Diagnostic, DiagnosticKind, FetchError};
pub use health::{AttemptRecord, HealthStatus, SourceHealth, SourceHealthMonitor};
pub use snapshot::{ChangeDetector, ChangeReport, SourceSnapshot, content_hash};
