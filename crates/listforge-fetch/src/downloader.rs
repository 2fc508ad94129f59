//! Source retrieval and preprocessor expansion.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use futures::future::BoxFuture;
use listforge_rules::{DirectiveKind, Rule};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Diagnostic, DiagnosticKind, FetchError};

/// Downloader configuration.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Platform identifier fed to `!#if` conditions. `None` means no
    /// platform identifier evaluates true.
    pub platform: Option<String>,
    /// Treat an HTTP 200 with an empty body as an empty list instead of an
    /// error.
    pub allow_empty_response: bool,
    /// Maximum `!#include` nesting depth.
    pub max_include_depth: usize,
    /// Recursion bound for `!#if` condition parsing.
    pub condition_recursion_limit: usize,
    /// Fail the whole fetch when an included file cannot be retrieved,
    /// instead of downgrading to a diagnostic.
    pub fail_on_include_error: bool,
    /// Retries for transient network failures (connect errors, timeouts,
    /// 5xx responses).
    pub max_retries: u32,
    /// Base delay between retries; doubles per attempt.
    pub retry_delay: Duration,
    /// Pre-fetched content, keyed by source string. Consulted before any
    /// network or filesystem access.
    pub prefetched: HashMap<String, String>,
    /// HTTP request timeout.
    pub request_timeout: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            platform: None,
            allow_empty_response: false,
            max_include_depth: 32,
            condition_recursion_limit: listforge_expr::DEFAULT_RECURSION_LIMIT,
            fail_on_include_error: false,
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            prefetched: HashMap::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// A completed download: preprocessed lines plus everything recoverable
/// that went wrong along the way.
#[derive(Debug, Clone)]
pub struct Download {
    pub lines: Vec<String>,
    pub etag: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Outcome of a conditional (`If-None-Match`) download.
#[derive(Debug)]
pub enum Conditional {
    /// The upstream content still matches the caller's ETag.
    NotModified,
    Fresh(Download),
}

enum RawFetch {
    NotModified,
    Fetched { text: String, etag: Option<String> },
}

/// Fetches filter-list sources and expands preprocessor directives.
pub struct FilterDownloader {
    client: reqwest::Client,
    options: DownloadOptions,
}

impl FilterDownloader {
    /// Build a downloader.
    ///
    /// # Errors
    /// Fails when the HTTP client cannot be constructed (TLS backend
    /// initialization).
    pub fn new(options: DownloadOptions) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|err| FetchError::fetch("<client>", None, err.to_string()))?;
        Ok(Self { client, options })
    }

    /// The options this downloader was built with.
    #[must_use]
    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Download and preprocess a source.
    pub async fn download(&self, source: &str) -> Result<Download, FetchError> {
        match self.download_conditional(source, None).await? {
            Conditional::Fresh(download) => Ok(download),
            Conditional::NotModified => {
                Err(FetchError::fetch(source, Some(304), "unexpected 304 without ETag"))
            }
        }
    }

    /// Download with ETag revalidation. A 304 response yields
    /// [`Conditional::NotModified`] without re-reading the body.
    pub async fn download_conditional(
        &self,
        source: &str,
        etag: Option<&str>,
    ) -> Result<Conditional, FetchError> {
        let mut diagnostics = Vec::new();
        let raw = self.fetch_raw(source, etag, &mut diagnostics).await?;
        let (text, fresh_etag) = match raw {
            RawFetch::NotModified => return Ok(Conditional::NotModified),
            RawFetch::Fetched { text, etag } => (text, etag),
        };

        if text.trim().is_empty() && !self.options.allow_empty_response {
            return Err(FetchError::fetch(source, None, "empty response body"));
        }

        let mut ancestors = vec![source.to_string()];
        let lines = self
            .preprocess(source, split_lines(&text), &mut ancestors, &mut diagnostics, 0)
            .await?;
        debug!(source, lines = lines.len(), "source downloaded");
        Ok(Conditional::Fresh(Download {
            lines,
            etag: fresh_etag,
            diagnostics,
        }))
    }

    /// Fetch and preprocess an included source. Boxed because includes
    /// recurse.
    fn fetch_and_expand<'a>(
        &'a self,
        source: String,
        ancestors: &'a mut Vec<String>,
        diagnostics: &'a mut Vec<Diagnostic>,
        depth: usize,
    ) -> BoxFuture<'a, Result<Vec<String>, FetchError>> {
        Box::pin(async move {
            let raw = self.fetch_raw(&source, None, diagnostics).await?;
            let RawFetch::Fetched { text, .. } = raw else {
                return Ok(Vec::new());
            };
            let lines = split_lines(&text);
            ancestors.push(source.clone());
            let result = self
                .preprocess(&source, lines, ancestors, diagnostics, depth)
                .await;
            ancestors.pop();
            result
        })
    }

    async fn preprocess(
        &self,
        source: &str,
        lines: Vec<String>,
        ancestors: &mut Vec<String>,
        diagnostics: &mut Vec<Diagnostic>,
        depth: usize,
    ) -> Result<Vec<String>, FetchError> {
        struct Frame {
            parent_keeping: bool,
            branch_taken: bool,
            keeping: bool,
            seen_else: bool,
        }

        let mut output = Vec::with_capacity(lines.len());
        let mut stack: Vec<Frame> = Vec::new();

        for (index, line) in lines.into_iter().enumerate() {
            let line_no = index + 1;
            let keeping = stack.last().is_none_or(|frame| frame.keeping);

            let directive = match Rule::parse(&line) {
                Rule::Directive(directive) => directive,
                _ => {
                    if keeping {
                        output.push(line);
                    }
                    continue;
                }
            };

            match directive.kind() {
                DirectiveKind::If(expr) => {
                    let value = listforge_expr::evaluate_with_limit(
                        expr,
                        self.options.platform.as_deref(),
                        self.options.condition_recursion_limit,
                    );
                    stack.push(Frame {
                        parent_keeping: keeping,
                        branch_taken: value,
                        keeping: keeping && value,
                        seen_else: false,
                    });
                }
                DirectiveKind::Else => {
                    let frame = stack.last_mut().ok_or_else(|| {
                        FetchError::directive(source, line_no, "!#else without !#if")
                    })?;
                    if frame.seen_else {
                        return Err(FetchError::directive(
                            source,
                            line_no,
                            "multiple !#else in one block",
                        ));
                    }
                    frame.seen_else = true;
                    frame.keeping = frame.parent_keeping && !frame.branch_taken;
                }
                DirectiveKind::Endif => {
                    if stack.pop().is_none() {
                        return Err(FetchError::directive(
                            source,
                            line_no,
                            "!#endif without !#if",
                        ));
                    }
                }
                DirectiveKind::Include(target) => {
                    if !keeping {
                        continue;
                    }
                    self.expand_include(source, target, ancestors, diagnostics, depth, &mut output)
                        .await?;
                }
            }
        }

        if !stack.is_empty() {
            return Err(FetchError::directive(source, 0, "unterminated !#if block"));
        }
        Ok(output)
    }

    async fn expand_include(
        &self,
        source: &str,
        target: &str,
        ancestors: &mut Vec<String>,
        diagnostics: &mut Vec<Diagnostic>,
        depth: usize,
        output: &mut Vec<String>,
    ) -> Result<(), FetchError> {
        if target.is_empty() {
            diagnostics.push(Diagnostic {
                kind: DiagnosticKind::IncludeMissing,
                source: source.to_string(),
                message: "!#include without a target".to_string(),
            });
            return Ok(());
        }

        let resolved = resolve_include(source, target);

        if ancestors.contains(&resolved) {
            warn!(source, include = resolved.as_str(), "include cycle skipped");
            diagnostics.push(Diagnostic {
                kind: DiagnosticKind::IncludeCycle,
                source: source.to_string(),
                message: format!("include cycle: {resolved} is already being expanded"),
            });
            return Ok(());
        }

        if depth + 1 > self.options.max_include_depth {
            diagnostics.push(Diagnostic {
                kind: DiagnosticKind::IncludeDepthExceeded,
                source: source.to_string(),
                message: format!(
                    "include depth {} exceeds limit {}",
                    depth + 1,
                    self.options.max_include_depth
                ),
            });
            return Ok(());
        }

        match self
            .fetch_and_expand(resolved.clone(), ancestors, diagnostics, depth + 1)
            .await
        {
            Ok(lines) => output.extend(lines),
            Err(err) if !self.options.fail_on_include_error => {
                warn!(source, include = resolved.as_str(), %err, "include skipped");
                diagnostics.push(Diagnostic {
                    kind: DiagnosticKind::IncludeMissing,
                    source: source.to_string(),
                    message: format!("include {resolved} failed: {err}"),
                });
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    async fn fetch_raw(
        &self,
        source: &str,
        etag: Option<&str>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<RawFetch, FetchError> {
        if let Some(content) = self.options.prefetched.get(source) {
            return Ok(RawFetch::Fetched {
                text: content.clone(),
                etag: None,
            });
        }

        if source.starts_with("http://") || source.starts_with("https://") {
            return self.fetch_http(source, etag, diagnostics).await;
        }

        let path = source.strip_prefix("file://").unwrap_or(source);
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(RawFetch::Fetched { text, etag: None }),
            Err(err) => Err(FetchError::fetch(source, None, err.to_string())),
        }
    }

    async fn fetch_http(
        &self,
        source: &str,
        etag: Option<&str>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<RawFetch, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            let mut request = self.client.get(source);
            if let Some(etag) = etag {
                request = request.header(reqwest::header::IF_NONE_MATCH, etag);
            }

            let retryable = |attempt: u32| attempt < self.options.max_retries;
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if etag.is_some() && status == reqwest::StatusCode::NOT_MODIFIED {
                        return Ok(RawFetch::NotModified);
                    }
                    if status.is_success() {
                        let fresh_etag = response
                            .headers()
                            .get(reqwest::header::ETAG)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        let text = response.text().await.map_err(|err| {
                            FetchError::fetch(source, Some(status.as_u16()), err.to_string())
                        })?;
                        return Ok(RawFetch::Fetched {
                            text,
                            etag: fresh_etag,
                        });
                    }
                    if status.is_server_error() && retryable(attempt) {
                        self.note_retry(source, attempt, diagnostics).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::fetch(
                        source,
                        Some(status.as_u16()),
                        format!("unexpected status {status}"),
                    ));
                }
                Err(err) if (err.is_connect() || err.is_timeout()) && retryable(attempt) => {
                    self.note_retry(source, attempt, diagnostics).await;
                    attempt += 1;
                }
                Err(err) => {
                    let status = err.status().map(|s| s.as_u16());
                    return Err(FetchError::fetch(source, status, err.to_string()));
                }
            }
        }
    }

    async fn note_retry(&self, source: &str, attempt: u32, diagnostics: &mut Vec<Diagnostic>) {
        warn!(source, attempt, "transient fetch failure, retrying");
        diagnostics.push(Diagnostic {
            kind: DiagnosticKind::NetworkRetry,
            source: source.to_string(),
            message: format!("retry {} after transient failure", attempt + 1),
        });
        tokio::time::sleep(self.options.retry_delay * 2u32.pow(attempt)).await;
    }
}

/// Split on LF, dropping a trailing CR and outer whitespace per line.
fn split_lines(text: &str) -> Vec<String> {
    text.split('\n')
        .map(|line| line.trim_end_matches('\r').trim().to_string())
        .collect()
}

/// Resolve an include target against its enclosing source.
fn resolve_include(base: &str, target: &str) -> String {
    if Url::parse(target).is_ok() {
        return target.to_string();
    }
    if let Ok(base_url) = Url::parse(base) {
        if let Ok(joined) = base_url.join(target) {
            return joined.to_string();
        }
    }
    let base_path = Path::new(base);
    base_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(target)
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloader_with(prefetched: &[(&str, &str)], platform: Option<&str>) -> FilterDownloader {
        let options = DownloadOptions {
            platform: platform.map(str::to_string),
            prefetched: prefetched
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            ..DownloadOptions::default()
        };
        FilterDownloader::new(options).unwrap()
    }

    #[tokio::test]
    async fn downloads_prefetched_content() {
        let dl = downloader_with(&[("mem://h", "||a.com^\n||b.com^\n")], None);
        let download = dl.download("mem://h").await.unwrap();
        assert_eq!(download.lines, vec!["||a.com^", "||b.com^", ""]);
        assert!(download.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn conditional_blocks_respect_platform() {
        let text = "||a.com^\n!#if windows\n||w.com^\n!#else\n||m.com^\n!#endif\n||z.com^";
        let dl = downloader_with(&[("mem://list", text)], Some("mac"));
        let download = dl.download("mem://list").await.unwrap();
        assert_eq!(download.lines, vec!["||a.com^", "||m.com^", "||z.com^"]);

        let dl = downloader_with(&[("mem://list", text)], Some("windows"));
        let download = dl.download("mem://list").await.unwrap();
        assert_eq!(download.lines, vec!["||a.com^", "||w.com^", "||z.com^"]);

        let dl = downloader_with(&[("mem://list", text)], None);
        let download = dl.download("mem://list").await.unwrap();
        assert_eq!(download.lines, vec!["||a.com^", "||m.com^", "||z.com^"]);
    }

    #[tokio::test]
    async fn nested_conditionals() {
        let text = "!#if mac\nouter\n!#if windows\ninner-win\n!#else\ninner-other\n!#endif\n!#endif\ntail";
        let dl = downloader_with(&[("mem://n", text)], Some("mac"));
        let download = dl.download("mem://n").await.unwrap();
        assert_eq!(download.lines, vec!["outer", "inner-other", "tail"]);
    }

    #[tokio::test]
    async fn disabled_branch_suppresses_includes() {
        // The include target does not exist; inside a false branch it must
        // not even be attempted.
        let text = "!#if windows\n!#include missing.txt\n!#endif\nkept";
        let dl = downloader_with(&[("mem://i", text)], Some("mac"));
        let download = dl.download("mem://i").await.unwrap();
        assert_eq!(download.lines, vec!["kept"]);
        assert!(download.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn unbalanced_directives_fail() {
        for text in ["!#if windows\n||a^", "!#endif", "!#if mac\n!#else\n!#else\n!#endif"] {
            let dl = downloader_with(&[("mem://bad", text)], None);
            let err = dl.download("mem://bad").await.unwrap_err();
            assert!(matches!(err, FetchError::DirectiveSyntax { .. }), "{text}");
        }
    }

    #[tokio::test]
    async fn includes_expand_inline() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.txt");
        let child = dir.path().join("child.txt");
        std::fs::write(&base, "||top^\n!#include child.txt\n||bottom^\n").unwrap();
        std::fs::write(&child, "||included^\n").unwrap();

        let dl = downloader_with(&[], None);
        let download = dl.download(base.to_str().unwrap()).await.unwrap();
        assert_eq!(
            download.lines,
            vec!["||top^", "||included^", "", "||bottom^", ""]
        );
    }

    #[tokio::test]
    async fn include_cycle_is_skipped_with_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "||a-rule^\n!#include b.txt").unwrap();
        std::fs::write(&b, "||b-rule^\n!#include a.txt").unwrap();

        let dl = downloader_with(&[], None);
        let download = dl.download(a.to_str().unwrap()).await.unwrap();
        let rules: Vec<&str> = download
            .lines
            .iter()
            .filter(|l| !l.is_empty())
            .map(String::as_str)
            .collect();
        assert_eq!(rules, vec!["||a-rule^", "||b-rule^"]);
        assert_eq!(download.diagnostics.len(), 1);
        assert_eq!(download.diagnostics[0].kind, DiagnosticKind::IncludeCycle);
    }

    #[tokio::test]
    async fn missing_include_is_a_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.txt");
        std::fs::write(&base, "||kept^\n!#include nowhere.txt").unwrap();

        let dl = downloader_with(&[], None);
        let download = dl.download(base.to_str().unwrap()).await.unwrap();
        assert_eq!(
            download
                .lines
                .iter()
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>(),
            vec!["||kept^"]
        );
        assert_eq!(download.diagnostics[0].kind, DiagnosticKind::IncludeMissing);
    }

    #[tokio::test]
    async fn missing_include_fails_fast_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.txt");
        std::fs::write(&base, "!#include nowhere.txt").unwrap();

        let options = DownloadOptions {
            fail_on_include_error: true,
            ..DownloadOptions::default()
        };
        let dl = FilterDownloader::new(options).unwrap();
        assert!(dl.download(base.to_str().unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn empty_response_handling() {
        let dl = downloader_with(&[("mem://empty", "")], None);
        assert!(dl.download("mem://empty").await.is_err());

        let options = DownloadOptions {
            allow_empty_response: true,
            prefetched: [("mem://empty".to_string(), String::new())].into(),
            ..DownloadOptions::default()
        };
        let dl = FilterDownloader::new(options).unwrap();
        let download = dl.download("mem://empty").await.unwrap();
        assert_eq!(download.lines, vec![""]);
    }

    #[tokio::test]
    async fn missing_root_source_fails() {
        let dl = downloader_with(&[], None);
        let err = dl.download("/does/not/exist.txt").await.unwrap_err();
        assert!(matches!(err, FetchError::SourceFetch { .. }));
    }

    #[test]
    fn include_resolution() {
        assert_eq!(
            resolve_include("https://example.org/lists/base.txt", "extra.txt"),
            "https://example.org/lists/extra.txt"
        );
        assert_eq!(
            resolve_include("https://example.org/lists/base.txt", "https://other.example/x.txt"),
            "https://other.example/x.txt"
        );
        assert_eq!(resolve_include("/data/lists/base.txt", "extra.txt"), "/data/lists/extra.txt");
    }
}
