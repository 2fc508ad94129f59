//! The compilation orchestrator: validation, fingerprinting, the dedup
//! fence, the result cache, per-source fan-out and final assembly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use futures::stream::{self, StreamExt};
use listforge_config::{Configuration, SourceConfig};
use listforge_fetch::{
    CachingDownloader, DiagnosticKind, DownloadOptions, FilterDownloader, SourceHealth,
    SourceHealthMonitor,
};
use listforge_rules::Rule;
use listforge_storage::{CompilationHistory, CompilationMetadata, StorageAdapter, now_ms};
use listforge_transform::Pipeline;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::checksum::checksum_line;
use crate::error::CompileError;
use crate::events::{CompileEvent, EventSink};
use crate::filter::RuleFilters;
use crate::fingerprint::fingerprint;
use crate::result::{CompilationResult, CompileMetrics, SourceMetric};

/// Orchestrator tuning. Every knob has a production default.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub compiler_name: String,
    pub compiler_version: String,
    /// Concurrent per-source workers.
    pub worker_cap: usize,
    /// Freshness of cached upstream lists.
    pub source_cache_ttl_ms: u64,
    /// Freshness of cached compilation results.
    pub result_cache_ttl_ms: u64,
    /// `!#include` nesting bound.
    pub include_max_depth: usize,
    /// Recursion bound for `!#if` condition expressions.
    pub not_recursion_max_depth: usize,
    /// Whole-compilation deadline; `None` disables it.
    pub compile_timeout: Option<Duration>,
    /// Upper bound on one batch request.
    pub batch_size_max: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            compiler_name: "listforge".to_string(),
            compiler_version: env!("CARGO_PKG_VERSION").to_string(),
            worker_cap: 8,
            source_cache_ttl_ms: 3_600_000,
            result_cache_ttl_ms: 3_600_000,
            include_max_depth: 32,
            not_recursion_max_depth: 64,
            compile_timeout: None,
            batch_size_max: 10,
        }
    }
}

/// One compile request.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub configuration: Configuration,
    /// Platform identifier for `!#if` conditions.
    pub platform: Option<String>,
    /// Content served instead of fetching, keyed by source string.
    pub pre_fetched_content: HashMap<String, String>,
    /// Emit per-stage `metric` events.
    pub benchmark: bool,
}

impl CompileRequest {
    #[must_use]
    pub fn new(configuration: Configuration) -> Self {
        Self {
            configuration,
            platform: None,
            pre_fetched_content: HashMap::new(),
            benchmark: false,
        }
    }
}

type SharedCompile = Shared<BoxFuture<'static, Result<CompilationResult, Arc<CompileError>>>>;

/// The orchestrator. Cheap to clone; all state lives behind one `Arc`.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    storage: Arc<dyn StorageAdapter>,
    config: OrchestratorConfig,
    /// The dedup fence: at most one in-flight build per fingerprint. The
    /// lock is never held across an await.
    inflight: Mutex<HashMap<String, SharedCompile>>,
}

struct SourceOutput {
    config: SourceConfig,
    lines: Vec<String>,
    from_cache: bool,
    failed: bool,
    duration_ms: u64,
    rule_count: usize,
}

impl Orchestrator {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageAdapter>, config: OrchestratorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                config,
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The configuration this orchestrator runs with.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// The storage adapter behind this orchestrator.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.inner.storage
    }

    /// Compile a configuration.
    ///
    /// Emits progress events to `events` and observes `cancel` between
    /// sources and between pipeline stages. Concurrent calls with the same
    /// fingerprint share one underlying build; every caller but the first
    /// gets `deduplicated = true` on its result.
    pub async fn compile(
        &self,
        request: CompileRequest,
        events: EventSink,
        cancel: CancelToken,
    ) -> Result<CompilationResult, CompileError> {
        request.configuration.validate()?;
        let fp = fingerprint(&request.configuration, &self.inner.config.compiler_version)?;
        events
            .emit(CompileEvent::CompileStarted {
                config_name: request.configuration.name.clone(),
                fingerprint: fp.clone(),
            })
            .await;

        let (future, leader) = {
            let mut inflight = self
                .inner
                .inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = inflight.get(&fp) {
                debug!(fingerprint = fp.as_str(), "attaching to in-flight compile");
                (existing.clone(), false)
            } else {
                let this = self.clone();
                let leader_fp = fp.clone();
                let leader_events = events.clone();
                let leader_cancel = cancel.clone();
                let future: SharedCompile = async move {
                    this.compile_leader(request, leader_fp, leader_events, leader_cancel)
                        .await
                        .map_err(Arc::new)
                }
                .boxed()
                .shared();
                inflight.insert(fp.clone(), future.clone());
                (future, true)
            }
        };

        let outcome = future.await;

        if leader {
            self.inner
                .inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&fp);
        }

        match outcome {
            Ok(mut result) => {
                result.deduplicated = !leader;
                Ok(result)
            }
            Err(shared) => Err(match Arc::try_unwrap(shared) {
                Ok(err) => err,
                Err(arc) => CompileError::Shared(arc),
            }),
        }
    }

    /// Compile several configurations, bounded by `batch_size_max`.
    pub async fn compile_batch(
        &self,
        requests: Vec<CompileRequest>,
        cancel: CancelToken,
    ) -> Result<Vec<CompilationResult>, CompileError> {
        let limit = self.inner.config.batch_size_max;
        if requests.len() > limit {
            return Err(CompileError::OverCapacity {
                requested: requests.len(),
                limit,
            });
        }
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            if cancel.is_cancelled() {
                return Err(CompileError::Cancelled);
            }
            results.push(
                self.compile(request, EventSink::null(), cancel.clone())
                    .await?,
            );
        }
        Ok(results)
    }

    /// Download and cache every source of a configuration. Returns how
    /// many sources were warmed; individual failures are logged.
    pub async fn warm_cache(
        &self,
        configuration: &Configuration,
        platform: Option<String>,
    ) -> Result<usize, CompileError> {
        configuration.validate()?;
        let caching = self.caching_downloader(platform, HashMap::new())?;
        let mut warmed = 0;
        for source in &configuration.sources {
            match caching.download(&source.source).await {
                Ok(_) => warmed += 1,
                Err(err) => warn!(source = source.source.as_str(), %err, "cache warm failed"),
            }
        }
        Ok(warmed)
    }

    /// Current health for every source of a configuration.
    pub async fn source_health(&self, configuration: &Configuration) -> Vec<SourceHealth> {
        let monitor = SourceHealthMonitor::new(self.inner.storage.clone());
        let mut all = Vec::with_capacity(configuration.sources.len());
        for source in &configuration.sources {
            all.push(monitor.get_or_unknown(&source.source).await);
        }
        all
    }

    async fn compile_leader(
        self,
        request: CompileRequest,
        fp: String,
        events: EventSink,
        cancel: CancelToken,
    ) -> Result<CompilationResult, CompileError> {
        let cache_key = result_cache_key(&fp);
        match self.inner.storage.get(&cache_key).await {
            Ok(Some(entry)) => {
                if let Ok(mut cached) = serde_json::from_value::<CompilationResult>(entry.data) {
                    info!(fingerprint = fp.as_str(), "result cache hit");
                    events
                        .emit(CompileEvent::CacheHit { key: fp.clone() })
                        .await;
                    cached.cached = true;
                    events
                        .emit(CompileEvent::CompileComplete {
                            rule_count: cached.rule_count,
                            metrics: cached.metrics.clone().unwrap_or_default(),
                        })
                        .await;
                    return Ok(cached);
                }
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "result cache read failed, treating as miss"),
        }
        events
            .emit(CompileEvent::CacheMiss { key: fp.clone() })
            .await;

        let outcome = match self.inner.config.compile_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.build(&request, &events, &cancel)).await {
                    Ok(result) => result,
                    Err(_) => Err(CompileError::Timeout(limit)),
                }
            }
            None => self.build(&request, &events, &cancel).await,
        };

        match outcome {
            Ok(result) => {
                match serde_json::to_value(&result) {
                    Ok(value) => {
                        match self
                            .inner
                            .storage
                            .set(&cache_key, value, Some(self.inner.config.result_cache_ttl_ms))
                            .await
                        {
                            Ok(()) => {
                                events
                                    .emit(CompileEvent::CacheStore { key: fp.clone() })
                                    .await;
                            }
                            Err(err) => warn!(%err, "result cache write failed"),
                        }
                    }
                    Err(err) => warn!(%err, "result serialization failed"),
                }

                let history = CompilationHistory::new(self.inner.storage.clone());
                let metrics = result.metrics.as_ref();
                let meta = CompilationMetadata {
                    config_name: request.configuration.name.clone(),
                    timestamp_ms: now_ms(),
                    source_count: metrics.map_or(0, |m| m.source_count),
                    rule_count: result.rule_count,
                    duration_ms: metrics.map_or(0, |m| m.duration_ms),
                    output_path: None,
                };
                if let Err(err) = history.record(&meta).await {
                    warn!(%err, "compilation history write failed");
                }

                // Terminal event last; nothing may follow it on the stream.
                events
                    .emit(CompileEvent::CompileComplete {
                        rule_count: result.rule_count,
                        metrics: result.metrics.clone().unwrap_or_default(),
                    })
                    .await;
                Ok(result)
            }
            Err(err) if err.is_cancelled() => {
                info!(fingerprint = fp.as_str(), "compilation cancelled");
                events.emit(CompileEvent::CompileCancelled {}).await;
                Err(err)
            }
            Err(err) => {
                events
                    .emit(CompileEvent::CompileError {
                        reason: err.reason().to_string(),
                        message: err.to_string(),
                    })
                    .await;
                Err(err)
            }
        }
    }

    fn caching_downloader(
        &self,
        platform: Option<String>,
        prefetched: HashMap<String, String>,
    ) -> Result<Arc<CachingDownloader>, CompileError> {
        let options = DownloadOptions {
            platform,
            prefetched,
            max_include_depth: self.inner.config.include_max_depth,
            condition_recursion_limit: self.inner.config.not_recursion_max_depth,
            ..DownloadOptions::default()
        };
        Ok(Arc::new(CachingDownloader::new(
            self.inner.storage.clone(),
            FilterDownloader::new(options)?,
            self.inner.config.source_cache_ttl_ms,
        )))
    }

    async fn build(
        &self,
        request: &CompileRequest,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<CompilationResult, CompileError> {
        let started = Instant::now();
        let config = &request.configuration;

        let download_options = DownloadOptions {
            platform: request.platform.clone(),
            prefetched: request.pre_fetched_content.clone(),
            max_include_depth: self.inner.config.include_max_depth,
            condition_recursion_limit: self.inner.config.not_recursion_max_depth,
            ..DownloadOptions::default()
        };
        let caching = self.caching_downloader(
            request.platform.clone(),
            request.pre_fetched_content.clone(),
        )?;
        let pattern_downloader = Arc::new(FilterDownloader::new(download_options)?);

        let global_filters = RuleFilters::load(
            &pattern_downloader,
            &config.exclusions,
            &config.exclusions_sources,
            &config.inclusions,
            &config.inclusions_sources,
        )
        .await;

        let history = CompilationHistory::new(self.inner.storage.clone());
        let previous_version = history
            .recent(&config.name, 1)
            .await
            .ok()
            .and_then(|entries| entries.into_iter().next())
            .and_then(|meta| {
                chrono::DateTime::from_timestamp_millis(meta.timestamp_ms)
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            });

        // Fan out, bounded by the worker cap. `buffered` yields results in
        // configuration order regardless of completion order.
        let outputs: Vec<Result<SourceOutput, CompileError>> =
            stream::iter(config.sources.clone().into_iter().map(|source_cfg| {
                let this = self.clone();
                let caching = caching.clone();
                let pattern_downloader = pattern_downloader.clone();
                let events = events.clone();
                let cancel = cancel.clone();
                async move {
                    this.compile_source(source_cfg, caching, pattern_downloader, events, cancel)
                        .await
                }
            }))
            .buffered(self.inner.config.worker_cap.max(1))
            .collect()
            .await;

        if cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }

        let mut source_outputs = Vec::with_capacity(outputs.len());
        for output in outputs {
            source_outputs.push(output?);
        }

        // Merge strictly in configuration order, each source under a
        // synthesized banner.
        let mut body = Vec::new();
        for output in &source_outputs {
            body.push("!".to_string());
            if let Some(name) = &output.config.name {
                body.push(format!("! Source name: {name}"));
            }
            body.push(format!("! Source: {}", output.config.source));
            body.push("!".to_string());
            body.extend(output.lines.iter().cloned());
        }

        let pipeline = Pipeline::new(&config.transformation_ids()?);
        for pass in pipeline.passes() {
            if cancel.is_cancelled() {
                return Err(CompileError::Cancelled);
            }
            events
                .emit(CompileEvent::TransformationStart {
                    transformation: pass.to_string(),
                })
                .await;
            let pass_started = Instant::now();
            body = pipeline.run_pass(*pass, body);
            events
                .emit(CompileEvent::TransformationDone {
                    transformation: pass.to_string(),
                    rule_count: body.len(),
                })
                .await;
            if request.benchmark {
                events
                    .emit(CompileEvent::Metric {
                        name: format!("transformation.{pass}.duration_ms"),
                        value: pass_started.elapsed().as_millis() as f64,
                    })
                    .await;
            }
        }

        if cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }
        let body = global_filters.apply(body);

        let header = build_header(config, &self.inner.config);
        let checksum = checksum_line(&header, &body);
        let mut rules = Vec::with_capacity(body.len() + header.len() + 2);
        rules.push("!".to_string());
        rules.push(checksum);
        rules.extend(header);
        rules.extend(body);

        let rule_count = rules
            .iter()
            .filter(|line| Rule::parse(line).is_rule())
            .count();
        let duration_ms = started.elapsed().as_millis() as u64;
        let metrics = CompileMetrics {
            duration_ms,
            source_count: source_outputs.len(),
            cache_hits: source_outputs.iter().filter(|o| o.from_cache).count(),
            cache_misses: source_outputs
                .iter()
                .filter(|o| !o.from_cache && !o.failed)
                .count(),
            sources: source_outputs
                .iter()
                .map(|o| SourceMetric {
                    name: o.config.display_name().to_string(),
                    source: o.config.source.clone(),
                    rule_count: o.rule_count,
                    duration_ms: o.duration_ms,
                    from_cache: o.from_cache,
                })
                .collect(),
        };
        if request.benchmark {
            events
                .emit(CompileEvent::Metric {
                    name: "compile.duration_ms".to_string(),
                    value: duration_ms as f64,
                })
                .await;
        }

        info!(
            config = config.name.as_str(),
            rule_count, duration_ms, "compilation finished"
        );
        Ok(CompilationResult {
            success: true,
            rules,
            rule_count,
            metrics: Some(metrics),
            compiled_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            previous_version,
            cached: false,
            deduplicated: false,
            error: None,
        })
    }

    async fn compile_source(
        self,
        source_cfg: SourceConfig,
        caching: Arc<CachingDownloader>,
        pattern_downloader: Arc<FilterDownloader>,
        events: EventSink,
        cancel: CancelToken,
    ) -> Result<SourceOutput, CompileError> {
        if cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }
        let name = source_cfg.display_name().to_string();
        events
            .emit(CompileEvent::SourceStart {
                name: name.clone(),
                source: source_cfg.source.clone(),
            })
            .await;
        let started = Instant::now();

        let downloaded = match caching.download(&source_cfg.source).await {
            Ok(download) => download,
            Err(err) => {
                events
                    .emit(CompileEvent::SourceError {
                        name: name.clone(),
                        message: err.to_string(),
                    })
                    .await;
                if source_cfg.optional {
                    warn!(source = source_cfg.source.as_str(), %err, "optional source skipped");
                    return Ok(SourceOutput {
                        config: source_cfg,
                        lines: Vec::new(),
                        from_cache: false,
                        failed: true,
                        duration_ms: started.elapsed().as_millis() as u64,
                        rule_count: 0,
                    });
                }
                return Err(err.into());
            }
        };

        if downloaded.from_cache {
            events
                .emit(CompileEvent::CacheHit {
                    key: source_cfg.source.clone(),
                })
                .await;
        } else {
            events
                .emit(CompileEvent::CacheMiss {
                    key: source_cfg.source.clone(),
                })
                .await;
            events
                .emit(CompileEvent::CacheStore {
                    key: source_cfg.source.clone(),
                })
                .await;
        }
        for diagnostic in &downloaded.diagnostics {
            let event = match diagnostic.kind {
                DiagnosticKind::NetworkRetry => CompileEvent::NetworkRetry {
                    source: diagnostic.source.clone(),
                    message: diagnostic.message.clone(),
                },
                _ => CompileEvent::Diagnostic {
                    source: diagnostic.source.clone(),
                    message: diagnostic.message.clone(),
                },
            };
            events.emit(event).await;
        }

        let pipeline = Pipeline::new(&source_cfg.transformation_ids()?);
        let mut lines = downloaded.lines;
        for pass in pipeline.passes() {
            if cancel.is_cancelled() {
                return Err(CompileError::Cancelled);
            }
            events
                .emit(CompileEvent::SourceProgress {
                    name: name.clone(),
                    stage: pass.to_string(),
                })
                .await;
            lines = pipeline.run_pass(*pass, lines);
        }

        let filters = RuleFilters::load(
            &pattern_downloader,
            &source_cfg.exclusions,
            &source_cfg.exclusions_sources,
            &source_cfg.inclusions,
            &source_cfg.inclusions_sources,
        )
        .await;
        let lines = filters.apply(lines);

        let duration_ms = started.elapsed().as_millis() as u64;
        let rule_count = lines
            .iter()
            .filter(|line| Rule::parse(line).is_rule())
            .count();
        events
            .emit(CompileEvent::SourceDone {
                name,
                rule_count,
                duration_ms,
                from_cache: downloaded.from_cache,
            })
            .await;

        Ok(SourceOutput {
            config: source_cfg,
            lines,
            from_cache: downloaded.from_cache,
            failed: false,
            duration_ms,
            rule_count,
        })
    }
}

fn result_cache_key(fingerprint: &str) -> Vec<String> {
    vec![
        "cache".to_string(),
        "results".to_string(),
        fingerprint.to_string(),
    ]
}

fn build_header(config: &Configuration, orchestrator: &OrchestratorConfig) -> Vec<String> {
    let mut header = vec![format!("! Title: {}", config.name)];
    if let Some(description) = &config.description {
        header.push(format!("! Description: {description}"));
    }
    if let Some(version) = &config.version {
        header.push(format!("! Version: {version}"));
    }
    if let Some(homepage) = &config.homepage {
        header.push(format!("! Homepage: {homepage}"));
    }
    if let Some(license) = &config.license {
        header.push(format!("! License: {license}"));
    }
    header.push(format!(
        "! Last modified: {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    header.push("!".to_string());
    header.push(format!(
        "! Compiled by {} v{}",
        orchestrator.compiler_name, orchestrator.compiler_version
    ));
    header.push("!".to_string());
    header
}
