//! The typed compilation event stream.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::result::CompileMetrics;

/// One progress event. Serializes adjacently tagged, matching the wire
/// format of the SSE/WebSocket surfaces:
/// `{"event": "source:done", "data": {...}}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum CompileEvent {
    #[serde(rename = "compile:started")]
    CompileStarted {
        config_name: String,
        fingerprint: String,
    },
    #[serde(rename = "source:start")]
    SourceStart { name: String, source: String },
    #[serde(rename = "source:progress")]
    SourceProgress { name: String, stage: String },
    #[serde(rename = "source:done")]
    SourceDone {
        name: String,
        rule_count: usize,
        duration_ms: u64,
        from_cache: bool,
    },
    #[serde(rename = "source:error")]
    SourceError { name: String, message: String },
    #[serde(rename = "transformation:start")]
    TransformationStart { transformation: String },
    #[serde(rename = "transformation:done")]
    TransformationDone {
        transformation: String,
        rule_count: usize,
    },
    #[serde(rename = "diagnostic")]
    Diagnostic { source: String, message: String },
    #[serde(rename = "cache:hit")]
    CacheHit { key: String },
    #[serde(rename = "cache:miss")]
    CacheMiss { key: String },
    #[serde(rename = "cache:store")]
    CacheStore { key: String },
    #[serde(rename = "network:retry")]
    NetworkRetry { source: String, message: String },
    #[serde(rename = "metric")]
    Metric { name: String, value: f64 },
    #[serde(rename = "compile:complete")]
    CompileComplete {
        rule_count: usize,
        metrics: CompileMetrics,
    },
    #[serde(rename = "compile:error")]
    CompileError { reason: String, message: String },
    #[serde(rename = "compile:cancelled")]
    CompileCancelled {},
}

impl CompileEvent {
    /// The wire tag for this event.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::CompileStarted { .. } => "compile:started",
            Self::SourceStart { .. } => "source:start",
            Self::SourceProgress { .. } => "source:progress",
            Self::SourceDone { .. } => "source:done",
            Self::SourceError { .. } => "source:error",
            Self::TransformationStart { .. } => "transformation:start",
            Self::TransformationDone { .. } => "transformation:done",
            Self::Diagnostic { .. } => "diagnostic",
            Self::CacheHit { .. } => "cache:hit",
            Self::CacheMiss { .. } => "cache:miss",
            Self::CacheStore { .. } => "cache:store",
            Self::NetworkRetry { .. } => "network:retry",
            Self::Metric { .. } => "metric",
            Self::CompileComplete { .. } => "compile:complete",
            Self::CompileError { .. } => "compile:error",
            Self::CompileCancelled {} => "compile:cancelled",
        }
    }

    /// The `data` payload alone, for transports that frame tag and payload
    /// separately.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.remove("data").unwrap_or(serde_json::Value::Null)
            }
            _ => serde_json::Value::Null,
        }
    }

    /// True for the events that end a stream; nothing follows them.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CompileComplete { .. } | Self::CompileError { .. } | Self::CompileCancelled {}
        )
    }
}

/// Where events go. A null sink drops everything; a channel sink applies
/// backpressure when the consumer's queue fills up, pausing emission (not
/// computation) until it drains.
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<CompileEvent>>,
}

impl EventSink {
    /// A sink that discards all events.
    #[must_use]
    pub fn null() -> Self {
        Self::default()
    }

    /// A bounded channel sink plus its receiving end.
    #[must_use]
    pub fn channel(bound: usize) -> (Self, mpsc::Receiver<CompileEvent>) {
        let (tx, rx) = mpsc::channel(bound.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// Emit one event. A closed receiver is not an error; the compilation
    /// outlives disinterested consumers.
    pub async fn emit(&self, event: CompileEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }
}
