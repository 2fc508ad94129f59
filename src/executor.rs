//! Bridges queued jobs onto the orchestrator.

use std::collections::HashMap;

use async_trait::async_trait;
use listforge_compiler::{CancelToken, CompileRequest, EventSink, Orchestrator};
use listforge_config::Configuration;
use listforge_queue::{JobExecutor, JobKind};
use serde::Deserialize;
use serde_json::Value;

/// Executes `compile`, `batch`, `cache-warm` and `health-check` jobs
/// against an [`Orchestrator`].
pub struct OrchestratorExecutor {
    orchestrator: Orchestrator,
}

#[derive(Deserialize)]
struct CompilePayload {
    configuration: Configuration,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    pre_fetched_content: HashMap<String, String>,
    #[serde(default)]
    benchmark: bool,
}

impl From<CompilePayload> for CompileRequest {
    fn from(payload: CompilePayload) -> Self {
        Self {
            configuration: payload.configuration,
            platform: payload.platform,
            pre_fetched_content: payload.pre_fetched_content,
            benchmark: payload.benchmark,
        }
    }
}

#[derive(Deserialize)]
struct BatchPayload {
    requests: Vec<CompilePayload>,
}

#[derive(Deserialize)]
struct ConfigurationPayload {
    configuration: Configuration,
    #[serde(default)]
    platform: Option<String>,
}

impl OrchestratorExecutor {
    #[must_use]
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobExecutor for OrchestratorExecutor {
    async fn execute(&self, kind: JobKind, payload: Value) -> Result<Value, String> {
        match kind {
            JobKind::Compile => {
                let payload: CompilePayload =
                    serde_json::from_value(payload).map_err(|e| e.to_string())?;
                let result = self
                    .orchestrator
                    .compile(payload.into(), EventSink::null(), CancelToken::new())
                    .await
                    .map_err(|e| e.to_string())?;
                serde_json::to_value(result).map_err(|e| e.to_string())
            }
            JobKind::Batch => {
                let payload: BatchPayload =
                    serde_json::from_value(payload).map_err(|e| e.to_string())?;
                let requests = payload.requests.into_iter().map(Into::into).collect();
                let results = self
                    .orchestrator
                    .compile_batch(requests, CancelToken::new())
                    .await
                    .map_err(|e| e.to_string())?;
                serde_json::to_value(results).map_err(|e| e.to_string())
            }
            JobKind::CacheWarm => {
                let payload: ConfigurationPayload =
                    serde_json::from_value(payload).map_err(|e| e.to_string())?;
                let warmed = self
                    .orchestrator
                    .warm_cache(&payload.configuration, payload.platform)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(serde_json::json!({ "warmed": warmed }))
            }
            JobKind::HealthCheck => {
                let payload: ConfigurationPayload =
                    serde_json::from_value(payload).map_err(|e| e.to_string())?;
                let health = self.orchestrator.source_health(&payload.configuration).await;
                serde_json::to_value(health).map_err(|e| e.to_string())
            }
        }
    }
}
