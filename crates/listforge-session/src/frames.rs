//! The JSON frame vocabulary. Every frame carries a `type` discriminator.

use std::collections::HashMap;

use listforge_compiler::CompilationResult;
use listforge_config::Configuration;
use serde::{Deserialize, Serialize};

/// Frames a client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Start a compilation under a client-chosen session id.
    #[serde(rename = "compile")]
    Compile {
        session_id: String,
        configuration: Configuration,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        platform: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        pre_fetched_content: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        benchmark: bool,
    },
    /// Cancel a running session. Idempotent.
    #[serde(rename = "cancel")]
    Cancel { session_id: String },
    #[serde(rename = "ping")]
    Ping,
}

/// Frames the manager sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "welcome")]
    Welcome {
        version: String,
        connection_id: String,
        capabilities: Vec<String>,
    },
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
    #[serde(rename = "compile:started")]
    CompileStarted { session_id: String },
    /// One frame per orchestrator event.
    #[serde(rename = "event")]
    Event {
        session_id: String,
        event_type: String,
        data: serde_json::Value,
    },
    #[serde(rename = "compile:complete")]
    CompileComplete {
        session_id: String,
        result: Box<CompilationResult>,
    },
    #[serde(rename = "compile:error")]
    CompileError { session_id: String, message: String },
    #[serde(rename = "compile:cancelled")]
    CompileCancelled { session_id: String },
    #[serde(rename = "error")]
    Error { message: String },
}
