//! listforge: compiler-as-a-service for adblock and hosts filter lists.
//!
//! A configuration names one or more remote filter-list sources. The
//! compiler fetches each source (expanding `!#if`/`!#include` preprocessor
//! directives), runs an ordered pipeline of normalizing and validating
//! transformations, merges the per-source output, applies list-wide
//! transformations and inclusion/exclusion filters, and emits a single
//! canonical list with a header and checksum — streaming progress events
//! throughout.
//!
//! The crates compose bottom-up:
//!
//! - [`rules`] — the line model: parsing, serialization, pattern matching
//! - [`expr`] — the `!#if` condition evaluator
//! - [`storage`] — the hierarchical key/value adapter and its backends
//! - [`fetch`] — downloading, preprocessing, caching, change detection,
//!   source health
//! - [`transform`] — the canonical transformation pipeline
//! - [`config`] — the configuration document and its validator
//! - [`compiler`] — the orchestrator: fan-out, merging, events, dedup
//! - [`queue`] — the asynchronous job queue
//! - [`session`] — the streaming session manager
//!
//! ```no_run
//! use std::sync::Arc;
//! use listforge::compiler::{CancelToken, CompileRequest, EventSink, Orchestrator, OrchestratorConfig};
//! use listforge::storage::MemoryStorage;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = listforge::config::read_config("filter.json", None)?;
//! let orchestrator = Orchestrator::new(
//!     Arc::new(MemoryStorage::new()),
//!     OrchestratorConfig::default(),
//! );
//! let result = orchestrator
//!     .compile(CompileRequest::new(config), EventSink::null(), CancelToken::new())
//!     .await?;
//! println!("{} rules", result.rule_count);
//! # Ok(())
//! # }
//! ```

pub use listforge_compiler as compiler;
pub use listforge_config as config;
pub use listforge_expr as expr;
pub use listforge_fetch as fetch;
pub use listforge_queue as queue;
pub use listforge_rules as rules;
pub use listforge_session as session;
pub use listforge_storage as storage;
pub use listforge_transform as transform;

mod executor;
pub mod logging;

pub use executor::OrchestratorExecutor;

/// Crate version, stamped into list headers and the `welcome` frame.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
