//! Compilation orchestration.
//!
//! [`Orchestrator::compile`] runs the whole job: validate the
//! configuration, fingerprint it, dedupe concurrent identical requests,
//! consult the result cache, fan out per-source downloads and
//! transformations under a worker cap, merge in configuration order, run
//! the list-wide pass and filters, and emit the final header + checksum —
//! streaming typed progress events the whole way.

mod cancel;
mod checksum;
mod error;
mod events;
mod filter;
mod fingerprint;
mod orchestrator;
mod result;

pub use cancel::CancelToken;
pub use checksum::{checksum, checksum_line};
pub use error::CompileError;
pub use events::{CompileEvent, EventSink};
pub use filter::RuleFilters;
pub use fingerprint::fingerprint;
pub use orchestrator::{CompileRequest, Orchestrator, OrchestratorConfig};
pub use result::{CompilationResult, CompileMetrics, SourceMetric};
