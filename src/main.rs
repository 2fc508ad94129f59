//! The listforge CLI: compile a configuration into a filter list file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use listforge::compiler::{
    CancelToken, CompileRequest, EventSink, Orchestrator, OrchestratorConfig,
};
use listforge::config::read_config;
use listforge::storage::{JsonFileStorage, MemoryStorage, StorageAdapter};

#[derive(Parser)]
#[command(name = "listforge", version, about = "Adblock filter-list compiler")]
struct Cli {
    /// Verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a configuration into a filter list.
    Compile {
        /// Configuration file (JSON, YAML or TOML).
        #[arg(short, long)]
        config: PathBuf,

        /// Output file for the compiled list.
        #[arg(short, long)]
        output: PathBuf,

        /// Platform identifier for !#if conditions.
        #[arg(short, long)]
        platform: Option<String>,

        /// Directory for the download/result cache. In-memory when unset.
        #[arg(long)]
        cache_dir: Option<Utf8PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(err) = listforge::logging::init_tracing(cli.verbose) {
        eprintln!("warning: logging setup failed: {err}");
    }

    match cli.command {
        Command::Compile {
            config,
            output,
            platform,
            cache_dir,
        } => {
            let configuration = read_config(&config, None)
                .with_context(|| format!("reading {}", config.display()))?;

            let storage: Arc<dyn StorageAdapter> = match cache_dir {
                Some(dir) => Arc::new(
                    JsonFileStorage::new(dir.clone())
                        .with_context(|| format!("opening cache at {dir}"))?,
                ),
                None => Arc::new(MemoryStorage::new()),
            };

            let orchestrator = Orchestrator::new(storage, OrchestratorConfig::default());
            let mut request = CompileRequest::new(configuration);
            request.platform = platform;

            let result = orchestrator
                .compile(request, EventSink::null(), CancelToken::new())
                .await
                .context("compilation failed")?;

            let mut text = result.rules.join("\n");
            if !text.ends_with('\n') {
                text.push('\n');
            }
            std::fs::write(&output, text)
                .with_context(|| format!("writing {}", output.display()))?;

            println!(
                "compiled {} rules to {} in {} ms",
                result.rule_count,
                output.display(),
                result.metrics.map_or(0, |m| m.duration_ms)
            );
        }
    }
    Ok(())
}
