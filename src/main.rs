use anyhow::Context;
use clap::{Parser, Subcommand};
use event_ingest::config::Config;
use event_ingest::error::IngestError;
use event_ingest::logging;
use event_ingest::metrics;
use event_ingest::pipeline::RunCoordinator;
use event_ingest::server::{self, AppState};
use event_ingest::sources::{build_adapters, parse_source_list};
use event_ingest::types::IngestResult;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "event_ingest")]
#[command(about = "Event catalog ingestion: scrape sources, dedupe and upsert into SQLite")]
#[command(version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ingestion pass over the configured sources
    Run {
        /// Specific sources to run (comma-separated)
        #[arg(long)]
        sources: Option<String>,
    },
    /// Start the HTTP trigger server
    Serve {
        /// Port to listen on; overrides config and PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show recent ingestion runs
    Runs {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Archive stale events and recompute primary occurrences without scraping
    Sweep,
}

fn print_summary(result: &IngestResult) {
    println!("Run {}", result.run_id);
    for source in &result.sources {
        let status = match &source.fatal_error {
            Some(e) => format!("FAILED ({e})"),
            None => "ok".to_string(),
        };
        println!(
            "  {:<24} total={:<4} created={:<4} updated={:<4} skipped={:<4} {}",
            source.source_name, source.total, source.created, source.updated, source.skipped, status
        );
    }
    println!(
        "Total: {} events, {} created, {} updated, {} skipped; {} archived, {} primaries",
        result.total, result.created, result.updated, result.skipped, result.archived, result.primaries
    );
    if !result.errors.is_empty() {
        println!("Errors ({}):", result.errors.len());
        for e in result.errors.iter().take(20) {
            println!("  - {e}");
        }
        if result.errors.len() > 20 {
            println!("  ... and {} more", result.errors.len() - 20);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    let _log_guard = logging::init_logging(&config.logging.dir);
    metrics::init_metrics();

    let coordinator = RunCoordinator::from_config(&config).context("opening catalog")?;

    match cli.command {
        Commands::Run { sources } => {
            let only = sources.as_deref().map(parse_source_list);
            let adapters = build_adapters(&config.sources, only.as_deref())?;
            if adapters.is_empty() {
                println!("No enabled sources configured");
                return Ok(());
            }
            info!("Running ingestion for {} source(s)", adapters.len());
            match coordinator.run_ingestion(adapters).await {
                Ok(result) => print_summary(&result),
                Err(IngestError::LockContention { run_id, started_at }) => {
                    println!("Another ingestion run ({run_id}) has held the lock since {started_at}");
                    std::process::exit(2);
                }
                Err(e) => {
                    error!("Ingestion failed: {e}");
                    return Err(e.into());
                }
            }
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            if config.server.secret.is_none() {
                println!("Warning: no INGEST_SECRET set; the ingest trigger will reject every request");
            }
            let state = AppState::new(coordinator, &config);
            server::start_server(state, port).await?;
        }
        Commands::Runs { limit } => {
            let runs = coordinator.recent_runs(limit).await?;
            if runs.is_empty() {
                println!("No ingestion runs recorded");
            }
            for run in runs {
                let finished = run
                    .finished_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{} {:<9} started={} finished={} total={} created={} updated={} skipped={} errors={}",
                    run.id,
                    run.status.as_str(),
                    run.started_at.to_rfc3339(),
                    finished,
                    run.total_events,
                    run.created_count,
                    run.updated_count,
                    run.skipped_count,
                    run.error_count
                );
            }
        }
        Commands::Sweep => {
            let result = coordinator.sweep().await?;
            println!("Archived {} events, {} primary occurrences", result.archived, result.primaries);
        }
    }

    Ok(())
}
