//! hubsync - HubSpot CRM sync tool

use anyhow::{Context, Result};
use clap::Parser;
use hubsync_common::logging::{init_logging, LogConfig, LogLevel};
use hubsync_ingest::{
    Connector, ConnectorConfig, DeadLetterSink, IngestionSink, JsonLinesDeadLetterSink, JsonLinesSink,
    MemoryDeadLetterSink, MemorySink, SyncConfig, SyncDriver, SyncTrigger,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hubsync")]
#[command(author, version, about = "HubSpot CRM sync tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Validate configuration and check the access token against HubSpot
    Check,

    /// Run a sync workflow
    Sync {
        /// Workflow to run: full-sync or a single object kind
        #[arg(short, long)]
        workflow: Option<String>,

        /// Append normalized records to this JSON lines file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Append dead letters to this JSON lines file
        #[arg(long)]
        dead_letters: Option<PathBuf>,

        /// Abort the run after this many seconds
        #[arg(long, env = "HUBSYNC_SYNC_TIMEOUT_SECS")]
        timeout_secs: Option<u64>,

        /// Run even if the workflow is already running
        #[arg(long)]
        force: bool,

        /// Store raw records in Postgres instead of a file (requires the `database` feature)
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("hubsync".to_string())
        .build()
        .merge_env()
        .context("Invalid logging configuration")?;

    let _log_guard = init_logging(&log_config)?;

    let config = ConnectorConfig::from_env().context("Invalid connector configuration")?;

    match cli.command {
        Command::Check => {
            let connector = Connector::initialize(config)?;
            connector.connect().await?;
            connector.disconnect();
            info!("Credentials accepted");
            println!("{}", serde_json::json!({ "success": true }));
            Ok(())
        },
        Command::Sync {
            workflow,
            output,
            dead_letters,
            timeout_secs,
            force,
            database_url,
        } => {
            let sync_config = SyncConfig {
                run_timeout: timeout_secs.filter(|s| *s > 0).map(Duration::from_secs),
            };
            let (sink, dead_letter_sink) =
                open_sinks(output.as_deref(), dead_letters.as_deref(), database_url.as_deref()).await?;

            let trigger = SyncTrigger::new(Arc::new(move || -> hubsync_ingest::error::Result<SyncDriver> {
                let connector = Connector::initialize(config.clone())?;
                Ok(SyncDriver::new(connector, sink.clone(), dead_letter_sink.clone()).with_config(sync_config.clone()))
            }));

            let response = trigger.run_sync(workflow.as_deref(), force).await;
            println!("{}", serde_json::to_string_pretty(&response)?);

            if !response.success {
                std::process::exit(1);
            }
            Ok(())
        },
    }
}

type Sinks = (Arc<dyn IngestionSink>, Arc<dyn DeadLetterSink>);

/// Pick the record and dead-letter destinations from the command line
async fn open_sinks(output: Option<&Path>, dead_letters: Option<&Path>, database_url: Option<&str>) -> Result<Sinks> {
    let dead_letter_file: Option<Arc<dyn DeadLetterSink>> = match dead_letters {
        Some(path) => Some(Arc::new(
            JsonLinesDeadLetterSink::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?,
        )),
        None => None,
    };

    if let Some(url) = database_url {
        let (store, store_dead_letters) = open_store(url).await?;
        return Ok((store, dead_letter_file.unwrap_or(store_dead_letters)));
    }

    let sink: Arc<dyn IngestionSink> = match output {
        Some(path) => Arc::new(
            JsonLinesSink::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => Arc::new(MemorySink::new()),
    };
    let dead_letter_sink: Arc<dyn DeadLetterSink> = match dead_letter_file {
        Some(file) => file,
        None => Arc::new(MemoryDeadLetterSink::new()),
    };
    Ok((sink, dead_letter_sink))
}

#[cfg(feature = "database")]
async fn open_store(database_url: &str) -> Result<Sinks> {
    let store = Arc::new(hubsync_ingest::store::PgRawStore::connect(database_url).await?);
    info!("Writing raw records to Postgres");
    let sink: Arc<dyn IngestionSink> = store.clone();
    let dead_letter_sink: Arc<dyn DeadLetterSink> = store;
    Ok((sink, dead_letter_sink))
}

#[cfg(not(feature = "database"))]
async fn open_store(_database_url: &str) -> Result<Sinks> {
    anyhow::bail!("--database-url requires hubsync to be built with the `database` feature")
}
