//! CSV → Postgres ingestion entry point.
//!
//! Configuration comes from the environment (plus `.env`); every flag below
//! overrides its matching variable, so the same binary covers both the
//! env-driven and flag-driven invocation styles.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use taxi_ingest::config::{self, IngestConfig};
use taxi_ingest::db::Db;
use taxi_ingest::normalize::ColumnTransforms;
use taxi_ingest::source::CsvBatchSource;
use taxi_ingest::{fetch, loader, logging};

#[derive(Parser, Debug)]
#[command(name = "ingest", version, about = "Load a trip CSV into Postgres in batches")]
struct Cli {
    /// Database host (env: DB_HOST)
    #[arg(long)]
    db_host: Option<String>,
    /// Database port (env: DB_PORT)
    #[arg(long)]
    db_port: Option<String>,
    /// Database user (env: DB_USER)
    #[arg(long)]
    db_user: Option<String>,
    /// Database password (env: DB_PASSWORD)
    #[arg(long)]
    db_password: Option<String>,
    /// Database name (env: DB_NAME)
    #[arg(long)]
    db_name: Option<String>,
    /// Destination table, dropped and recreated at startup (env: TABLE_NAME)
    #[arg(long)]
    table_name: Option<String>,
    /// CSV path or http(s) URL (env: SOURCE)
    #[arg(long)]
    source: Option<String>,
    /// Rows per batch (env: BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<String>,
    /// Connection attempts before giving up (env: MAX_RETRIES)
    #[arg(long)]
    max_retries: Option<String>,
    /// First backoff wait in seconds, doubled per attempt (env: BASE_BACKOFF_SECONDS)
    #[arg(long)]
    base_backoff_seconds: Option<String>,
}

impl Cli {
    fn get(&self, key: &str) -> Option<String> {
        match key {
            "DB_HOST" => self.db_host.clone(),
            "DB_PORT" => self.db_port.clone(),
            "DB_USER" => self.db_user.clone(),
            "DB_PASSWORD" => self.db_password.clone(),
            "DB_NAME" => self.db_name.clone(),
            "TABLE_NAME" => self.table_name.clone(),
            "SOURCE" => self.source.clone(),
            "BATCH_SIZE" => self.batch_size.clone(),
            "MAX_RETRIES" => self.max_retries.clone(),
            "BASE_BACKOFF_SECONDS" => self.base_backoff_seconds.clone(),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() {
    config::init_env();
    if let Err(e) = logging::init_tracing("info") {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
    if let Err(e) = run().await {
        error!(error = %format!("{e:#}"), "ingestion failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = IngestConfig::from_lookup(|key| cli.get(key).or_else(|| config::env_opt(key)))?;
    cfg.log_snapshot();

    let path = fetch::ensure_local(&cfg.source).await?;

    let db = Db::connect_with_retry(&cfg.dsn()?, &cfg.retry_policy()).await?;

    let mut source = CsvBatchSource::open(&path, cfg.batch_size)?;
    let report = loader::load(&mut source, &db, &cfg.table_name, &ColumnTransforms::trip_datetimes()).await?;
    info!(
        table = %cfg.table_name,
        batches = report.batches,
        rows = report.rows,
        "ingestion completed successfully"
    );
    Ok(())
}
