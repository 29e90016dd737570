#![allow(missing_docs)]

//! Courier CLI.
//!
//! `start` runs the engine as a long-lived service (resume scan +
//! dispatch workers); the other subcommands are one-shot operator tools
//! against the same database.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use courier::config::CourierConfig;
use courier::engine::Engine;
use courier::estimate::Row;
use courier::store::JobStatus;
use courier::{db, logging, resume};

/// Poll interval while `submit` waits for its job to finish.
const SUBMIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "courier", version, about = "Bulk message dispatch engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatch service: resume unfinished jobs, then serve
    /// until interrupted.
    Start,
    /// Price a batch without reserving funds or sending anything.
    Estimate {
        /// JSON file: array of objects mapping column names to values.
        #[arg(long)]
        rows: PathBuf,
        /// Message template with `{{column}}` placeholders.
        #[arg(long, default_value = "")]
        template: String,
    },
    /// Accept a batch for dispatch and wait for the job to complete.
    Submit {
        /// JSON file: array of objects mapping column names to values.
        #[arg(long)]
        rows: PathBuf,
        /// Message template with `{{column}}` placeholders.
        #[arg(long, default_value = "")]
        template: String,
    },
    /// Print the ledger balance in mills.
    Balance,
    /// Credit (or, with a negative amount, debit) the ledger.
    TopUp {
        /// Signed amount in mills; must be non-zero.
        #[arg(long, allow_hyphen_values = true)]
        amount: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Start => start().await,
        Command::Estimate { rows, template } => estimate(rows, &template).await,
        Command::Submit { rows, template } => submit(rows, &template).await,
        Command::Balance => balance().await,
        Command::TopUp { amount } => top_up(amount).await,
    }
}

/// Open the engine against the configured database.
async fn open_engine(config: &Arc<CourierConfig>) -> Result<Engine> {
    let paths = config.paths.resolve()?;
    let pool = db::open(&paths.db_path)
        .await
        .with_context(|| format!("failed to open database at {}", paths.db_path.display()))?;
    Engine::open(Arc::clone(config), pool)
        .await
        .context("failed to assemble engine")
}

async fn start() -> Result<()> {
    let config = Arc::new(CourierConfig::load()?);
    let paths = config.paths.resolve()?;
    let _logging = logging::init_service(&paths.logs_dir, &config.log_level.0)?;

    info!(version = env!("CARGO_PKG_VERSION"), "courier starting");
    let engine = open_engine(&config).await?;

    let report = resume::resume_unfinished(&engine).await?;
    info!(
        requeued = report.requeued_sending,
        relaunched = report.jobs_relaunched,
        "startup resume scan done"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, exiting");
    Ok(())
}

/// Read a rows file: a JSON array of objects, column name → value.
fn read_rows(path: &PathBuf) -> Result<Vec<Row>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rows file {}", path.display()))?;
    let rows: Vec<BTreeMap<String, String>> =
        serde_json::from_str(&contents).context("rows file must be a JSON array of objects")?;
    Ok(rows)
}

async fn estimate(rows_path: PathBuf, template: &str) -> Result<()> {
    logging::init_cli();
    let config = Arc::new(CourierConfig::load()?);
    let engine = open_engine(&config).await?;

    let rows = read_rows(&rows_path)?;
    let estimate = engine.estimate(&rows, template);

    println!(
        "accepted: {} rows, {} segments, {} mills at {} mills/segment",
        estimate.accepted.len(),
        estimate.total_segments,
        estimate.total_mills,
        estimate.price_per_segment_mills
    );
    if estimate.deduped > 0 {
        println!("deduplicated: {} rows", estimate.deduped);
    }
    for rejected in &estimate.rejected {
        println!("rejected: {:?} ({})", rejected.row, rejected.reason);
    }
    Ok(())
}

async fn submit(rows_path: PathBuf, template: &str) -> Result<()> {
    logging::init_cli();
    let config = Arc::new(CourierConfig::load()?);
    let engine = open_engine(&config).await?;

    let rows = read_rows(&rows_path)?;
    let accepted = engine.submit(&rows, template).await?;
    println!(
        "job {} accepted: {} recipients, {} mills reserved",
        accepted.job_id,
        accepted.estimate.accepted.len(),
        accepted.estimate.total_mills
    );
    for rejected in &accepted.estimate.rejected {
        println!("rejected: {:?} ({})", rejected.row, rejected.reason);
    }

    loop {
        tokio::time::sleep(SUBMIT_POLL_INTERVAL).await;
        let (job, recipients) = engine.store().job_snapshot(&accepted.job_id).await?;
        if job.status != JobStatus::Completed {
            continue;
        }
        if let Some(completion) = job.completion {
            println!(
                "job {} completed: {} segments sent, {} failed, {} mills spent, {} mills refunded",
                accepted.job_id,
                completion.sent_segments,
                completion.failed_segments,
                completion.actual_mills,
                completion.refund_mills
            );
        }
        for recipient in recipients {
            if let Some(error) = recipient.last_error {
                println!("  {}: {}", recipient.address, error);
            }
        }
        return Ok(());
    }
}

async fn balance() -> Result<()> {
    logging::init_cli();
    let config = Arc::new(CourierConfig::load()?);
    let engine = open_engine(&config).await?;
    println!("{} mills", engine.ledger().read().await?);
    Ok(())
}

async fn top_up(amount: i64) -> Result<()> {
    logging::init_cli();
    let config = Arc::new(CourierConfig::load()?);
    let engine = open_engine(&config).await?;
    let next = engine.ledger().top_up(amount).await?;
    println!("balance: {next} mills");
    Ok(())
}
