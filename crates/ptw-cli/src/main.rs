use anyhow::Result;
use clap::{Parser, Subcommand};
use ptw_core::RunMode;
use ptw_sync::ExtractionPipeline;

#[derive(Debug, Parser)]
#[command(name = "ptw-cli")]
#[command(about = "Public Tender Watcher command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, store, and report tenders for every enabled business line.
    Run {
        /// Cover the whole backfill window instead of just today.
        #[arg(long)]
        backfill: bool,
    },
    /// Delete stored records older than the retention threshold.
    Purge {
        /// Age threshold in days; defaults to the configured retention.
        #[arg(long)]
        days: Option<i64>,
    },
    /// Serve the HTTP API, with the cron scheduler when enabled.
    Serve,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,ptw_sync=debug,sqlx=warn".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run { backfill: false }) {
        Commands::Run { backfill } => {
            let mode = if backfill {
                RunMode::Backfill
            } else {
                RunMode::Routine
            };
            let summaries = ptw_sync::run_extraction_once_from_env(mode).await?;
            for summary in &summaries {
                println!(
                    "{}: found={} new={} queries={}",
                    summary.business_line,
                    summary.total_found,
                    summary.newly_stored,
                    summary.queries.join(",")
                );
            }
        }
        Commands::Purge { days } => {
            let pipeline = ExtractionPipeline::from_env().await?;
            let age_days = days.unwrap_or(pipeline.config().retention_days);
            let deleted = pipeline.purge(age_days).await?;
            println!("purged {deleted} records older than {age_days} days");
        }
        Commands::Serve => {
            ptw_web::serve_from_env().await?;
        }
    }

    Ok(())
}
