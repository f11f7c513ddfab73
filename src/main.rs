use chrono::NaiveDate;
use clap::Parser;
use log::{error, info};
use reqwest::Client as HttpClient;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tdxhist::{DayFetcher, Ledger, Session, Sweep};

#[derive(Debug, Parser)]
#[command(name = "tdxhist", about = "Fetch historical TDX bus location data day by day")]
struct Cli {
    /// TDX application id; falls back to TDX_APP_ID env var
    #[arg(long, env = "TDX_APP_ID")]
    app_id: String,

    /// TDX application key; falls back to TDX_APP_KEY env var
    #[arg(long, env = "TDX_APP_KEY")]
    app_key: String,

    /// First date to fetch (inclusive), YYYY-MM-DD
    #[arg(long, value_parser = parse_date, default_value = "2021-06-01")]
    start: NaiveDate,

    /// Last date to fetch (exclusive), YYYY-MM-DD; defaults to today, so the
    /// sweep ends with yesterday's data
    #[arg(long, value_parser = parse_date)]
    end: Option<NaiveDate>,

    /// Directory for the per-date CSV files and the ledger
    #[arg(long, default_value = "hist_loc_data")]
    output_dir: PathBuf,

    /// Maximum simultaneous downloads
    #[arg(long, default_value_t = 8)]
    max_concurrency: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(failed) if failed == 0 => ExitCode::SUCCESS,
        Ok(failed) => {
            error!("{failed} date(s) failed; rerun to retry them");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<usize, Box<dyn std::error::Error>> {
    // End is exclusive, so defaulting to today makes yesterday the newest
    // fetched day; the historical API cannot serve today's data in full.
    let end = cli
        .end
        .unwrap_or_else(|| chrono::Utc::now().date_naive());

    tokio::fs::create_dir_all(&cli.output_dir).await?;

    let http = HttpClient::builder()
        .timeout(Duration::from_secs(cli.timeout_secs))
        .build()?;

    let session = Arc::new(Session::new(http.clone(), cli.app_id, cli.app_key));
    session.authenticate_with_retries().await?;

    let fetcher = DayFetcher::new(http, &cli.output_dir);
    let ledger = Arc::new(Ledger::new(&cli.output_dir));

    info!(
        "Sweeping {} to {} (exclusive) into {}",
        cli.start,
        end,
        cli.output_dir.display()
    );
    let summary = Sweep::new(session, fetcher, ledger)
        .with_max_concurrency(cli.max_concurrency)
        .run(cli.start, end)
        .await?;

    info!(
        "Done: {} downloaded, {} skipped, {} failed",
        summary.downloaded, summary.skipped, summary.failed
    );
    Ok(summary.failed)
}
