use crate::auth::Session;
use crate::client::DayFetcher;
use crate::error::FetchError;
use crate::ledger::Ledger;
use chrono::{Days, NaiveDate};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Aggregate outcome of one sweep over a date range.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Drives a bounded-concurrency sweep over `[start, end)`.
///
/// Dates already present in the ledger snapshot are skipped. Each remaining
/// date is downloaded under a semaphore permit acquired before spawning, so
/// submission backpressures once the pool is saturated. A date's failure
/// removes its partial file and leaves the ledger untouched; it never stops
/// the rest of the sweep.
pub struct Sweep {
    session: Arc<Session>,
    fetcher: DayFetcher,
    ledger: Arc<Ledger>,
    max_concurrency: usize,
}

impl Sweep {
    pub fn new(session: Arc<Session>, fetcher: DayFetcher, ledger: Arc<Ledger>) -> Self {
        Self {
            session,
            fetcher,
            ledger,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Run the sweep. Returns only after every submitted task has finished.
    pub async fn run(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<SweepSummary, FetchError> {
        if start > end {
            return Err(FetchError::InvalidDateRange { start, end });
        }

        let completed = self.ledger.load().await;
        // Owned by this call and never closed, so acquiring a permit below
        // cannot fail.
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut summary = SweepSummary::default();

        let mut date = start;
        while date < end {
            if completed.contains(&date) {
                info!("Already downloaded, skipping: {date}");
                summary.skipped += 1;
                date = next_day(date);
                continue;
            }

            let target = self.fetcher.target_path(date);
            if tokio::fs::try_exists(&target).await.unwrap_or(false) {
                warn!("Stale file from a previous run, deleting: {}", target.display());
                if let Err(e) = tokio::fs::remove_file(&target).await {
                    error!("Could not delete stale file {}: {e}", target.display());
                    summary.failed += 1;
                    date = next_day(date);
                    continue;
                }
            }

            // Acquire before spawn: submission blocks while the pool is full.
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            let session = self.session.clone();
            let fetcher = self.fetcher.clone();
            let ledger = self.ledger.clone();

            tasks.spawn(async move {
                let _permit = permit;
                fetch_and_record(date, &fetcher, &session, &ledger).await
            });

            date = next_day(date);
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => summary.downloaded += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    error!("Download task panicked: {e}");
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Sweep finished: {} downloaded, {} skipped, {} failed",
            summary.downloaded, summary.skipped, summary.failed
        );
        Ok(summary)
    }
}

/// One task body: download, then record in the ledger on success or clean up
/// the partial file on failure. Returns whether the date completed.
async fn fetch_and_record(
    date: NaiveDate,
    fetcher: &DayFetcher,
    session: &Session,
    ledger: &Ledger,
) -> bool {
    info!("Download started: {date}");
    match fetcher.fetch_day(date, session).await {
        Ok(bytes) => {
            if let Err(e) = ledger.record_complete(date).await {
                // The file is on disk but unrecorded; a later run redownloads
                // it rather than losing the day.
                error!("Downloaded {date} ({bytes} bytes) but ledger append failed: {e}");
                return false;
            }
            info!("Download succeeded: {date} ({bytes} bytes)");
            true
        }
        Err(e) => {
            error!("Download failed: {date}: {e}");
            let target = fetcher.target_path(date);
            if tokio::fs::try_exists(&target).await.unwrap_or(false)
                && let Err(rm_err) = tokio::fs::remove_file(&target).await
            {
                warn!("Could not remove partial file {}: {rm_err}", target.display());
            }
            false
        }
    }
}

fn next_day(date: NaiveDate) -> NaiveDate {
    date.checked_add_days(Days::new(1))
        .expect("date range stays within chrono bounds")
}
