use crate::error::FetchError;
use chrono::NaiveDate;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const LEDGER_FILE_NAME: &str = "downloaded_list.csv";

/// Durable record of the dates whose data has been fully downloaded.
///
/// One ISO-8601 date per line, append-only. Appends are serialized behind a
/// lock and fsynced before returning, so a date reported complete survives
/// an immediate crash. A missing ledger file means a first run, not an error.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            path: output_dir.as_ref().join(LEDGER_FILE_NAME),
            append_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all recorded dates. Missing or unreadable file yields an empty
    /// set; malformed lines are skipped with a warning.
    pub async fn load(&self) -> HashSet<NaiveDate> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) => {
                info!("No ledger at {} ({e}), starting fresh", self.path.display());
                return HashSet::new();
            }
        };

        let mut dates = HashSet::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match NaiveDate::parse_from_str(line, "%Y-%m-%d") {
                Ok(date) => {
                    dates.insert(date);
                }
                Err(_) => warn!("Skipping malformed ledger line: {line:?}"),
            }
        }
        debug!("Loaded {} completed dates from ledger", dates.len());
        dates
    }

    /// Durably append one completed date. Flushed and synced before return.
    pub async fn record_complete(&self, date: NaiveDate) -> Result<(), FetchError> {
        let _guard = self.append_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(FetchError::Ledger)?;
        file.write_all(format!("{}\n", date.format("%Y-%m-%d")).as_bytes())
            .await
            .map_err(FetchError::Ledger)?;
        file.flush().await.map_err(FetchError::Ledger)?;
        file.sync_data().await.map_err(FetchError::Ledger)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn missing_ledger_is_empty() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        assert!(ledger.load().await.is_empty());
    }

    #[tokio::test]
    async fn records_survive_reload() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        ledger.record_complete(date("2021-06-01")).await.unwrap();
        ledger.record_complete(date("2021-06-03")).await.unwrap();

        let reloaded = Ledger::new(dir.path()).load().await;
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains(&date("2021-06-01")));
        assert!(reloaded.contains(&date("2021-06-03")));
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE_NAME);
        tokio::fs::write(&path, "2021-06-01\nnot-a-date\n\n2021-06-02\n")
            .await
            .unwrap();

        let dates = Ledger::new(dir.path()).load().await;
        assert_eq!(dates.len(), 2);
        assert!(dates.contains(&date("2021-06-02")));
    }

    #[tokio::test]
    async fn concurrent_appends_lose_nothing() {
        let dir = tempdir().unwrap();
        let ledger = std::sync::Arc::new(Ledger::new(dir.path()));

        let mut handles = Vec::new();
        for day in 1..=20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let d = NaiveDate::from_ymd_opt(2021, 6, day).unwrap();
                ledger.record_complete(d).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(ledger.load().await.len(), 20);
    }
}
