use crate::auth::Session;
use crate::error::FetchError;
use chrono::NaiveDate;
use log::{debug, warn};
use reqwest::{Client as HttpClient, Response};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

pub const DEFAULT_DATA_URL_TEMPLATE: &str = "https://tdx.transportdata.tw/api/historical/v2/Historical/Bus/RealTimeNearStop/City/Taipei?Dates={date}&%24format=CSV";

const DATE_PLACEHOLDER: &str = "{date}";

/// Downloads one day's payload and streams it to `<output_dir>/<date>.csv`.
///
/// On an auth-flavored rejection the fetcher re-authenticates once through
/// the session and retries once; any second failure is terminal for that
/// date. Partial files are never deleted here, cleanup policy lives in the
/// orchestrator.
#[derive(Debug, Clone)]
pub struct DayFetcher {
    http: HttpClient,
    data_url_template: String,
    output_dir: PathBuf,
}

impl DayFetcher {
    pub fn new(http: HttpClient, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            http,
            data_url_template: DEFAULT_DATA_URL_TEMPLATE.to_string(),
            output_dir: output_dir.into(),
        }
    }

    /// Override the data endpoint template (useful for tests or proxies).
    /// The template must contain a `{date}` placeholder.
    pub fn with_data_url_template(mut self, template: impl Into<String>) -> Self {
        self.data_url_template = template.into();
        self
    }

    pub fn target_path(&self, date: NaiveDate) -> PathBuf {
        self.output_dir.join(format!("{}.csv", date.format("%Y-%m-%d")))
    }

    fn data_url(&self, date: NaiveDate) -> String {
        self.data_url_template
            .replace(DATE_PLACEHOLDER, &date.format("%Y-%m-%d").to_string())
    }

    /// Fetch one day and write it to its target path. Returns bytes written.
    pub async fn fetch_day(&self, date: NaiveDate, session: &Session) -> Result<u64, FetchError> {
        let url = self.data_url(date);
        let token = session.bearer_token().await?;

        let response = match self.request(&url, &token).await {
            Ok(response) => response,
            Err(e) if e.is_auth_signal() => {
                warn!("Request for {date} rejected ({e}), re-authenticating");
                let fresh = session.reauthenticate(&token).await?;
                match self.request(&url, &fresh).await {
                    Ok(response) => response,
                    Err(retry_err) if retry_err.is_auth_signal() => {
                        return Err(FetchError::AuthRetryExhausted { date });
                    }
                    Err(retry_err) => return Err(retry_err),
                }
            }
            Err(e) => return Err(e),
        };

        self.stream_to_file(response, &self.target_path(date)).await
    }

    async fn request(&self, url: &str, token: &str) -> Result<Response, FetchError> {
        debug!("GET {url}");
        let response = self.http.get(url).bearer_auth(token).send().await?;
        let status = response.status();
        debug!("Received status {status}");
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        Ok(response)
    }

    async fn stream_to_file(
        &self,
        mut response: Response,
        path: &Path,
    ) -> Result<u64, FetchError> {
        let mut file = File::create(path).await.map_err(FetchError::Write)?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await.map_err(FetchError::Write)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(FetchError::Write)?;
        Ok(written)
    }
}
