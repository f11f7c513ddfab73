use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("no active session: authenticate() has not succeeded yet")]
    NoSession,

    #[error("invalid date range: start {start} must not be after end {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("data endpoint returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("authentication retry exhausted for {date}")]
    AuthRetryExhausted { date: NaiveDate },

    #[error("write error: {0}")]
    Write(#[source] std::io::Error),

    #[error("ledger append failed: {0}")]
    Ledger(#[source] std::io::Error),
}

impl FetchError {
    /// Whether this failure looks like a rejected or expired token rather
    /// than a generic transport problem. Only these trigger the one-shot
    /// re-authentication in the day fetcher.
    pub fn is_auth_signal(&self) -> bool {
        match self {
            FetchError::Status(status) => {
                *status == reqwest::StatusCode::UNAUTHORIZED
                    || *status == reqwest::StatusCode::FORBIDDEN
            }
            FetchError::NoSession => true,
            _ => false,
        }
    }
}
