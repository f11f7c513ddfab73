//! Incremental downloader for TDX historical bus location data.
//! Maintains an OAuth2 client-credentials session, sweeps a date range with
//! bounded concurrency, streams each day's CSV payload to disk, and keeps a
//! durable ledger of completed dates so repeated runs only fetch what is
//! missing.

pub mod auth;
pub mod client;
pub mod error;
pub mod ledger;
pub mod sweep;

pub use auth::Session;
pub use client::DayFetcher;
pub use error::FetchError;
pub use ledger::Ledger;
pub use sweep::{Sweep, SweepSummary};
