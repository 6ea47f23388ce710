// Reservation-page vacancy watcher: fetch a listing page, decide whether the
// target date has opened up, and send at most one alert per run.

pub mod config;
pub mod dispatcher;
pub mod document;
pub mod error;
pub mod fetcher;
pub mod ledger;
pub mod monitor;
pub mod parser;

#[cfg(test)]
pub mod mock_server;

// Re-export key types for convenience
pub use config::{CheckRequest, MonitorConfig, ParserConfig, RunPolicy, ScanMode, TieBreak};
pub use dispatcher::{DispatchOutcome, LinePushChannel, NotificationChannel, NotificationDispatcher};
pub use error::MonitorError;
pub use fetcher::{FetchedPage, HttpPageFetcher, PageFetcher};
pub use ledger::{NotificationLedger, TtlLedger};
pub use monitor::{check_once, check_once_with_ledger, CheckReport, CheckResult, Monitor};
pub use parser::{format_display_date, Availability, AvailabilityParser};
