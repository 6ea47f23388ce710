// One check cycle: fetch, parse, and at most one notification.
//
// Start -> Fetching -> Parsing -> { Unavailable: Done | Available -> Notifying -> Done }
//                  \-> FetchFailed -> (NotifyingError, if enabled) -> Done
//
// A `Monitor` holds no mutable state, so overlapping runs from an external
// scheduler are safe. Deduplication across runs is the injected ledger's job.

use std::{sync::Arc, time::Duration};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::{CheckRequest, MonitorConfig, RunPolicy},
    dispatcher::{
        availability_message, error_message, DispatchOutcome, LinePushChannel,
        NotificationChannel, NotificationDispatcher,
    },
    error::MonitorError,
    fetcher::{HttpPageFetcher, PageFetcher},
    ledger::NotificationLedger,
    parser::{Availability, AvailabilityParser},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Start,
    Fetching,
    FetchFailed,
    Parsing,
    Notifying,
    NotifyingError,
    Done,
}

// Verdict of one run. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub availability: Availability,
    pub target_date: NaiveDate,
    pub source_url: String,
    pub error_detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub result: CheckResult,
    pub dispatch: Option<DispatchOutcome>,
}

impl CheckReport {
    pub fn availability(&self) -> Availability {
        self.result.availability
    }

    pub fn is_available(&self) -> bool {
        self.result.availability.is_available()
    }

    pub fn source_url(&self) -> &str {
        &self.result.source_url
    }

    pub fn dispatch_attempted(&self) -> bool {
        self.dispatch.as_ref().map_or(false, |d| d.attempted)
    }

    pub fn dispatch_succeeded(&self) -> Option<bool> {
        self.dispatch
            .as_ref()
            .filter(|d| d.attempted)
            .map(|d| d.succeeded)
    }

    // Run error first, then dispatch error
    pub fn error(&self) -> Option<&str> {
        self.result.error_detail.as_deref().or_else(|| {
            self.dispatch
                .as_ref()
                .and_then(|d| d.error_detail.as_deref())
        })
    }
}

pub struct Monitor<F, C> {
    fetcher: F,
    parser: AvailabilityParser,
    dispatcher: NotificationDispatcher<C>,
    policy: RunPolicy,
    destination: Option<String>,
    site_name: String,
    ledger: Option<Arc<dyn NotificationLedger>>,
}

impl<F: PageFetcher, C: NotificationChannel> Monitor<F, C> {
    pub fn new(
        fetcher: F,
        channel: C,
        parser: AvailabilityParser,
        policy: RunPolicy,
        destination: Option<String>,
        site_name: impl Into<String>,
    ) -> Self {
        let dispatcher =
            NotificationDispatcher::new(channel, Duration::from_millis(policy.dispatch_timeout_ms));
        Self {
            fetcher,
            parser,
            dispatcher,
            policy,
            destination,
            site_name: site_name.into(),
            ledger: None,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn NotificationLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn channel(&self) -> &C {
        self.dispatcher.channel()
    }

    pub async fn check_once(&self, request: &CheckRequest) -> CheckReport {
        let target_date = request.target_date;
        let source_url = request.source_url.to_string();
        info!(%target_date, url = %source_url, "availability check started");
        debug!(phase = ?RunPhase::Fetching, "run phase");

        let outcome = match self.fetcher.fetch(&request.source_url, &request.headers).await {
            Ok(page) => {
                debug!(phase = ?RunPhase::Parsing, bytes = page.body.len(), "run phase");
                let parser = self.parser.clone();
                tokio::task::spawn_blocking(move || parser.parse_page(&page, target_date))
                    .await
                    .unwrap_or_else(|err| {
                        Err(MonitorError::Parse(format!("page evaluation aborted: {err}")))
                    })
            }
            Err(err) => Err(err),
        };

        let report = match outcome {
            Ok(availability) => {
                let result = CheckResult {
                    availability,
                    target_date,
                    source_url,
                    error_detail: None,
                };
                let dispatch = if availability.is_available() {
                    self.notify_available(&result).await
                } else {
                    None
                };
                CheckReport { result, dispatch }
            }
            Err(err) => {
                debug!(phase = ?RunPhase::FetchFailed, "run phase");
                warn!(error = %err, "availability check failed");
                let dispatch = if self.policy.notify_on_error {
                    debug!(phase = ?RunPhase::NotifyingError, "run phase");
                    Some(
                        self.dispatcher
                            .send(self.destination.as_deref(), &error_message(&err.to_string()))
                            .await,
                    )
                } else {
                    None
                };
                CheckReport {
                    result: CheckResult {
                        availability: Availability::Indeterminate,
                        target_date,
                        source_url,
                        error_detail: Some(err.to_string()),
                    },
                    dispatch,
                }
            }
        };

        debug!(phase = ?RunPhase::Done, "run phase");
        info!(
            availability = ?report.availability(),
            dispatch_attempted = report.dispatch_attempted(),
            dispatch_succeeded = ?report.dispatch_succeeded(),
            error = report.error().unwrap_or(""),
            "availability check finished"
        );
        report
    }

    async fn notify_available(&self, result: &CheckResult) -> Option<DispatchOutcome> {
        if let Some(ledger) = &self.ledger {
            if !ledger.try_claim(result.target_date) {
                info!(target_date = %result.target_date, "already notified for this date, skipping");
                return None;
            }
        }

        debug!(phase = ?RunPhase::Notifying, "run phase");
        let body = availability_message(&self.site_name, result.target_date, &result.source_url);
        let outcome = self.dispatcher.send(self.destination.as_deref(), &body).await;

        if !outcome.succeeded {
            if let Some(ledger) = &self.ledger {
                ledger.release(result.target_date);
            }
        }
        Some(outcome)
    }
}

// Single entry point: validate, wire real collaborators, run once.
// Only a configuration problem is returned as `Err`; every other failure
// lands inside the report.
pub async fn check_once(config: &MonitorConfig) -> Result<CheckReport, MonitorError> {
    check_once_with_ledger(config, None).await
}

pub async fn check_once_with_ledger(
    config: &MonitorConfig,
    ledger: Option<Arc<dyn NotificationLedger>>,
) -> Result<CheckReport, MonitorError> {
    debug!(phase = ?RunPhase::Start, "run phase");
    let request = config.validate()?;

    let fetcher = HttpPageFetcher::new(config.fetch.clone())?;
    let channel = LinePushChannel::new(&config.line);
    let mut monitor = Monitor::new(
        fetcher,
        channel,
        AvailabilityParser::new(config.parser.clone()),
        config.policy.clone(),
        config.line.destination.clone(),
        config.site_name.clone(),
    );
    if let Some(ledger) = ledger {
        monitor = monitor.with_ledger(ledger);
    }

    Ok(monitor.check_once(&request).await)
}
