// Runs the availability check from environment configuration.
//
// Without CHECK_INTERVAL_SECS this is one check, meant for cron or a CI
// schedule. With it, the process repeats the check itself and keeps one
// ledger across runs so an open date is announced once per TTL. Check
// failures never change the exit code; the next run is the retry.

use std::{sync::Arc, time::Duration};

use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vacancy_watch::{check_once_with_ledger, MonitorConfig, NotificationLedger, TtlLedger};

async fn run_and_print(config: &MonitorConfig, ledger: Option<Arc<dyn NotificationLedger>>) {
    match check_once_with_ledger(config, ledger).await {
        Ok(report) => match serde_json::to_string(&report) {
            Ok(line) => println!("{line}"),
            Err(err) => error!(error = %err, "cannot render report"),
        },
        Err(err) => {
            error!(error = %err, "check not started");
            println!("{}", serde_json::json!({ "error": err.to_string() }));
        }
    }
}

// A run that overruns the period delays the next tick instead of
// triggering a burst of catch-up runs
fn check_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match MonitorConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            println!("{}", serde_json::json!({ "error": err.to_string() }));
            return Ok(());
        }
    };

    let Some(interval_secs) = config.check_interval_secs else {
        run_and_print(&config, None).await;
        return Ok(());
    };

    let ledger: Arc<dyn NotificationLedger> = Arc::new(TtlLedger::with_ttl(Duration::from_secs(
        config.notified_ttl_secs,
    )));
    let mut ticker = check_ticker(Duration::from_secs(interval_secs));
    info!(interval_secs, "watching for vacancies");

    loop {
        tokio::select! {
            _ = ticker.tick() => run_and_print(&config, Some(ledger.clone())).await,
            _ = tokio::signal::ctrl_c() => {
                info!(stats = ?ledger.stats(), "shutting down");
                break;
            }
        }
    }

    Ok(())
}
