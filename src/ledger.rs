// "Already notified" ledger. Owned by the caller and injected into the
// monitor; the core itself keeps no state between runs.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::NaiveDate;
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::RwLock;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LedgerStats {
    pub claimed_count: usize,
    pub suppressed_count: usize,
    pub released_count: usize,
    pub expired_count: usize,
    pub items_count: usize,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    // How long a successful alert blocks further alerts for the same date
    pub ttl: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(crate::config::DEFAULT_NOTIFIED_TTL_SECS),
        }
    }
}

// Check-and-set keyed by target date
pub trait NotificationLedger: Send + Sync + 'static {
    // True when the caller now owns the alert for this date and should send it
    fn try_claim(&self, target_date: NaiveDate) -> bool;

    // Gives a claim back after a failed send so a later run can try again
    fn release(&self, target_date: NaiveDate);

    fn stats(&self) -> LedgerStats;
}

pub fn ledger_key(target_date: NaiveDate) -> String {
    target_date.format("%Y-%m-%d").to_string()
}

#[derive(Default)]
pub struct TtlLedger {
    entries: DashMap<String, Instant>,
    config: LedgerConfig,
    stats: Arc<RwLock<LedgerStats>>,
}

impl TtlLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(LedgerConfig { ttl })
    }

    // Drops every entry whose TTL has run out; returns how many went
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.stats.write().expired_count += removed;
        }
        removed
    }

    pub fn contains(&self, target_date: NaiveDate) -> bool {
        self.entries
            .get(&ledger_key(target_date))
            .map_or(false, |expires_at| *expires_at > Instant::now())
    }
}

impl NotificationLedger for TtlLedger {
    fn try_claim(&self, target_date: NaiveDate) -> bool {
        let now = Instant::now();
        let expires_at = now + self.config.ttl;

        // The entry guard holds the shard lock, so two concurrent runs cannot both win
        let claimed = match self.entries.entry(ledger_key(target_date)) {
            Entry::Occupied(mut entry) => {
                if *entry.get() <= now {
                    self.stats.write().expired_count += 1;
                    entry.insert(expires_at);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                true
            }
        };

        let mut stats = self.stats.write();
        if claimed {
            stats.claimed_count += 1;
        } else {
            stats.suppressed_count += 1;
        }
        claimed
    }

    fn release(&self, target_date: NaiveDate) {
        if self.entries.remove(&ledger_key(target_date)).is_some() {
            self.stats.write().released_count += 1;
        }
    }

    fn stats(&self) -> LedgerStats {
        let mut stats = self.stats.read().clone();
        stats.items_count = self.entries.len();
        stats
    }
}
