use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thinkdrop_common::Result;
use thinkdrop_config::RetentionConfig;
use thinkdrop_db::MemoryStore;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionCounters {
    pub checks: u64,
    pub last_purge: Option<DateTime<Utc>>,
    pub total_purged: u64,
}

/// Enforces the bounded history window: when the dataset spans more than
/// `max_days`, the oldest `purge_days` worth of records is removed.
///
/// Purges are resumable by construction. A check only ever looks at the
/// current `min(created_at)`, so an interrupted purge simply continues at
/// the next check.
pub struct RetentionController {
    store: Arc<MemoryStore>,
    config: RetentionConfig,
    counters: Mutex<RetentionCounters>,
}

impl RetentionController {
    pub fn new(store: Arc<MemoryStore>, config: RetentionConfig) -> Self {
        Self {
            store,
            config,
            counters: Mutex::new(RetentionCounters::default()),
        }
    }

    pub fn counters(&self) -> RetentionCounters {
        self.counters
            .lock()
            .expect("retention counters lock poisoned")
            .clone()
    }

    /// Background loop: one check immediately, one per interval, and a final
    /// check on graceful stop so short-lived sessions still get pruned.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(u64::from(self.config.check_interval_hours) * 3600);

        self.run_check_logged();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.run_check_logged();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("retention controller stopping, running final check");
                        self.run_check_logged();
                        break;
                    }
                }
            }
        }
    }

    fn run_check_logged(&self) {
        match self.check() {
            Ok(0) => {}
            Ok(purged) => info!("retention purged {purged} records"),
            Err(e) => warn!("retention check failed: {e}"),
        }
    }

    /// One retention pass. Returns the number of purged records (0 when the
    /// dataset is within the window).
    pub fn check(&self) -> Result<usize> {
        {
            let mut counters = self
                .counters
                .lock()
                .expect("retention counters lock poisoned");
            counters.checks += 1;
        }

        let Some((oldest, newest)) = self.store.created_at_range()? else {
            return Ok(0);
        };

        let age_days = (newest - oldest).num_days();
        if age_days <= i64::from(self.config.max_days) {
            return Ok(0);
        }

        info!(
            "dataset spans {age_days} days (max {}), purging oldest {} days",
            self.config.max_days, self.config.purge_days
        );

        let cutoff = oldest + chrono::Duration::days(i64::from(self.config.purge_days));
        let purged = self.store.purge_created_before(cutoff)?;

        // Purge sequence: rows are gone; now compact, checkpoint, rebuild.
        self.store.compact_index()?;
        self.store.database().checkpoint()?;
        self.store.rebuild_index()?;

        let mut counters = self
            .counters
            .lock()
            .expect("retention counters lock poisoned");
        counters.last_purge = Some(Utc::now());
        counters.total_purged += purged as u64;

        Ok(purged)
    }
}
