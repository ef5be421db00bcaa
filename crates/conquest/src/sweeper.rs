//! Deadline Sweeper
//!
//! Auto-resolves pending contests whose defense window has passed. A sweep is
//! safe to repeat or run concurrently: contests already resolved are skipped.

use chrono::{DateTime, Duration, Utc};
use roadwar_core::{ContestId, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::contest::Contest;
use crate::engine::{ConquestEngine, ResolvedContest};

/// Window of the expiry preview
pub const EXPIRING_PREVIEW_MINUTES: i64 = 60;

/// A contest the sweeper failed to resolve
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepFailure {
    pub contest_id: ContestId,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub checked: usize,
    pub resolved: Vec<ResolvedContest>,
    pub errors: Vec<SweepFailure>,
    pub purged_intents: usize,
}

/// Contests close to their deadline, for the preview endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryPreview {
    pub expired_count: usize,
    pub expiring_soon: Vec<Contest>,
}

pub struct DeadlineSweeper {
    engine: Arc<ConquestEngine>,
    interval_secs: u64,
    shutdown: Arc<Notify>,
}

impl DeadlineSweeper {
    pub fn new(engine: Arc<ConquestEngine>, interval_secs: u64, shutdown: Arc<Notify>) -> Self {
        Self {
            engine,
            interval_secs: interval_secs.max(1),
            shutdown,
        }
    }

    /// Resolve every expired pending contest
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let expired = self.engine.expired_contests(now)?;
        let mut report = SweepReport {
            checked: expired.len(),
            ..SweepReport::default()
        };

        for contest_id in expired {
            match self.engine.resolve_expired(contest_id, now) {
                Ok(Some(resolved)) => report.resolved.push(resolved),
                // resolved by a concurrent sweep or a late defense
                Ok(None) => debug!(contest_id = %contest_id, "Contest already resolved"),
                Err(e) => {
                    warn!(
                        contest_id = %contest_id,
                        error = %e,
                        "Failed to resolve expired contest"
                    );
                    report.errors.push(SweepFailure {
                        contest_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        report.purged_intents = self.engine.purge_stale_intents(now)?;

        if report.checked > 0 || report.purged_intents > 0 {
            info!(
                checked = report.checked,
                resolved = report.resolved.len(),
                errors = report.errors.len(),
                purged_intents = report.purged_intents,
                "Sweep complete"
            );
        }

        Ok(report)
    }

    /// Resolve a single contest on demand
    pub fn resolve_one(
        &self,
        contest_id: ContestId,
        now: DateTime<Utc>,
    ) -> Result<Option<ResolvedContest>> {
        self.engine.resolve_expired(contest_id, now)
    }

    pub fn expiring(&self, now: DateTime<Utc>) -> Result<ExpiryPreview> {
        let expiring_soon = self
            .engine
            .expiring_contests(now, Duration::minutes(EXPIRING_PREVIEW_MINUTES))?;
        let expired_count = self.engine.expired_contests(now)?.len();
        Ok(ExpiryPreview {
            expired_count,
            expiring_soon,
        })
    }

    /// Sweep on a fixed interval until `shutdown` is notified
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval_secs, "Deadline sweeper started");
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(self.interval_secs));
            loop {
                tokio::select! {
                    _ = self.shutdown.notified() => {
                        info!("Deadline sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep(Utc::now()) {
                            warn!(error = %e, "Sweep failed");
                        }
                    }
                }
            }
        })
    }
}
