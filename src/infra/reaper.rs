//! Periodic TTL sweep of the filesystem derivative store.
//!
//! The sweep does not coordinate with the in-flight guard or the URL cache:
//! a reaped derivative becomes a future probe miss and is materialized again.

use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const TARGET: &str = "derivo::reaper";

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapSummary {
    pub scanned: u64,
    pub removed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone)]
pub struct StorageReaper {
    root: PathBuf,
    ttl: Option<Duration>,
    interval: Duration,
}

impl StorageReaper {
    /// A non-positive `ttl_seconds` disables reaping entirely.
    pub fn new(root: impl Into<PathBuf>, ttl_seconds: i64, interval: Duration) -> Self {
        let ttl = u64::try_from(ttl_seconds)
            .ok()
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs);
        Self {
            root: root.into(),
            ttl,
            interval,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ttl.is_some()
    }

    /// Walk the storage root once and remove every file older than the TTL.
    pub async fn sweep(&self) -> ReapSummary {
        let Some(ttl) = self.ttl else {
            debug!(target = TARGET, "reaper disabled");
            return ReapSummary::default();
        };

        let root = self.root.clone();
        let task =
            tokio::task::spawn_blocking(move || sweep_blocking(&root, ttl, SystemTime::now()));
        let summary = match task.await {
            Ok(summary) => summary,
            Err(err) => {
                warn!(target = TARGET, error = %err, "sweep task aborted");
                return ReapSummary::default();
            }
        };

        counter!("derivo_reaper_removed_total").increment(summary.removed);
        info!(
            target = TARGET,
            root = %self.root.display(),
            scanned = summary.scanned,
            removed = summary.removed,
            failed = summary.failed,
            "storage sweep finished"
        );
        summary
    }

    /// Run [`StorageReaper::sweep`] on a fixed cadence. Returns `None` when disabled.
    pub fn spawn(self) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            return None;
        }

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            // The first tick completes immediately; `derivo reap` covers startup sweeps.
            interval.tick().await;
            loop {
                interval.tick().await;
                self.sweep().await;
            }
        }))
    }
}

fn sweep_blocking(root: &Path, ttl: Duration, now: SystemTime) -> ReapSummary {
    let mut summary = ReapSummary::default();

    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                summary.failed += 1;
                warn!(target = TARGET, error = %err, "failed to walk storage root");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        summary.scanned += 1;

        let modified = match entry
            .metadata()
            .map_err(std::io::Error::from)
            .and_then(|metadata| metadata.modified())
        {
            Ok(modified) => modified,
            Err(err) => {
                summary.failed += 1;
                warn!(
                    target = TARGET,
                    path = %entry.path().display(),
                    error = %err,
                    "failed to stat derivative"
                );
                continue;
            }
        };

        // Files stamped in the future have no age yet.
        let Ok(age) = now.duration_since(modified) else {
            continue;
        };
        if age <= ttl {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                summary.removed += 1;
                debug!(
                    target = TARGET,
                    path = %entry.path().display(),
                    age_secs = age.as_secs(),
                    "derivative expired"
                );
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                summary.failed += 1;
                warn!(
                    target = TARGET,
                    path = %entry.path().display(),
                    error = %err,
                    "failed to remove derivative"
                );
            }
        }
    }

    summary
}
