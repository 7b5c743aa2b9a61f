//! Age-based expiry of datasets.
//!
//! The dataset record is the source of truth. For each expired record the blob
//! is deleted first (a missing blob counts as already deleted) and the record
//! second; if the blob delete fails the record is kept so the next sweep
//! retries. A second pass removes blobs older than the TTL that have no record,
//! along with partial writes older than the TTL.

use crate::error::AppError;
use crate::services::dataset_registry::DatasetRegistry;
use crate::services::table_store::TableStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub removed: usize,
    pub failed: usize,
    pub orphans_removed: usize,
    pub partials_removed: usize,
}

#[derive(Clone)]
pub struct CleanupSweep {
    store: Arc<TableStore>,
    registry: Arc<DatasetRegistry>,
    ttl: Duration,
}

impl CleanupSweep {
    pub fn new(store: Arc<TableStore>, registry: Arc<DatasetRegistry>, ttl: Duration) -> Self {
        Self { store, registry, ttl }
    }

    /// Removes every dataset created more than the TTL before `now`.
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| AppError::Internal(format!("Invalid TTL {:?}: {}", self.ttl, e)))?;
        let cutoff = now - ttl;

        let mut report = SweepReport::default();
        let expired = self.registry.created_before(cutoff)?;
        report.expired = expired.len();

        for record in expired {
            if let Err(e) = self.store.delete(&record.id) {
                warn!("Failed to delete table for dataset {}: {}", record.id, e);
                report.failed += 1;
                continue;
            }
            match self.registry.remove(&record.id) {
                Ok(_) => report.removed += 1,
                Err(e) => {
                    warn!("Failed to remove record for dataset {}: {}", record.id, e);
                    report.failed += 1;
                }
            }
        }

        report.orphans_removed = self.remove_orphans(cutoff)?;
        report.partials_removed = self.store.remove_partials_before(SystemTime::from(cutoff))?;
        Ok(report)
    }

    fn remove_orphans(&self, cutoff: DateTime<Utc>) -> Result<usize, AppError> {
        let mut removed = 0;
        for blob in self.store.list()? {
            if DateTime::<Utc>::from(blob.modified) >= cutoff || self.registry.contains(&blob.id)? {
                continue;
            }
            match self.store.delete(&blob.id) {
                Ok(true) => {
                    info!("Removed orphaned table {}", blob.id);
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to remove orphaned table {}: {}", blob.id, e),
            }
        }
        Ok(removed)
    }

    /// Runs the sweep every `every`, starting one interval from now.
    pub fn spawn(self, every: Duration) -> JoinHandle<()> {
        info!("Cleanup sweep scheduled every {:?} (ttl {:?})", every, self.ttl);
        let first = Instant::now() + every;
        tokio::spawn(async move {
            let mut ticker = interval_at(first, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                info!("Running cleanup job...");
                let sweep = self.clone();
                match tokio::task::spawn_blocking(move || sweep.run_once(Utc::now())).await {
                    Ok(Ok(report)) => info!(
                        "Cleanup finished: {} expired, {} removed, {} failed, {} orphans, {} partial writes",
                        report.expired,
                        report.removed,
                        report.failed,
                        report.orphans_removed,
                        report.partials_removed
                    ),
                    Ok(Err(e)) => error!("Cleanup job failed: {}", e),
                    Err(e) => error!("Cleanup job panicked: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::services::csv_ingest::parse_csv;
    use crate::services::dataset_registry::DatasetRecord;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    struct Fixture {
        tmp: TempDir,
        store: Arc<TableStore>,
        registry: Arc<DatasetRegistry>,
        sweep: CleanupSweep,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(TableStore::open(&StorageConfig::new(tmp.path())).unwrap());
        let registry = Arc::new(DatasetRegistry::open_in_memory().unwrap());
        let sweep = CleanupSweep::new(store.clone(), registry.clone(), DAY);
        Fixture { tmp, store, registry, sweep }
    }

    fn add_dataset(f: &Fixture, id: &str, created_at: DateTime<Utc>) {
        f.store.save(id, &parse_csv(b"a\n1\n").unwrap()).unwrap();
        f.registry
            .insert(&DatasetRecord {
                id: id.to_string(),
                user_id: "u".to_string(),
                filename: "a.csv".to_string(),
                created_at,
            })
            .unwrap();
    }

    #[test]
    fn expires_only_datasets_past_the_ttl() {
        let f = fixture();
        let now = Utc::now();
        add_dataset(&f, "old", now - chrono::Duration::hours(25));
        add_dataset(&f, "recent", now - chrono::Duration::hours(23));

        let report = f.sweep.run_once(now).unwrap();

        assert_eq!(report.expired, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.failed, 0);
        assert!(!f.store.exists("old"));
        assert!(!f.registry.contains("old").unwrap());
        assert!(f.store.exists("recent"));
        assert!(f.registry.contains("recent").unwrap());
    }

    #[test]
    fn sweep_is_idempotent() {
        let f = fixture();
        let now = Utc::now();
        add_dataset(&f, "old", now - chrono::Duration::hours(25));

        f.sweep.run_once(now).unwrap();
        let second = f.sweep.run_once(now).unwrap();

        assert_eq!(second, SweepReport::default());
    }

    #[test]
    fn missing_table_does_not_block_record_removal() {
        let f = fixture();
        let now = Utc::now();
        add_dataset(&f, "half", now - chrono::Duration::hours(30));
        f.store.delete("half").unwrap();

        let report = f.sweep.run_once(now).unwrap();

        assert_eq!(report.removed, 1);
        assert!(!f.registry.contains("half").unwrap());
    }

    #[test]
    fn removes_stale_orphans_but_keeps_fresh_ones() {
        let f = fixture();
        f.store.save("orphan", &parse_csv(b"a\n1\n").unwrap()).unwrap();

        let fresh = f.sweep.run_once(Utc::now()).unwrap();
        assert_eq!(fresh.orphans_removed, 0);
        assert!(f.store.exists("orphan"));

        let later = Utc::now() + chrono::Duration::hours(25);
        let report = f.sweep.run_once(later).unwrap();
        assert_eq!(report.orphans_removed, 1);
        assert!(!f.store.exists("orphan"));
    }

    #[test]
    fn removes_abandoned_partial_writes() {
        let f = fixture();
        let partial = f.tmp.path().join(".write-xyz789.partial");
        std::fs::write(&partial, b"truncated").unwrap();

        assert_eq!(f.sweep.run_once(Utc::now()).unwrap().partials_removed, 0);
        assert!(partial.exists());

        let later = Utc::now() + chrono::Duration::hours(25);
        assert_eq!(f.sweep.run_once(later).unwrap().partials_removed, 1);
        assert!(!partial.exists());
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn spawned_sweep_runs_after_one_interval() {
        let f = fixture();
        add_dataset(&f, "old", Utc::now() - chrono::Duration::hours(48));
        let every = Duration::from_secs(3600);

        tokio::time::pause();
        let handle = f.sweep.clone().spawn(every);
        settle().await;

        tokio::time::advance(every - Duration::from_secs(1)).await;
        settle().await;
        assert!(f.registry.contains("old").unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        // run_once goes through spawn_blocking, which runs on a real thread.
        let mut removed = false;
        for _ in 0..200 {
            settle().await;
            if !f.registry.contains("old").unwrap() {
                removed = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(removed);
        assert!(!f.store.exists("old"));

        handle.abort();
    }
}
