//! Data sync task - pulls external readings, stores them and sweeps expired data

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::FutureExt;
use parking_lot::RwLock;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::services::external_api::ExternalSource;
use crate::shutdown::ShutdownListener;
use crate::store::ReadingStore;
use crate::tasks::retention;

/// Outcome of a single fetch → insert → cleanup cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Readings returned by the external source
    pub fetched: usize,
    /// Rows written to the environment table
    pub inserted: u64,
    /// Rows removed by the retention sweep
    pub purged: u64,
    /// The insert step failed (cleanup still ran)
    pub insert_failed: bool,
}

/// Running totals across sync cycles, shared with the HTTP layer
#[derive(Debug, Default)]
pub struct SyncStats {
    cycles_total: AtomicU64,
    failed_cycles_total: AtomicU64,
    fetched_total: AtomicU64,
    inserted_total: AtomicU64,
    purged_total: AtomicU64,
    insert_failures_total: AtomicU64,
    last_cycle_at: RwLock<Option<DateTime<Utc>>>,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, report: &CycleReport) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.fetched_total
            .fetch_add(report.fetched as u64, Ordering::Relaxed);
        self.inserted_total
            .fetch_add(report.inserted, Ordering::Relaxed);
        self.purged_total.fetch_add(report.purged, Ordering::Relaxed);
        if report.insert_failed {
            self.insert_failures_total.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_cycle_at.write() = Some(Utc::now());
    }

    /// A cycle aborted before producing a report
    pub fn record_failure(&self) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.failed_cycles_total.fetch_add(1, Ordering::Relaxed);
        *self.last_cycle_at.write() = Some(Utc::now());
    }

    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            failed_cycles_total: self.failed_cycles_total.load(Ordering::Relaxed),
            fetched_total: self.fetched_total.load(Ordering::Relaxed),
            inserted_total: self.inserted_total.load(Ordering::Relaxed),
            purged_total: self.purged_total.load(Ordering::Relaxed),
            insert_failures_total: self.insert_failures_total.load(Ordering::Relaxed),
            last_cycle_at: *self.last_cycle_at.read(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncStatsSnapshot {
    pub cycles_total: u64,
    pub failed_cycles_total: u64,
    pub fetched_total: u64,
    pub inserted_total: u64,
    pub purged_total: u64,
    pub insert_failures_total: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// Background service that keeps the reading tables in sync with the external source.
///
/// Constructed once at startup and driven by [`SyncService::run`]. Cycles never
/// overlap: each cycle finishes before the next sleep begins.
pub struct SyncService {
    store: Arc<dyn ReadingStore>,
    source: Arc<dyn ExternalSource>,
    stats: Arc<SyncStats>,
    interval: Duration,
    warmup: Duration,
    retention: TimeDelta,
    shutdown: ShutdownListener,
}

impl SyncService {
    pub fn new(
        config: &SyncConfig,
        store: Arc<dyn ReadingStore>,
        source: Arc<dyn ExternalSource>,
        stats: Arc<SyncStats>,
        shutdown: ShutdownListener,
    ) -> Self {
        Self {
            store,
            source,
            stats,
            interval: config.interval,
            warmup: config.warmup,
            retention: config.retention,
            shutdown,
        }
    }

    /// Run until shutdown is signalled.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.interval.as_secs(),
            warmup_secs = self.warmup.as_secs(),
            retention_days = self.retention.num_days(),
            "Data sync task started"
        );

        if !self.shutdown.sleep(self.warmup).await {
            info!("Data sync task stopped during warm-up");
            return;
        }

        loop {
            // A panic inside a cycle must not take the task down with it.
            match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
                Ok(_) => {}
                Err(panic) => {
                    self.stats.record_failure();
                    error!(panic = %panic_message(&*panic), "Data sync cycle aborted");
                }
            }

            let interval = self.interval;
            if !self.shutdown.sleep(interval).await {
                break;
            }
        }

        info!("Data sync task stopped");
    }

    /// Execute one fetch → insert → cleanup cycle.
    ///
    /// Insert and cleanup are independent steps: a failed insert is logged and
    /// the retention sweep still runs.
    pub async fn run_cycle(&self) -> CycleReport {
        let readings = self.source.fetch_environment_readings().await;
        let mut report = CycleReport {
            fetched: readings.len(),
            ..Default::default()
        };

        if !readings.is_empty() {
            match self.store.insert_environment_readings(&readings).await {
                Ok(inserted) => {
                    if inserted < readings.len() as u64 {
                        warn!(
                            inserted = inserted,
                            expected = readings.len(),
                            "Some readings were not inserted"
                        );
                    }
                    report.inserted = inserted;
                }
                Err(e) => {
                    report.insert_failed = true;
                    error!(error = %e, batch_size = readings.len(), "Failed to insert external readings");
                }
            }
        }

        report.purged =
            retention::purge_expired_readings(self.store.as_ref(), self.retention, &self.shutdown)
                .await;

        self.stats.record(&report);

        info!(
            fetched = report.fetched,
            inserted = report.inserted,
            purged = report.purged,
            insert_failed = report.insert_failed,
            "Data sync cycle completed"
        );

        report
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnvironmentMeasurements, NewEnvironmentReading};
    use crate::shutdown::Shutdown;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    /// Returns a fixed batch on every call and counts calls.
    struct FixedSource {
        batch: Vec<NewEnvironmentReading>,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn new(batch: Vec<NewEnvironmentReading>) -> Arc<Self> {
            Arc::new(Self {
                batch,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExternalSource for FixedSource {
        async fn fetch_environment_readings(&self) -> Vec<NewEnvironmentReading> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = Utc::now();
            self.batch
                .iter()
                .cloned()
                .map(|mut r| {
                    r.record_time = now;
                    r
                })
                .collect()
        }
    }

    struct PanickingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExternalSource for PanickingSource {
        async fn fetch_environment_readings(&self) -> Vec<NewEnvironmentReading> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("source exploded");
        }
    }

    fn reading(device_id: i32, temperature: Option<f64>) -> NewEnvironmentReading {
        NewEnvironmentReading {
            device_id,
            record_time: Utc::now(),
            measurements: EnvironmentMeasurements {
                temperature,
                ..Default::default()
            },
        }
    }

    fn config(warmup: Duration, interval: Duration) -> SyncConfig {
        SyncConfig {
            warmup,
            interval,
            ..SyncConfig::default()
        }
    }

    fn service(
        config: &SyncConfig,
        store: Arc<MemoryStore>,
        source: Arc<dyn ExternalSource>,
        shutdown: &Shutdown,
    ) -> (SyncService, Arc<SyncStats>) {
        let stats = Arc::new(SyncStats::new());
        let service = SyncService::new(config, store, source, stats.clone(), shutdown.listener());
        (service, stats)
    }

    #[tokio::test]
    async fn test_cycle_inserts_fetched_readings() {
        let store = Arc::new(MemoryStore::new());
        let source = FixedSource::new(vec![
            reading(1, Some(20.0)),
            reading(2, Some(21.5)),
            reading(3, None),
        ]);
        let shutdown = Shutdown::new();
        let (service, stats) = service(&SyncConfig::default(), store.clone(), source, &shutdown);

        let before = Utc::now();
        let report = service.run_cycle().await;

        assert_eq!(report.fetched, 3);
        assert_eq!(report.inserted, 3);
        assert!(!report.insert_failed);

        let rows = store.environment_rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows.iter().map(|r| r.device_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(rows[0].measurements.temperature, Some(20.0));
        assert_eq!(rows[1].measurements.temperature, Some(21.5));
        assert_eq!(rows[2].measurements.temperature, None);
        assert!(rows.iter().all(|r| r.record_time >= before));

        assert_eq!(stats.snapshot().inserted_total, 3);
    }

    #[tokio::test]
    async fn test_empty_fetch_inserts_nothing_and_still_cleans() {
        let store = Arc::new(MemoryStore::new());
        store.seed_environment(1, Utc::now() - TimeDelta::days(9));
        let source = FixedSource::new(Vec::new());
        let shutdown = Shutdown::new();
        let (service, _) = service(&SyncConfig::default(), store.clone(), source, &shutdown);

        let report = service.run_cycle().await;

        assert_eq!(
            report,
            CycleReport {
                fetched: 0,
                inserted: 0,
                purged: 1,
                insert_failed: false,
            }
        );
        assert!(store.environment_rows().is_empty());
    }

    #[tokio::test]
    async fn test_insert_failure_does_not_skip_cleanup() {
        let store = Arc::new(MemoryStore::new());
        store.seed_traffic(Utc::now() - TimeDelta::days(30));
        store.fail_inserts();
        let source = FixedSource::new(vec![reading(1, Some(19.0))]);
        let shutdown = Shutdown::new();
        let (service, stats) = service(&SyncConfig::default(), store.clone(), source, &shutdown);

        let report = service.run_cycle().await;

        assert!(report.insert_failed);
        assert_eq!(report.inserted, 0);
        assert_eq!(report.purged, 1);
        assert!(store.traffic_rows().is_empty());
        assert_eq!(stats.snapshot().insert_failures_total, 1);
    }

    #[tokio::test]
    async fn test_fresh_readings_survive_same_cycle_cleanup() {
        let store = Arc::new(MemoryStore::new());
        let source = FixedSource::new(vec![reading(5, Some(22.0))]);
        let shutdown = Shutdown::new();
        let (service, _) = service(&SyncConfig::default(), store.clone(), source, &shutdown);

        let report = service.run_cycle().await;

        assert_eq!(report.purged, 0);
        assert_eq!(store.environment_rows().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_during_warmup_skips_cycles() {
        let store = Arc::new(MemoryStore::new());
        let source = FixedSource::new(vec![reading(1, Some(20.0))]);
        let shutdown = Shutdown::new();
        let cfg = config(Duration::from_secs(60), Duration::from_secs(60));
        let (service, _) = service(&cfg, store.clone(), source.clone(), &shutdown);

        let handle = tokio::spawn(service.run());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sync task did not stop")
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(source.calls(), 0);
        assert!(store.environment_rows().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_during_interval_stops_loop() {
        let store = Arc::new(MemoryStore::new());
        let source = FixedSource::new(vec![reading(1, Some(20.0))]);
        let shutdown = Shutdown::new();
        let cfg = config(Duration::ZERO, Duration::from_secs(60));
        let (service, stats) = service(&cfg, store.clone(), source.clone(), &shutdown);

        let handle = tokio::spawn(service.run());

        let deadline = Instant::now() + Duration::from_secs(2);
        while stats.snapshot().cycles_total == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(stats.snapshot().cycles_total, 1);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sync task did not stop")
            .unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(store.environment_rows().len(), 1);
    }

    #[tokio::test]
    async fn test_loop_repeats_until_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let source = FixedSource::new(vec![reading(1, Some(20.0)), reading(2, Some(20.5))]);
        let shutdown = Shutdown::new();
        let cfg = config(Duration::ZERO, Duration::from_millis(10));
        let (service, stats) = service(&cfg, store.clone(), source.clone(), &shutdown);

        let handle = tokio::spawn(service.run());

        let deadline = Instant::now() + Duration::from_secs(2);
        while stats.snapshot().cycles_total < 3 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.trigger();
        handle.await.unwrap();

        let snapshot = stats.snapshot();
        assert!(snapshot.cycles_total >= 3);
        assert_eq!(snapshot.inserted_total, snapshot.cycles_total * 2);
        assert_eq!(store.environment_rows().len() as u64, snapshot.inserted_total);
    }

    #[tokio::test]
    async fn test_panicking_cycle_does_not_end_loop() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(PanickingSource {
            calls: AtomicUsize::new(0),
        });
        let shutdown = Shutdown::new();
        let cfg = config(Duration::ZERO, Duration::from_millis(10));
        let (service, stats) = service(&cfg, store, source.clone(), &shutdown);

        let handle = tokio::spawn(service.run());

        let deadline = Instant::now() + Duration::from_secs(2);
        while source.calls.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.trigger();
        handle.await.expect("sync task should survive cycle panics");

        assert!(source.calls.load(Ordering::SeqCst) >= 2);
        assert!(stats.snapshot().failed_cycles_total >= 2);
    }

    #[test]
    fn test_panic_message_extracts_payload() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("source exploded");
        assert_eq!(panic_message(&*boxed), "source exploded");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(format!("cycle {}", 3));
        assert_eq!(panic_message(&*boxed), "cycle 3");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }
}
