#![forbid(unsafe_code)]

//! Periodic storage reclamation.
//!
//! Sweeps abandoned session files, expired queue entries and old audit
//! rows, and compacts stores whose freelist ratio crosses the threshold.
//! Everything here is cooperative: files that cannot be opened or parsed
//! are skipped, never force-removed mid-write.

use crate::error::StorageError;
use crate::queue::QueueDirs;
use crate::session::store as session_store;
use crate::support::{file_age_days, list_db_files, now_ms};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tessera_core::SessionStatus;
use time::OffsetDateTime;

#[derive(Clone, Debug)]
pub struct GcConfig {
    pub sessions_dir: PathBuf,
    pub queue: QueueDirs,
    pub content_db_path: PathBuf,
    pub audit_db_path: PathBuf,
    pub interval_hours: u64,
    pub abandoned_days: i64,
    pub merged_days: i64,
    pub failed_archive_days: i64,
    pub audit_retention_days: i64,
    pub vacuum_threshold: u32,
    pub vacuum_start_hour: u8,
    pub vacuum_end_hour: u8,
}

impl GcConfig {
    pub fn new(
        sessions_dir: impl Into<PathBuf>,
        queue: QueueDirs,
        content_db_path: impl Into<PathBuf>,
        audit_db_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            queue,
            content_db_path: content_db_path.into(),
            audit_db_path: audit_db_path.into(),
            interval_hours: 6,
            abandoned_days: 7,
            merged_days: 1,
            failed_archive_days: 30,
            audit_retention_days: 90,
            vacuum_threshold: 20,
            vacuum_start_hour: 2,
            vacuum_end_hour: 5,
        }
    }
}

#[derive(Debug, Default)]
pub struct GcStats {
    pub sessions_cleaned: AtomicU64,
    pub audit_rows_trimmed: AtomicU64,
    pub vacuums_run: AtomicU64,
    pub last_run_ms: AtomicI64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcCycleReport {
    pub abandoned_removed: usize,
    pub merged_removed: usize,
    pub failed_removed: usize,
    pub audit_rows_trimmed: usize,
    pub vacuums_run: usize,
}

pub struct Gc {
    cfg: GcConfig,
    stats: Arc<GcStats>,
}

impl Gc {
    pub fn new(cfg: GcConfig) -> Self {
        Self {
            cfg,
            stats: Arc::new(GcStats::default()),
        }
    }

    pub fn stats_handle(&self) -> Arc<GcStats> {
        self.stats.clone()
    }

    /// One full cycle. Individual task failures are logged and do not
    /// stop the remaining tasks.
    pub fn run_cycle(&self) -> GcCycleReport {
        self.stats.last_run_ms.store(now_ms(), Ordering::Relaxed);
        tracing::info!("gc cycle started");
        let mut report = GcCycleReport::default();

        match self.clean_abandoned_sessions() {
            Ok(count) => report.abandoned_removed = count,
            Err(err) => tracing::error!(error = %err, "clean abandoned sessions"),
        }
        match self.clean_dir_by_age(&self.cfg.queue.done, self.cfg.merged_days) {
            Ok(count) => report.merged_removed = count,
            Err(err) => tracing::error!(error = %err, "clean merged sessions"),
        }
        match self.clean_dir_by_age(&self.cfg.queue.failed, self.cfg.failed_archive_days) {
            Ok(count) => report.failed_removed = count,
            Err(err) => tracing::error!(error = %err, "clean failed sessions"),
        }
        match self.trim_audit() {
            Ok(count) => report.audit_rows_trimmed = count,
            Err(err) => tracing::error!(error = %err, "trim audit logs"),
        }
        if self.in_vacuum_window() {
            report.vacuums_run = self.vacuum_stores();
        }

        self.stats
            .sessions_cleaned
            .fetch_add((report.abandoned_removed + report.merged_removed) as u64, Ordering::Relaxed);
        self.stats
            .audit_rows_trimmed
            .fetch_add(report.audit_rows_trimmed as u64, Ordering::Relaxed);
        self.stats
            .vacuums_run
            .fetch_add(report.vacuums_run as u64, Ordering::Relaxed);

        tracing::info!(
            abandoned = report.abandoned_removed,
            merged = report.merged_removed,
            failed = report.failed_removed,
            audit_rows = report.audit_rows_trimmed,
            vacuums = report.vacuums_run,
            "gc cycle completed"
        );
        report
    }

    /// Session files still marked `active` whose last activity is past
    /// the abandonment horizon.
    fn clean_abandoned_sessions(&self) -> Result<usize, StorageError> {
        let cutoff_ms = now_ms() - self.cfg.abandoned_days * 86_400_000;
        let mut removed = 0;
        for path in list_db_files(&self.cfg.sessions_dir)? {
            let Ok(conn) = session_store::open_session_db_read_only(&path) else {
                continue;
            };
            let Ok(Some(meta)) = session_store::read_meta(&conn) else {
                continue;
            };
            drop(conn);
            if meta.status != SessionStatus::Active.as_str() {
                continue;
            }
            if meta.last_activity_ms >= cutoff_ms {
                continue;
            }
            tracing::info!(file = %path.display(), "removing abandoned session");
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::error!(file = %path.display(), error = %err, "remove abandoned session");
                continue;
            }
            removed += 1;
        }
        Ok(removed)
    }

    fn clean_dir_by_age(&self, dir: &Path, max_age_days: i64) -> Result<usize, StorageError> {
        let now = SystemTime::now();
        let mut removed = 0;
        for path in list_db_files(dir)? {
            let Some(age) = file_age_days(&path, now) else {
                continue;
            };
            if age < max_age_days as f64 {
                continue;
            }
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::error!(file = %path.display(), error = %err, "remove expired session file");
                continue;
            }
            removed += 1;
        }
        Ok(removed)
    }

    fn trim_audit(&self) -> Result<usize, StorageError> {
        let conn = Connection::open(&self.cfg.audit_db_path)?;
        let cutoff_ms = now_ms() - self.cfg.audit_retention_days * 86_400_000;
        let audit_rows = conn.execute(
            "DELETE FROM audit_log WHERE ts_ms < ?1",
            rusqlite::params![cutoff_ms],
        )?;
        let merge_rows = conn.execute(
            "DELETE FROM merge_log WHERE ts_ms < ?1",
            rusqlite::params![cutoff_ms],
        )?;
        Ok(audit_rows + merge_rows)
    }

    fn in_vacuum_window(&self) -> bool {
        let hour = OffsetDateTime::now_utc().hour();
        hour >= self.cfg.vacuum_start_hour && hour < self.cfg.vacuum_end_hour
    }

    fn vacuum_stores(&self) -> usize {
        let mut ran = 0;
        for path in [&self.cfg.content_db_path, &self.cfg.audit_db_path] {
            match self.vacuum_if_needed(path) {
                Ok(true) => ran += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %err, "vacuum store");
                }
            }
        }
        ran
    }

    /// VACUUM only when the freelist ratio crosses the threshold; a full
    /// rewrite of a healthy store is wasted I/O.
    fn vacuum_if_needed(&self, path: &Path) -> Result<bool, StorageError> {
        let conn = Connection::open(path)?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let free_pages: i64 = conn.query_row("PRAGMA freelist_count", [], |row| row.get(0))?;
        if page_count == 0 {
            return Ok(false);
        }
        let ratio = (free_pages * 100 / page_count) as u32;
        if ratio < self.cfg.vacuum_threshold {
            return Ok(false);
        }
        tracing::info!(path = %path.display(), freelist_pct = ratio, "running vacuum");
        conn.execute_batch("VACUUM")?;
        Ok(true)
    }

    /// Spawn the periodic thread; the first cycle runs immediately.
    pub fn start(self) -> GcHandle {
        let (stop_tx, stop_rx) = crossbeam::channel::bounded::<()>(1);
        let stats = self.stats.clone();
        let interval = Duration::from_secs(self.cfg.interval_hours * 3600);
        let join = std::thread::spawn(move || {
            tracing::info!(interval_hours = self.cfg.interval_hours, "gc started");
            self.run_cycle();
            loop {
                let tick = crossbeam::channel::after(interval);
                crossbeam::select! {
                    recv(stop_rx) -> _ => break,
                    recv(tick) -> _ => { self.run_cycle(); }
                }
            }
            tracing::info!("gc stopped");
        });
        GcHandle {
            stop_tx,
            join: Some(join),
            stats,
        }
    }
}

pub struct GcHandle {
    stop_tx: crossbeam::channel::Sender<()>,
    join: Option<std::thread::JoinHandle<()>>,
    stats: Arc<GcStats>,
}

impl GcHandle {
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }
}
