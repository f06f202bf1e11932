#![forbid(unsafe_code)]

//! Periodic store snapshots.
//!
//! Each run writes `<backup-dir>/<YYYYMMDD_HHMMSS>_<name>.db` for every
//! configured store via `VACUUM INTO`, which produces a consistent,
//! compacted copy without blocking readers. Old snapshots are pruned by
//! age and by count.

use crate::error::StorageError;
use crate::support::now_ms;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use time::macros::format_description;
use time::OffsetDateTime;

#[derive(Clone, Debug)]
pub struct BackupStore {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct BackupConfig {
    pub backup_dir: PathBuf,
    pub stores: Vec<BackupStore>,
    pub interval_hours: u64,
    pub retention_days: i64,
    pub max_backups: usize,
}

impl BackupConfig {
    pub fn new(backup_dir: impl Into<PathBuf>, stores: Vec<BackupStore>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            stores,
            interval_hours: 24,
            retention_days: 30,
            max_backups: 10,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BackupInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Default)]
pub struct BackupStats {
    pub runs: AtomicU64,
    pub snapshots_written: AtomicU64,
    pub last_run_ms: AtomicI64,
}

pub struct BackupManager {
    cfg: BackupConfig,
    stats: Arc<BackupStats>,
}

impl BackupManager {
    pub fn new(cfg: BackupConfig) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&cfg.backup_dir)?;
        Ok(Self {
            cfg,
            stats: Arc::new(BackupStats::default()),
        })
    }

    pub fn stats_handle(&self) -> Arc<BackupStats> {
        self.stats.clone()
    }

    /// Snapshot every configured store now. Returns the written paths;
    /// a store that fails to snapshot is logged and skipped.
    pub fn run_now(&self) -> Result<Vec<PathBuf>, StorageError> {
        let stamp = OffsetDateTime::now_utc()
            .format(format_description!(
                "[year][month][day]_[hour][minute][second]"
            ))
            .unwrap_or_else(|_| "00000000_000000".to_string());

        let mut written = Vec::new();
        for store in &self.cfg.stores {
            let target = self
                .cfg
                .backup_dir
                .join(format!("{stamp}_{}.db", store.name));
            match snapshot_store(&store.path, &target) {
                Ok(()) => {
                    tracing::info!(
                        store = %store.name,
                        target = %target.display(),
                        "backup written"
                    );
                    written.push(target);
                }
                Err(err) => {
                    tracing::error!(store = %store.name, error = %err, "backup failed");
                }
            }
        }

        self.prune();
        self.stats.runs.fetch_add(1, Ordering::Relaxed);
        self.stats
            .snapshots_written
            .fetch_add(written.len() as u64, Ordering::Relaxed);
        self.stats.last_run_ms.store(now_ms(), Ordering::Relaxed);
        Ok(written)
    }

    pub fn list_backups(&self) -> Result<Vec<BackupInfo>, StorageError> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.cfg.backup_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || path.extension().map(|e| e != "db").unwrap_or(true) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            out.push(BackupInfo {
                name: name.to_string(),
                path: path.clone(),
                size_bytes,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Retention: drop snapshots past `retention_days`, and keep at most
    /// `max_backups` per store name.
    fn prune(&self) {
        let Ok(backups) = self.list_backups() else {
            return;
        };
        let now = SystemTime::now();

        let mut per_store: std::collections::HashMap<String, Vec<&BackupInfo>> =
            std::collections::HashMap::new();
        for info in &backups {
            // `<stamp>_<name>`; the store name is everything past the stamp.
            let Some((_, store_name)) = info.name.split_once('_').and_then(|(date, rest)| {
                rest.split_once('_').map(|(time, name)| (format!("{date}_{time}"), name))
            }) else {
                continue;
            };
            per_store
                .entry(store_name.to_string())
                .or_default()
                .push(info);
        }

        for (_, mut infos) in per_store {
            // Lexicographic name order is chronological for the stamp format.
            infos.sort_by(|a, b| a.name.cmp(&b.name));
            let excess = infos.len().saturating_sub(self.cfg.max_backups);
            for info in &infos[..excess] {
                if let Err(err) = std::fs::remove_file(&info.path) {
                    tracing::error!(path = %info.path.display(), error = %err, "prune backup");
                }
            }
            for info in &infos[excess..] {
                let age = crate::support::file_age_days(&info.path, now);
                if age.map(|d| d >= self.cfg.retention_days as f64).unwrap_or(false) {
                    if let Err(err) = std::fs::remove_file(&info.path) {
                        tracing::error!(path = %info.path.display(), error = %err, "prune backup");
                    }
                }
            }
        }
    }

    pub fn start(self) -> BackupHandle {
        let (stop_tx, stop_rx) = crossbeam::channel::bounded::<()>(1);
        let stats = self.stats.clone();
        let interval = Duration::from_secs(self.cfg.interval_hours * 3600);
        let join = std::thread::spawn(move || {
            tracing::info!(interval_hours = self.cfg.interval_hours, "backup manager started");
            loop {
                let tick = crossbeam::channel::after(interval);
                crossbeam::select! {
                    recv(stop_rx) -> _ => break,
                    recv(tick) -> _ => {
                        if let Err(err) = self.run_now() {
                            tracing::error!(error = %err, "backup run failed");
                        }
                    }
                }
            }
            tracing::info!("backup manager stopped");
        });
        BackupHandle {
            stop_tx,
            join: Some(join),
            stats,
        }
    }
}

pub struct BackupHandle {
    stop_tx: crossbeam::channel::Sender<()>,
    join: Option<std::thread::JoinHandle<()>>,
    stats: Arc<BackupStats>,
}

impl BackupHandle {
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> &BackupStats {
        &self.stats
    }
}

fn snapshot_store(src: &Path, dst: &Path) -> Result<(), StorageError> {
    let conn = Connection::open(src)?;
    let dst_str = dst.to_string_lossy().to_string();
    conn.execute("VACUUM INTO ?1", rusqlite::params![dst_str])?;
    Ok(())
}
