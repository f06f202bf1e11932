#![forbid(unsafe_code)]

//! The merger daemon: the only writer on the canonical store.
//!
//! Submitted session files are claimed out of `pending/` by rename,
//! validated against the canonical state, and applied in one transaction.
//! A session either merges completely or not at all; the file ends up in
//! `done/` or `failed/` and the outcome is recorded in the merge log.

use crate::audit::{AuditConfig, AuditLog, MergeLogEntry};
use crate::cache::PageCache;
use crate::catalog::SchemaCatalog;
use crate::content::{block_from_row, ContentStore, BLOCK_COLUMNS};
use crate::error::StorageError;
use crate::queue::QueueDirs;
use crate::session::store as session_store;
use crate::support::now_ms;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_core::{Block, ChangeOp, Conflict, ConflictKind, Ref, SessionStatus};

#[derive(Clone, Debug)]
pub struct MergerConfig {
    pub content_db_path: PathBuf,
    pub schema_db_path: PathBuf,
    pub audit_db_path: PathBuf,
    pub queue: QueueDirs,
    pub poll_interval_ms: u64,
    pub max_retries: u32,
    pub lock_timeout_ms: u64,
    pub recover_on_startup: bool,
}

impl MergerConfig {
    pub fn new(
        content_db_path: impl Into<PathBuf>,
        schema_db_path: impl Into<PathBuf>,
        audit_db_path: impl Into<PathBuf>,
        queue: QueueDirs,
    ) -> Self {
        Self {
            content_db_path: content_db_path.into(),
            schema_db_path: schema_db_path.into(),
            audit_db_path: audit_db_path.into(),
            queue,
            poll_interval_ms: 500,
            max_retries: 3,
            lock_timeout_ms: 30_000,
            recover_on_startup: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub inserted: i64,
    pub updated: i64,
    pub deleted: i64,
    pub linked: i64,
    pub unlinked: i64,
}

#[derive(Debug, Default)]
pub struct MergerStats {
    pub merges_total: AtomicU64,
    pub merges_success: AtomicU64,
    pub merges_failed: AtomicU64,
    pub merges_conflict: AtomicU64,
    pub last_merge_ms: AtomicI64,
}

#[derive(Clone, Debug, Default)]
pub struct MergerHealth {
    pub running: bool,
    pub queue_pending: usize,
    pub queue_processing: usize,
    pub queue_failed: usize,
    pub merges_total: u64,
    pub merges_success: u64,
    pub merges_failed: u64,
    pub merges_conflict: u64,
    pub last_merge_ms: i64,
}

pub(crate) fn queue_depths(queue: &QueueDirs) -> (usize, usize, usize) {
    let count = |dir: &Path| {
        crate::support::list_db_files(dir)
            .map(|files| files.len())
            .unwrap_or(0)
    };
    (
        count(&queue.pending),
        count(&queue.processing),
        count(&queue.failed),
    )
}

/// Per-change audit material gathered while the transaction is open and
/// flushed after commit.
enum AuditPrep {
    Insert { block: Block },
    Update { before: Block, after: Block },
    Delete { before: Block },
    Field {
        block_id: String,
        field: String,
        before: Option<String>,
        after: Option<String>,
    },
}

pub struct Merger {
    cfg: MergerConfig,
    content: ContentStore,
    catalog: SchemaCatalog,
    audit: AuditLog,
    cache: Option<Arc<PageCache>>,
    stats: Arc<MergerStats>,
}

impl Merger {
    pub fn new(cfg: MergerConfig) -> Result<Self, StorageError> {
        Self::with_audit_config(cfg, AuditConfig::default())
    }

    pub fn with_audit_config(
        cfg: MergerConfig,
        audit_cfg: AuditConfig,
    ) -> Result<Self, StorageError> {
        cfg.queue.ensure()?;
        let content = ContentStore::open(&cfg.content_db_path)?;
        content
            .conn()
            .busy_timeout(Duration::from_millis(cfg.lock_timeout_ms))?;
        let catalog = SchemaCatalog::open_read_only(&cfg.schema_db_path)?;
        let audit = AuditLog::open(&cfg.audit_db_path, audit_cfg)?;

        let merger = Self {
            cfg,
            content,
            catalog,
            audit,
            cache: None,
            stats: Arc::new(MergerStats::default()),
        };
        if merger.cfg.recover_on_startup {
            merger.recover_processing()?;
        }
        Ok(merger)
    }

    pub fn with_cache(mut self, cache: Arc<PageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn stats_handle(&self) -> Arc<MergerStats> {
        self.stats.clone()
    }

    /// A file still in `processing/` at boot means a previous merger died
    /// mid-flight; whether its transaction committed is unknowable from
    /// here, so the file goes to `failed/` for operator reconciliation.
    fn recover_processing(&self) -> Result<(), StorageError> {
        for path in crate::support::list_db_files(&self.cfg.queue.processing)? {
            tracing::warn!(file = %path.display(), "recovering interrupted session");
            self.move_to_failed(&path, "interrupted");
        }
        Ok(())
    }

    /// Drain everything currently in `pending/`, oldest first. Returns
    /// how many files were picked up.
    pub fn run_sweep(&mut self) -> Result<usize, StorageError> {
        let files = crate::support::list_db_files(&self.cfg.queue.pending)?;
        let mut processed = 0;
        for path in &files {
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let filename = filename.to_string();
            processed += 1;
            if let Err(err) = self.process_file(&filename) {
                tracing::error!(file = %filename, error = %err, "merge failed");
            }
        }
        Ok(processed)
    }

    /// One session file, end to end. The claim rename makes this safe to
    /// call even if the file was already taken.
    fn process_file(&mut self, filename: &str) -> Result<(), StorageError> {
        let started = Instant::now();
        let pending_path = self.cfg.queue.pending.join(filename);
        let processing_path = self.cfg.queue.processing.join(filename);

        match std::fs::rename(&pending_path, &processing_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        self.stats.merges_total.fetch_add(1, Ordering::Relaxed);

        let session_id = filename.trim_end_matches(".db").to_string();
        let session_conn = match session_store::open_session_db(&processing_path) {
            Ok(conn) => conn,
            Err(err) => {
                self.finish_failed(&processing_path, &session_id, "", "open/meta", started);
                return Err(err);
            }
        };
        let meta = match session_store::read_meta(&session_conn) {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                drop(session_conn);
                self.finish_failed(&processing_path, &session_id, "", "open/meta", started);
                return Err(StorageError::CorruptSession {
                    session_id,
                    reason: "missing _session_meta".to_string(),
                });
            }
            Err(err) => {
                drop(session_conn);
                self.finish_failed(&processing_path, &session_id, "", "open/meta", started);
                return Err(err);
            }
        };

        let conflicts = match self.validate(&session_conn, meta.schema_version) {
            Ok(conflicts) => conflicts,
            Err(err) => {
                let reason = err.to_string();
                drop(session_conn);
                self.finish_failed(&processing_path, &meta.session_id, &meta.user_id, &reason, started);
                return Err(err);
            }
        };

        if !conflicts.is_empty() {
            let conflicts_json = serde_json::to_string(&conflicts)?;
            session_store::set_conflicts(&session_conn, &conflicts_json)?;
            session_store::set_status(&session_conn, SessionStatus::Conflict.as_str())?;
            drop(session_conn);
            self.move_to_failed(&processing_path, "conflicts detected");
            self.log_merge_outcome(
                &meta.session_id,
                &meta.user_id,
                "conflict",
                MergeCounts::default(),
                started,
                Some(format!("{} conflicts detected", conflicts.len())),
            );
            self.stats.merges_conflict.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                session_id = %meta.session_id,
                conflicts = conflicts.len(),
                "session has conflicts"
            );
            return Ok(());
        }

        // Lock contention against readers is retried before the session
        // is declared failed.
        let mut attempt = 0;
        let apply_result = loop {
            match self.apply_changes(&session_conn) {
                Err(err) if err.is_transient() && attempt < self.cfg.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        session_id = %meta.session_id,
                        attempt,
                        error = %err,
                        "transient merge error, retrying"
                    );
                    std::thread::sleep(Duration::from_millis(50 * u64::from(attempt)));
                }
                other => break other,
            }
        };

        match apply_result {
            Ok((counts, touched, audit_entries)) => {
                session_store::mark_changes_merged(&session_conn)?;
                session_store::set_status(&session_conn, SessionStatus::Merged.as_str())?;
                drop(session_conn);

                self.flush_audit(&meta.session_id, &meta.user_id, &meta.user_type, audit_entries);
                self.log_merge_outcome(
                    &meta.session_id,
                    &meta.user_id,
                    "success",
                    counts,
                    started,
                    None,
                );
                if let Some(cache) = &self.cache {
                    let ids: Vec<&str> = touched.iter().map(String::as_str).collect();
                    cache.invalidate_blocks(&ids);
                }

                let done_path = self.cfg.queue.done.join(filename);
                if let Err(err) = std::fs::rename(&processing_path, &done_path) {
                    tracing::error!(file = %filename, error = %err, "move to done failed");
                }

                self.stats.merges_success.fetch_add(1, Ordering::Relaxed);
                self.stats.last_merge_ms.store(now_ms(), Ordering::Relaxed);
                tracing::info!(
                    session_id = %meta.session_id,
                    inserted = counts.inserted,
                    updated = counts.updated,
                    deleted = counts.deleted,
                    duration_ms = started.elapsed().as_millis() as i64,
                    "merge completed"
                );
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                drop(session_conn);
                self.finish_failed(&processing_path, &meta.session_id, &meta.user_id, &reason, started);
                Err(err)
            }
        }
    }

    fn finish_failed(
        &self,
        processing_path: &Path,
        session_id: &str,
        user_id: &str,
        reason: &str,
        started: Instant,
    ) {
        self.move_to_failed(processing_path, reason);
        self.log_merge_outcome(
            session_id,
            user_id,
            "failed",
            MergeCounts::default(),
            started,
            Some(reason.to_string()),
        );
        self.stats.merges_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn move_to_failed(&self, path: &Path, reason: &str) {
        let Some(filename) = path.file_name() else {
            return;
        };
        let dst = self.cfg.queue.failed.join(filename);
        if let Err(err) = std::fs::rename(path, &dst) {
            tracing::error!(path = %path.display(), error = %err, "move to failed");
        }
        tracing::warn!(file = %dst.display(), reason = %reason, "session moved to failed");
    }

    fn log_merge_outcome(
        &self,
        session_id: &str,
        user_id: &str,
        status: &str,
        counts: MergeCounts,
        started: Instant,
        error_message: Option<String>,
    ) {
        let entry = MergeLogEntry {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            status: status.to_string(),
            blocks_inserted: counts.inserted,
            blocks_updated: counts.updated,
            blocks_deleted: counts.deleted,
            refs_linked: counts.linked,
            refs_unlinked: counts.unlinked,
            duration_ms: started.elapsed().as_millis() as i64,
            error_message,
        };
        if let Err(err) = self.audit.log_merge(&entry) {
            tracing::error!(error = %err, "log merge failed");
        }
    }

    fn flush_audit(
        &self,
        session_id: &str,
        user_id: &str,
        user_type: &str,
        entries: Vec<AuditPrep>,
    ) {
        for prep in entries {
            let result = match prep {
                AuditPrep::Insert { block } => {
                    self.audit.log_insert(session_id, user_id, user_type, &block)
                }
                AuditPrep::Update { before, after } => self
                    .audit
                    .log_update(session_id, user_id, user_type, &before, &after),
                AuditPrep::Delete { before } => {
                    self.audit.log_delete(session_id, user_id, user_type, &before)
                }
                AuditPrep::Field {
                    block_id,
                    field,
                    before,
                    after,
                } => self.audit.log_field_update(
                    session_id,
                    user_id,
                    user_type,
                    &block_id,
                    &field,
                    before.as_deref(),
                    after.as_deref(),
                ),
            };
            if let Err(err) = result {
                tracing::error!(error = %err, "audit write failed");
            }
        }
    }

    /// Validation per the submit contract: schema version, structural
    /// dependency hashes, and parent liveness (including deletes that
    /// would orphan live children).
    fn validate(
        &self,
        session: &Connection,
        session_schema_version: i64,
    ) -> Result<Vec<Conflict>, StorageError> {
        let current = self.catalog.schema_info()?;
        if session_schema_version > current.version {
            return Err(StorageError::SchemaMismatch {
                session_version: session_schema_version,
                current_version: current.version,
            });
        }

        let mut conflicts = Vec::new();

        for dep in session_store::structural_deps(session)? {
            for (dep_id, expected_hash) in &dep.snapshot_hashes {
                match self.content.get_block(dep_id)? {
                    None => conflicts.push(Conflict {
                        block_id: dep_id.clone(),
                        kind: ConflictKind::Deleted,
                        message: "block was deleted in the canonical store".to_string(),
                    }),
                    Some(block) if block.is_deleted() => conflicts.push(Conflict {
                        block_id: dep_id.clone(),
                        kind: ConflictKind::Deleted,
                        message: "block was deleted in the canonical store".to_string(),
                    }),
                    Some(block) if &block.hash != expected_hash => conflicts.push(Conflict {
                        block_id: dep_id.clone(),
                        kind: ConflictKind::Content,
                        message: format!(
                            "hash mismatch: expected {expected_hash}, got {}",
                            block.hash
                        ),
                    }),
                    Some(_) => {}
                }
            }
        }

        let dirty = session_store::dirty_blocks(session)?;
        let deleted_in_session: HashSet<&str> = dirty
            .iter()
            .filter(|(block, _)| block.is_deleted())
            .map(|(block, _)| block.id.as_str())
            .collect();

        for (block, _) in &dirty {
            if block.is_deleted() {
                continue;
            }
            let Some(parent_id) = &block.parent_id else {
                continue;
            };
            if deleted_in_session.contains(parent_id.as_str()) {
                conflicts.push(Conflict {
                    block_id: block.id.clone(),
                    kind: ConflictKind::Structure,
                    message: format!("parent {parent_id} is deleted in this session"),
                });
                continue;
            }
            if self.content.get_live_block(parent_id)?.is_some() {
                continue;
            }
            let new_in_session = session_store::block_source(session, parent_id)?
                .map(|source| source == session_store::SOURCE_NEW)
                .unwrap_or(false);
            if !new_in_session {
                conflicts.push(Conflict {
                    block_id: block.id.clone(),
                    kind: ConflictKind::Structure,
                    message: format!("parent {parent_id} does not exist"),
                });
            }
        }

        // Deleting a block must not orphan children that survive the merge.
        for (block, _) in &dirty {
            if !block.is_deleted() {
                continue;
            }
            for child in self.content.get_children(&block.id)? {
                if deleted_in_session.contains(child.id.as_str()) {
                    continue;
                }
                // A staged re-parent or delete of the child clears it.
                if let Some(staged) = session_store::get_block(session, &child.id)? {
                    if staged.is_deleted() || staged.parent_id.as_deref() != Some(block.id.as_str())
                    {
                        continue;
                    }
                }
                conflicts.push(Conflict {
                    block_id: block.id.clone(),
                    kind: ConflictKind::Structure,
                    message: format!("block still has live child {}", child.id),
                });
                break;
            }
        }

        Ok(conflicts)
    }

    /// Replay the journal onto the canonical store in one transaction.
    fn apply_changes(
        &mut self,
        session: &Connection,
    ) -> Result<(MergeCounts, Vec<String>, Vec<AuditPrep>), StorageError> {
        let changes = session_store::unmerged_changes(session)?;
        let mut counts = MergeCounts::default();
        let mut touched: Vec<String> = Vec::new();
        let mut audit_entries: Vec<AuditPrep> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut touch = |touched: &mut Vec<String>, seen: &mut HashSet<String>, id: &str| {
            if seen.insert(id.to_string()) {
                touched.push(id.to_string());
            }
        };

        let tx = self.content.transaction()?;
        for change in &changes {
            match change.op {
                ChangeOp::Insert => {
                    let block = session_store::get_block(session, &change.block_id)?.ok_or(
                        StorageError::CorruptSession {
                            session_id: String::new(),
                            reason: format!("journal insert for missing row {}", change.block_id),
                        },
                    )?;
                    apply_insert(&tx, &block)?;
                    counts.inserted += 1;
                    touch(&mut touched, &mut seen, &block.id);
                    audit_entries.push(AuditPrep::Insert { block });
                }
                ChangeOp::Update => {
                    if let Some(field) = &change.field {
                        apply_attr_update(&tx, &change.block_id, field, change.after.as_deref())?;
                        counts.updated += 1;
                        touch(&mut touched, &mut seen, &change.block_id);
                        audit_entries.push(AuditPrep::Field {
                            block_id: change.block_id.clone(),
                            field: field.clone(),
                            before: change.before.clone(),
                            after: change.after.clone(),
                        });
                        continue;
                    }
                    let after = session_store::get_block(session, &change.block_id)?.ok_or(
                        StorageError::CorruptSession {
                            session_id: String::new(),
                            reason: format!("journal update for missing row {}", change.block_id),
                        },
                    )?;
                    let before = canonical_block_tx(&tx, &change.block_id)?;
                    // A no-op update (nothing user-visible changed) must
                    // not bump the canonical row's updated_at.
                    if let Some(before_block) = &before {
                        if is_noop_update(before_block, &after) {
                            continue;
                        }
                    }
                    apply_update(&tx, &after)?;
                    counts.updated += 1;
                    touch(&mut touched, &mut seen, &after.id);
                    if let Some(before) = before {
                        audit_entries.push(AuditPrep::Update { before, after });
                    }
                }
                ChangeOp::Delete => {
                    let before = canonical_block_tx(&tx, &change.block_id)?;
                    apply_delete(&tx, &change.block_id)?;
                    counts.deleted += 1;
                    touch(&mut touched, &mut seen, &change.block_id);
                    if let Some(before) = before {
                        audit_entries.push(AuditPrep::Delete { before });
                    }
                }
                ChangeOp::Link => {
                    let Some(payload) = &change.after else { continue };
                    let reference: Ref = serde_json::from_str(payload)?;
                    apply_link(&tx, &reference)?;
                    counts.linked += 1;
                    touch(&mut touched, &mut seen, &reference.from_id);
                    touch(&mut touched, &mut seen, &reference.to_id);
                }
                ChangeOp::Unlink => {
                    let Some(payload) = &change.before else { continue };
                    let reference: Ref = serde_json::from_str(payload)?;
                    apply_unlink(&tx, &reference)?;
                    counts.unlinked += 1;
                    touch(&mut touched, &mut seen, &reference.from_id);
                    touch(&mut touched, &mut seen, &reference.to_id);
                }
            }
        }
        tx.commit()?;

        Ok((counts, touched, audit_entries))
    }

    /// Single-step drive for tests and the operator tool: one sweep now,
    /// no daemon thread.
    pub fn run_once(&mut self) -> Result<usize, StorageError> {
        self.run_sweep()
    }

    /// Spawn the polling thread. The handle stops it cooperatively: the
    /// sweep in flight finishes before the thread exits.
    pub fn start(mut self) -> MergerHandle {
        let (stop_tx, stop_rx) = crossbeam::channel::bounded::<()>(1);
        let stats = self.stats.clone();
        let queue = self.cfg.queue.clone();
        let poll = Duration::from_millis(self.cfg.poll_interval_ms);
        let join = std::thread::spawn(move || {
            tracing::info!("merger started");
            loop {
                let tick = crossbeam::channel::after(poll);
                crossbeam::select! {
                    recv(stop_rx) -> _ => break,
                    recv(tick) -> _ => {
                        if let Err(err) = self.run_sweep() {
                            tracing::error!(error = %err, "merge sweep failed");
                        }
                    }
                }
            }
            tracing::info!("merger stopped");
        });
        MergerHandle {
            stop_tx,
            join: Some(join),
            stats,
            queue,
        }
    }
}

pub struct MergerHandle {
    stop_tx: crossbeam::channel::Sender<()>,
    join: Option<std::thread::JoinHandle<()>>,
    stats: Arc<MergerStats>,
    queue: QueueDirs,
}

impl MergerHandle {
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> &MergerStats {
        &self.stats
    }

    pub fn health(&self) -> MergerHealth {
        let (pending, processing, failed) = queue_depths(&self.queue);
        MergerHealth {
            running: self.join.is_some(),
            queue_pending: pending,
            queue_processing: processing,
            queue_failed: failed,
            merges_total: self.stats.merges_total.load(Ordering::Relaxed),
            merges_success: self.stats.merges_success.load(Ordering::Relaxed),
            merges_failed: self.stats.merges_failed.load(Ordering::Relaxed),
            merges_conflict: self.stats.merges_conflict.load(Ordering::Relaxed),
            last_merge_ms: self.stats.last_merge_ms.load(Ordering::Relaxed),
        }
    }
}

fn is_noop_update(before: &Block, after: &Block) -> bool {
    before.hash == after.hash
        && before.parent_id == after.parent_id
        && before.position == after.position
        && before.content_html == after.content_html
        && before.published == after.published
}

fn canonical_block_tx(tx: &Transaction<'_>, id: &str) -> Result<Option<Block>, StorageError> {
    Ok(tx
        .query_row(
            &format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE id=?1"),
            params![id],
            block_from_row,
        )
        .optional()?)
}

/// Full-row insert. `INSERT OR REPLACE` so that a `recreate` resolution
/// can resurrect a soft-deleted row; the new row starts live.
fn apply_insert(tx: &Transaction<'_>, block: &Block) -> Result<(), StorageError> {
    tx.execute(
        "INSERT OR REPLACE INTO blocks \
         (id, parent_id, type, content, content_html, position, hash, \
          created_at_ms, updated_at_ms, created_by, published, deleted_at_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL)",
        params![
            block.id,
            block.parent_id,
            block.block_type,
            block.content,
            block.content_html,
            block.position,
            block.hash,
            block.created_at_ms,
            block.updated_at_ms,
            block.created_by,
            block.published as i64,
        ],
    )?;
    Ok(())
}

fn apply_update(tx: &Transaction<'_>, block: &Block) -> Result<(), StorageError> {
    tx.execute(
        "UPDATE blocks SET parent_id = ?1, content = ?2, content_html = ?3, position = ?4, \
         hash = ?5, updated_at_ms = ?6, published = ?7 WHERE id = ?8",
        params![
            block.parent_id,
            block.content,
            block.content_html,
            block.position,
            block.hash,
            block.updated_at_ms,
            block.published as i64,
            block.id,
        ],
    )?;
    Ok(())
}

fn apply_delete(tx: &Transaction<'_>, block_id: &str) -> Result<(), StorageError> {
    let now = now_ms();
    tx.execute(
        "UPDATE blocks SET deleted_at_ms = ?1, updated_at_ms = ?1 WHERE id = ?2",
        params![now, block_id],
    )?;
    Ok(())
}

fn apply_attr_update(
    tx: &Transaction<'_>,
    block_id: &str,
    name: &str,
    value: Option<&str>,
) -> Result<(), StorageError> {
    match value {
        Some(value) => {
            tx.execute(
                "INSERT OR REPLACE INTO attrs (block_id, name, value) VALUES (?1, ?2, ?3)",
                params![block_id, name, value],
            )?;
        }
        None => {
            tx.execute(
                "DELETE FROM attrs WHERE block_id = ?1 AND name = ?2",
                params![block_id, name],
            )?;
        }
    }
    Ok(())
}

fn apply_link(tx: &Transaction<'_>, reference: &Ref) -> Result<(), StorageError> {
    tx.execute(
        "INSERT OR REPLACE INTO refs (from_id, to_id, type, anchor, created_at_ms, created_by) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            reference.from_id,
            reference.to_id,
            reference.ref_type,
            reference.anchor,
            reference.created_at_ms,
            reference.created_by,
        ],
    )?;
    Ok(())
}

fn apply_unlink(tx: &Transaction<'_>, reference: &Ref) -> Result<(), StorageError> {
    tx.execute(
        "DELETE FROM refs WHERE from_id = ?1 AND to_id = ?2 AND type = ?3",
        params![reference.from_id, reference.to_id, reference.ref_type],
    )?;
    Ok(())
}
