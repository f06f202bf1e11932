#![forbid(unsafe_code)]

//! Session management: isolated per-user staging stores.
//!
//! Each session is one SQLite file under the sessions directory. Staging
//! operations mutate that file and append to its change journal; nothing
//! here ever writes the canonical store. Submitting renames the file into
//! the queue's `pending/` directory, after which the merger owns it.

pub(crate) mod store;

use crate::catalog::SchemaCatalog;
use crate::content::ContentStore;
use crate::error::StorageError;
use crate::queue::QueueDirs;
use crate::support::{compact_block_json, list_db_files, now_ms};
use rusqlite::OptionalExtension;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tessera_core::{
    ids, BlockDiff, Change, ChangeOp, Conflict, Diff, Ref, RefDiff, SchemaInfo, SessionStatus,
    UserType,
};

use store::{SessionMeta, SOURCE_COPY, SOURCE_NEW};

/// In-memory view of one session. The store of record is the session
/// file's `_session_meta` row; this mirror exists for cheap enumeration.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub user_type: UserType,
    pub created_at_ms: i64,
    pub last_activity_ms: i64,
    pub base_snapshot: String,
    pub schema_version: i64,
    pub schema_hash: String,
    pub status: SessionStatus,
    pub db_path: PathBuf,
}

impl Session {
    fn from_meta(meta: &SessionMeta, db_path: PathBuf) -> Result<Self, StorageError> {
        let status =
            SessionStatus::parse(&meta.status).ok_or_else(|| StorageError::CorruptSession {
                session_id: meta.session_id.clone(),
                reason: format!("unknown status '{}'", meta.status),
            })?;
        let user_type = UserType::parse(&meta.user_type).unwrap_or(UserType::Human);
        Ok(Self {
            id: meta.session_id.clone(),
            user_id: meta.user_id.clone(),
            user_type,
            created_at_ms: meta.created_at_ms,
            last_activity_ms: meta.last_activity_ms,
            base_snapshot: meta.base_snapshot.clone(),
            schema_version: meta.schema_version,
            schema_hash: meta.schema_hash.clone(),
            status,
            db_path,
        })
    }
}

#[derive(Clone, Debug)]
pub struct SessionManagerConfig {
    pub sessions_dir: PathBuf,
    pub content_db_path: PathBuf,
    pub schema_db_path: PathBuf,
    pub queue: QueueDirs,
    pub max_inactive_hours: i64,
}

impl SessionManagerConfig {
    pub fn new(
        sessions_dir: impl Into<PathBuf>,
        content_db_path: impl Into<PathBuf>,
        schema_db_path: impl Into<PathBuf>,
        queue: QueueDirs,
    ) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            content_db_path: content_db_path.into(),
            schema_db_path: schema_db_path.into(),
            queue,
            max_inactive_hours: 24,
        }
    }
}

pub struct SessionManager {
    cfg: SessionManagerConfig,
    content: Mutex<ContentStore>,
    schema: SchemaInfo,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(cfg: SessionManagerConfig) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&cfg.sessions_dir)?;
        cfg.queue.ensure()?;
        let content = ContentStore::open_read_only(&cfg.content_db_path)?;
        let catalog = SchemaCatalog::open_read_only(&cfg.schema_db_path)?;
        let schema = catalog.schema_info()?;

        let manager = Self {
            cfg,
            content: Mutex::new(content),
            schema,
            sessions: RwLock::new(HashMap::new()),
        };
        manager.load_existing_sessions()?;
        Ok(manager)
    }

    pub fn schema_info(&self) -> &SchemaInfo {
        &self.schema
    }

    /// Rebuild the in-memory map from the session files on disk. Files
    /// that cannot be parsed are skipped with a warning; the GC will
    /// reclaim them eventually.
    fn load_existing_sessions(&self) -> Result<(), StorageError> {
        for path in list_db_files(&self.cfg.sessions_dir)? {
            match read_session_at(&path) {
                Ok(session) => {
                    let mut sessions = self.sessions.write().expect("sessions lock");
                    sessions.insert(session.id.clone(), session);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable session file");
                }
            }
        }
        Ok(())
    }

    pub fn create(&self, user_id: &str, user_type: UserType) -> Result<Session, StorageError> {
        let session_id = ids::new_session_id(user_id);
        let db_path = self.cfg.sessions_dir.join(format!("{session_id}.db"));

        let base_snapshot = {
            let content = self.content.lock().expect("content lock");
            content.snapshot_token()?
        };

        let now = now_ms();
        let meta = SessionMeta {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            user_type: user_type.as_str().to_string(),
            created_at_ms: now,
            last_activity_ms: now,
            base_snapshot,
            schema_version: self.schema.version,
            schema_hash: self.schema.hash.clone(),
            status: SessionStatus::Active.as_str().to_string(),
            conflicts: None,
        };

        let result = (|| -> Result<(), StorageError> {
            let conn = store::open_session_db(&db_path)?;
            store::init_session_schema(&conn)?;
            store::insert_meta(&conn, &meta)?;
            Ok(())
        })();
        if let Err(err) = result {
            let _ = std::fs::remove_file(&db_path);
            return Err(err);
        }

        let session = Session::from_meta(&meta, db_path)?;
        self.sessions
            .write()
            .expect("sessions lock")
            .insert(session_id.clone(), session.clone());

        tracing::info!(session_id = %session_id, user_id = %user_id, "created session");
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .expect("sessions lock")
            .get(session_id)
            .cloned()
    }

    /// The user's single active session, or a fresh one.
    pub fn get_or_create(
        &self,
        user_id: &str,
        user_type: UserType,
    ) -> Result<Session, StorageError> {
        {
            let sessions = self.sessions.read().expect("sessions lock");
            if let Some(session) = sessions
                .values()
                .find(|s| s.user_id == user_id && s.status == SessionStatus::Active)
            {
                return Ok(session.clone());
            }
        }
        self.create(user_id, user_type)
    }

    fn active_session(&self, session_id: &str) -> Result<Session, StorageError> {
        let session = self.get(session_id).ok_or_else(|| StorageError::NotFound {
            entity: "session",
            id: session_id.to_string(),
        })?;
        if session.status != SessionStatus::Active {
            return Err(StorageError::NotActive {
                session_id: session_id.to_string(),
                status: session.status.as_str(),
            });
        }
        Ok(session)
    }

    /// Copy a canonical block into the session for editing. Records the
    /// structural dependency (parent + expected hash) used for conflict
    /// detection at merge time.
    pub fn copy_block(
        &self,
        session_id: &str,
        block_id: &str,
    ) -> Result<tessera_core::Block, StorageError> {
        let session = self.active_session(session_id)?;

        let block = {
            let content = self.content.lock().expect("content lock");
            content.get_live_block(block_id)?
        }
        .ok_or_else(|| StorageError::NotFound {
            entity: "block",
            id: block_id.to_string(),
        })?;

        let mut conn = store::open_session_db(&session.db_path)?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO blocks \
             (id, parent_id, type, content, content_html, position, hash, \
              created_at_ms, updated_at_ms, created_by, published, deleted_at_ms, _dirty, _source) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, ?13)",
            rusqlite::params![
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
                block.deleted_at_ms,
                SOURCE_COPY,
            ],
        )?;

        let mut dep = tessera_core::StructuralDep {
            block_id: block.id.clone(),
            ..Default::default()
        };
        if let Some(parent_id) = &block.parent_id {
            dep.depends_on.push(parent_id.clone());
        }
        dep.snapshot_hashes
            .insert(block.id.clone(), block.hash.clone());
        store::upsert_structural_dep_tx(&tx, &dep)?;
        store::touch(&tx, now_ms())?;
        tx.commit()?;

        self.note_activity(session_id);
        Ok(block)
    }

    /// Stage a brand-new block. Assigns an id when empty and stamps
    /// authorship and timestamps; the caller keeps the returned block.
    pub fn insert_block(
        &self,
        session_id: &str,
        mut block: tessera_core::Block,
    ) -> Result<tessera_core::Block, StorageError> {
        let session = self.active_session(session_id)?;

        if block.id.is_empty() {
            block.id = ids::new_block_id();
        }
        if block.position.is_empty() {
            block.position = tessera_core::position::initial();
        }
        block.created_by = session.user_id.clone();
        block.refresh_hash();
        let now = now_ms();
        block.created_at_ms = now;
        block.updated_at_ms = now;

        let after = serde_json::to_string(&block)?;
        let mut conn = store::open_session_db(&session.db_path)?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO blocks \
             (id, parent_id, type, content, content_html, position, hash, \
              created_at_ms, updated_at_ms, created_by, published, _dirty, _source) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1, ?12)",
            rusqlite::params![
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
                SOURCE_NEW,
            ],
        )?;
        store::append_change_tx(&tx, ChangeOp::Insert, &block.id, None, None, Some(&after))?;
        store::touch(&tx, now)?;
        tx.commit()?;

        self.note_activity(session_id);
        Ok(block)
    }

    /// Rewrite a staged block. The previous row state goes into the
    /// journal as the `before` image.
    pub fn update_block(
        &self,
        session_id: &str,
        mut block: tessera_core::Block,
    ) -> Result<tessera_core::Block, StorageError> {
        let session = self.active_session(session_id)?;

        let mut conn = store::open_session_db(&session.db_path)?;
        let current =
            store::get_block(&conn, &block.id)?.ok_or_else(|| StorageError::NotFound {
                entity: "block",
                id: block.id.clone(),
            })?;
        let before = compact_block_json(&current);

        block.refresh_hash();
        let now = now_ms();
        block.updated_at_ms = now;
        let after = serde_json::to_string(&block)?;

        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE blocks SET parent_id = ?1, content = ?2, content_html = ?3, position = ?4, \
             hash = ?5, updated_at_ms = ?6, published = ?7, _dirty = 1 WHERE id = ?8",
            rusqlite::params![
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
        store::append_change_tx(
            &tx,
            ChangeOp::Update,
            &block.id,
            None,
            Some(&before),
            Some(&after),
        )?;
        store::touch(&tx, now)?;
        tx.commit()?;

        self.note_activity(session_id);
        Ok(block)
    }

    /// Soft-delete a staged block.
    pub fn delete_block(&self, session_id: &str, block_id: &str) -> Result<(), StorageError> {
        let session = self.active_session(session_id)?;

        let mut conn = store::open_session_db(&session.db_path)?;
        let current = store::get_block(&conn, block_id)?.ok_or_else(|| StorageError::NotFound {
            entity: "block",
            id: block_id.to_string(),
        })?;
        let before = compact_block_json(&current);

        let now = now_ms();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE blocks SET deleted_at_ms = ?1, _dirty = 1 WHERE id = ?2",
            rusqlite::params![now, block_id],
        )?;
        store::append_change_tx(&tx, ChangeOp::Delete, block_id, None, Some(&before), None)?;
        store::touch(&tx, now)?;
        tx.commit()?;

        self.note_activity(session_id);
        Ok(())
    }

    /// Stage a ref between two blocks.
    pub fn link(&self, session_id: &str, mut reference: Ref) -> Result<Ref, StorageError> {
        let session = self.active_session(session_id)?;
        if reference.from_id.is_empty() || reference.to_id.is_empty() || reference.ref_type.is_empty()
        {
            return Err(StorageError::InvalidInput(
                "link requires from_id, to_id and type",
            ));
        }
        let now = now_ms();
        reference.created_at_ms = now;
        reference.created_by = session.user_id.clone();
        let after = store::ref_json(&reference)?;

        let mut conn = store::open_session_db(&session.db_path)?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO refs (from_id, to_id, type, anchor, created_at_ms, created_by, _dirty) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
            rusqlite::params![
                reference.from_id,
                reference.to_id,
                reference.ref_type,
                reference.anchor,
                reference.created_at_ms,
                reference.created_by,
            ],
        )?;
        store::append_change_tx(
            &tx,
            ChangeOp::Link,
            &reference.from_id,
            None,
            None,
            Some(&after),
        )?;
        store::touch(&tx, now)?;
        tx.commit()?;

        self.note_activity(session_id);
        Ok(reference)
    }

    /// Stage removal of a ref. The ref may exist only in the canonical
    /// store; the journal entry is what the merger applies.
    pub fn unlink(
        &self,
        session_id: &str,
        from_id: &str,
        to_id: &str,
        ref_type: &str,
    ) -> Result<(), StorageError> {
        let session = self.active_session(session_id)?;
        let reference = Ref {
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            ref_type: ref_type.to_string(),
            ..Default::default()
        };
        let before = store::ref_json(&reference)?;

        let now = now_ms();
        let mut conn = store::open_session_db(&session.db_path)?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM refs WHERE from_id = ?1 AND to_id = ?2 AND type = ?3",
            rusqlite::params![from_id, to_id, ref_type],
        )?;
        store::append_change_tx(&tx, ChangeOp::Unlink, from_id, None, Some(&before), None)?;
        store::touch(&tx, now)?;
        tx.commit()?;

        self.note_activity(session_id);
        Ok(())
    }

    /// Stage a typed attribute value. Journaled as an update with the
    /// attr name in `field`, so the merger can target the attrs table.
    pub fn set_attr(
        &self,
        session_id: &str,
        block_id: &str,
        name: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        let session = self.active_session(session_id)?;
        let now = now_ms();
        let mut conn = store::open_session_db(&session.db_path)?;
        let tx = conn.transaction()?;
        let before: Option<String> = tx
            .query_row(
                "SELECT value FROM attrs WHERE block_id = ?1 AND name = ?2",
                rusqlite::params![block_id, name],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;
        tx.execute(
            "INSERT OR REPLACE INTO attrs (block_id, name, value, _dirty) VALUES (?1, ?2, ?3, 1)",
            rusqlite::params![block_id, name, value],
        )?;
        store::append_change_tx(
            &tx,
            ChangeOp::Update,
            block_id,
            Some(name),
            before.as_deref(),
            Some(value),
        )?;
        store::touch(&tx, now)?;
        tx.commit()?;

        self.note_activity(session_id);
        Ok(())
    }

    pub fn delete_attr(
        &self,
        session_id: &str,
        block_id: &str,
        name: &str,
    ) -> Result<(), StorageError> {
        let session = self.active_session(session_id)?;
        let now = now_ms();
        let mut conn = store::open_session_db(&session.db_path)?;
        let tx = conn.transaction()?;
        let before: Option<String> = tx
            .query_row(
                "SELECT value FROM attrs WHERE block_id = ?1 AND name = ?2",
                rusqlite::params![block_id, name],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;
        tx.execute(
            "DELETE FROM attrs WHERE block_id = ?1 AND name = ?2",
            rusqlite::params![block_id, name],
        )?;
        store::append_change_tx(
            &tx,
            ChangeOp::Update,
            block_id,
            Some(name),
            before.as_deref(),
            None,
        )?;
        store::touch(&tx, now)?;
        tx.commit()?;

        self.note_activity(session_id);
        Ok(())
    }

    /// Hand the session to the merger. The status flip is persisted in
    /// the session store first, then the file is renamed into `pending/`;
    /// once the rename lands the submission is durable.
    pub fn submit(&self, session_id: &str) -> Result<(), StorageError> {
        let session = self.active_session(session_id)?;

        // A session carrying a schema newer than the canonical one can
        // never merge; reject before anything reaches the queue.
        if session.schema_version > self.schema.version {
            return Err(StorageError::SchemaMismatch {
                session_version: session.schema_version,
                current_version: self.schema.version,
            });
        }

        {
            let conn = store::open_session_db(&session.db_path)?;
            store::set_status(&conn, SessionStatus::Submitted.as_str())?;
            store::touch(&conn, now_ms())?;
        }

        let pending_path = self
            .cfg
            .queue
            .pending
            .join(format!("{session_id}.db"));
        std::fs::rename(&session.db_path, &pending_path)?;

        let mut sessions = self.sessions.write().expect("sessions lock");
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.status = SessionStatus::Submitted;
            entry.db_path = pending_path;
        }

        tracing::info!(session_id = %session_id, "submitted session");
        Ok(())
    }

    pub fn abandon(&self, session_id: &str) -> Result<(), StorageError> {
        let session = self.get(session_id).ok_or_else(|| StorageError::NotFound {
            entity: "session",
            id: session_id.to_string(),
        })?;
        if session.status.is_terminal() {
            return Err(StorageError::NotActive {
                session_id: session_id.to_string(),
                status: session.status.as_str(),
            });
        }

        let path = self
            .locate_session_file(session_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "session file",
                id: session_id.to_string(),
            })?;
        let conn = store::open_session_db(&path)?;
        store::set_status(&conn, SessionStatus::Abandoned.as_str())?;

        let mut sessions = self.sessions.write().expect("sessions lock");
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.status = SessionStatus::Abandoned;
        }
        tracing::info!(session_id = %session_id, "abandoned session");
        Ok(())
    }

    /// Differences between the session store and the canonical store.
    pub fn get_diff(&self, session_id: &str) -> Result<Diff, StorageError> {
        let session = self.get(session_id).ok_or_else(|| StorageError::NotFound {
            entity: "session",
            id: session_id.to_string(),
        })?;
        let conn = store::open_session_db_read_only(&session.db_path)?;

        let mut diff = Diff {
            session_id: session_id.to_string(),
            ..Default::default()
        };

        for (block, source) in store::dirty_blocks(&conn)? {
            if block.deleted_at_ms.is_some() {
                diff.deletes.push(BlockDiff {
                    block_id: block.id.clone(),
                    block_type: block.block_type.clone(),
                    before: Some(block),
                    after: None,
                });
            } else if source == SOURCE_NEW {
                diff.inserts.push(BlockDiff {
                    block_id: block.id.clone(),
                    block_type: block.block_type.clone(),
                    before: None,
                    after: Some(block),
                });
            } else {
                let before = {
                    let content = self.content.lock().expect("content lock");
                    content.get_block(&block.id)?
                };
                diff.updates.push(BlockDiff {
                    block_id: block.id.clone(),
                    block_type: block.block_type.clone(),
                    before,
                    after: Some(block),
                });
            }
        }

        for change in store::unmerged_changes(&conn)? {
            let Change {
                op, before, after, ..
            } = change;
            let payload = match op {
                ChangeOp::Link => after,
                ChangeOp::Unlink => before,
                _ => continue,
            };
            let Some(payload) = payload else { continue };
            if let Ok(reference) = serde_json::from_str::<Ref>(&payload) {
                diff.ref_changes.push(RefDiff { op, reference });
            }
        }

        Ok(diff)
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        self.sessions
            .read()
            .expect("sessions lock")
            .values()
            .cloned()
            .collect()
    }

    pub fn list_sessions_by_user(&self, user_id: &str) -> Vec<Session> {
        self.sessions
            .read()
            .expect("sessions lock")
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Re-read the session's status from wherever its file currently
    /// lives (sessions dir or one of the queue dirs). This is how a
    /// caller observes the merge outcome.
    pub fn refresh(&self, session_id: &str) -> Result<Session, StorageError> {
        let path = self
            .locate_session_file(session_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "session file",
                id: session_id.to_string(),
            })?;
        let session = read_session_at(&path)?;
        self.sessions
            .write()
            .expect("sessions lock")
            .insert(session_id.to_string(), session.clone());
        Ok(session)
    }

    /// The conflict list the merger persisted, if any.
    pub fn conflicts(&self, session_id: &str) -> Result<Vec<Conflict>, StorageError> {
        let path = self
            .locate_session_file(session_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "session file",
                id: session_id.to_string(),
            })?;
        let conn = store::open_session_db_read_only(&path)?;
        let meta = store::read_meta(&conn)?.ok_or_else(|| StorageError::CorruptSession {
            session_id: session_id.to_string(),
            reason: "missing _session_meta".to_string(),
        })?;
        match meta.conflicts {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// Bring a resolved session home: move its file from the queue's
    /// failed directory back under the sessions directory and mark it
    /// active so it can be staged against and resubmitted.
    pub fn reactivate(&self, session_id: &str) -> Result<Session, StorageError> {
        let path = self
            .locate_session_file(session_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "session file",
                id: session_id.to_string(),
            })?;
        {
            let conn = store::open_session_db(&path)?;
            store::set_status(&conn, SessionStatus::Active.as_str())?;
            store::touch(&conn, now_ms())?;
        }
        let home = self.cfg.sessions_dir.join(format!("{session_id}.db"));
        if path != home {
            std::fs::rename(&path, &home)?;
        }
        let session = read_session_at(&home)?;
        self.sessions
            .write()
            .expect("sessions lock")
            .insert(session_id.to_string(), session.clone());
        tracing::info!(session_id = %session_id, "reactivated session");
        Ok(session)
    }

    /// The session file's current location across the lifecycle dirs.
    pub fn locate_session_file(&self, session_id: &str) -> Option<PathBuf> {
        let name = format!("{session_id}.db");
        let mut candidates = vec![self.cfg.sessions_dir.join(&name)];
        for dir in self.cfg.queue.all() {
            candidates.push(dir.join(&name));
        }
        candidates.into_iter().find(|p| p.exists())
    }

    fn note_activity(&self, session_id: &str) {
        let mut sessions = self.sessions.write().expect("sessions lock");
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.last_activity_ms = now_ms();
        }
    }
}

fn read_session_at(path: &Path) -> Result<Session, StorageError> {
    let conn = store::open_session_db_read_only(path)?;
    let meta = store::read_meta(&conn)?.ok_or_else(|| StorageError::CorruptSession {
        session_id: path.display().to_string(),
        reason: "missing _session_meta".to_string(),
    })?;
    Session::from_meta(&meta, path.to_path_buf())
}
