#![forbid(unsafe_code)]

//! Audit sink on the audit store.
//!
//! One row per applied block operation plus one `merge_log` row per merge
//! attempt. Block content is elided unless the block type is on the
//! allow-list (or content storage is switched on wholesale): the audit
//! trail outlives the content retention users expect for prose.

use crate::error::StorageError;
use crate::support::{audit_schema_sql, now_ms, WAL_PRAGMAS};
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use tessera_core::Block;

#[derive(Clone, Debug)]
pub struct AuditConfig {
    pub store_content: bool,
    pub store_content_types: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            store_content: false,
            store_content_types: vec![
                "code".to_string(),
                "definition".to_string(),
                "procedure".to_string(),
            ],
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AuditEntry {
    pub id: i64,
    pub ts_ms: i64,
    pub user_id: String,
    pub user_type: String,
    pub session_id: Option<String>,
    pub operation: String,
    pub block_id: String,
    pub block_type: String,
    pub before_hash: Option<String>,
    pub after_hash: Option<String>,
    pub before_content: Option<String>,
    pub after_content: Option<String>,
    pub diff: Option<String>,
    pub metadata: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct MergeLogEntry {
    pub session_id: String,
    pub user_id: String,
    pub status: String,
    pub blocks_inserted: i64,
    pub blocks_updated: i64,
    pub blocks_deleted: i64,
    pub refs_linked: i64,
    pub refs_unlinked: i64,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct AuditQuery {
    pub block_id: Option<String>,
    pub user_id: Option<String>,
    pub operation: Option<String>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Clone, Debug, Default)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub total_count: usize,
    pub has_more: bool,
}

#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    conn: Connection,
    cfg: AuditConfig,
}

impl AuditLog {
    pub fn open(path: impl AsRef<Path>, cfg: AuditConfig) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.execute_batch(WAL_PRAGMAS)?;
        conn.execute_batch(&audit_schema_sql())?;
        Ok(Self { path, conn, cfg })
    }

    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            path,
            conn,
            cfg: AuditConfig::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn keeps_content_for(&self, block_type: &str) -> bool {
        self.cfg.store_content || self.cfg.store_content_types.iter().any(|t| t == block_type)
    }

    fn write_entry(&self, entry: &AuditEntry) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO audit_log \
             (ts_ms, user_id, user_type, session_id, operation, block_id, block_type, \
              before_hash, after_hash, before_content, after_content, diff, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                entry.ts_ms,
                entry.user_id,
                entry.user_type,
                entry.session_id,
                entry.operation,
                entry.block_id,
                entry.block_type,
                entry.before_hash,
                entry.after_hash,
                entry.before_content,
                entry.after_content,
                entry.diff,
                entry.metadata,
            ],
        )?;
        Ok(())
    }

    pub fn log_insert(
        &self,
        session_id: &str,
        user_id: &str,
        user_type: &str,
        block: &Block,
    ) -> Result<(), StorageError> {
        let keep = self.keeps_content_for(&block.block_type);
        self.write_entry(&AuditEntry {
            ts_ms: now_ms(),
            user_id: user_id.to_string(),
            user_type: user_type.to_string(),
            session_id: Some(session_id.to_string()),
            operation: "insert".to_string(),
            block_id: block.id.clone(),
            block_type: block.block_type.clone(),
            after_hash: Some(block.hash.clone()),
            after_content: keep.then(|| block.content.clone()),
            ..Default::default()
        })
    }

    pub fn log_update(
        &self,
        session_id: &str,
        user_id: &str,
        user_type: &str,
        before: &Block,
        after: &Block,
    ) -> Result<(), StorageError> {
        let keep = self.keeps_content_for(&after.block_type);
        self.write_entry(&AuditEntry {
            ts_ms: now_ms(),
            user_id: user_id.to_string(),
            user_type: user_type.to_string(),
            session_id: Some(session_id.to_string()),
            operation: "update".to_string(),
            block_id: after.id.clone(),
            block_type: after.block_type.clone(),
            before_hash: Some(before.hash.clone()),
            after_hash: Some(after.hash.clone()),
            before_content: keep.then(|| before.content.clone()),
            after_content: keep.then(|| after.content.clone()),
            diff: Some(compute_diff(before, after)),
            ..Default::default()
        })
    }

    pub fn log_delete(
        &self,
        session_id: &str,
        user_id: &str,
        user_type: &str,
        before: &Block,
    ) -> Result<(), StorageError> {
        let keep = self.keeps_content_for(&before.block_type);
        self.write_entry(&AuditEntry {
            ts_ms: now_ms(),
            user_id: user_id.to_string(),
            user_type: user_type.to_string(),
            session_id: Some(session_id.to_string()),
            operation: "delete".to_string(),
            block_id: before.id.clone(),
            block_type: before.block_type.clone(),
            before_hash: Some(before.hash.clone()),
            before_content: keep.then(|| before.content.clone()),
            ..Default::default()
        })
    }

    /// Attr staging merges as a field-scoped update.
    pub fn log_field_update(
        &self,
        session_id: &str,
        user_id: &str,
        user_type: &str,
        block_id: &str,
        field: &str,
        before: Option<&str>,
        after: Option<&str>,
    ) -> Result<(), StorageError> {
        let diff = serde_json::json!({ field: { "before": before, "after": after } }).to_string();
        self.write_entry(&AuditEntry {
            ts_ms: now_ms(),
            user_id: user_id.to_string(),
            user_type: user_type.to_string(),
            session_id: Some(session_id.to_string()),
            operation: "update".to_string(),
            block_id: block_id.to_string(),
            block_type: String::new(),
            diff: Some(diff),
            ..Default::default()
        })
    }

    pub fn log_merge(&self, entry: &MergeLogEntry) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO merge_log \
             (ts_ms, session_id, user_id, status, blocks_inserted, blocks_updated, \
              blocks_deleted, refs_linked, refs_unlinked, duration_ms, error_message) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                now_ms(),
                entry.session_id,
                entry.user_id,
                entry.status,
                entry.blocks_inserted,
                entry.blocks_updated,
                entry.blocks_deleted,
                entry.refs_linked,
                entry.refs_unlinked,
                entry.duration_ms,
                entry.error_message,
            ],
        )?;
        Ok(())
    }

    pub fn merge_log_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<MergeLogEntry>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, user_id, status, blocks_inserted, blocks_updated, \
                    blocks_deleted, refs_linked, refs_unlinked, duration_ms, error_message \
             FROM merge_log WHERE session_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(MergeLogEntry {
                session_id: row.get(0)?,
                user_id: row.get(1)?,
                status: row.get(2)?,
                blocks_inserted: row.get(3)?,
                blocks_updated: row.get(4)?,
                blocks_deleted: row.get(5)?,
                refs_linked: row.get(6)?,
                refs_unlinked: row.get(7)?,
                duration_ms: row.get(8)?,
                error_message: row.get(9)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Filtered, paginated audit query, newest first.
    pub fn query(&self, q: &AuditQuery) -> Result<AuditPage, StorageError> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(block_id) = &q.block_id {
            clauses.push("block_id = ?");
            args.push(block_id.clone().into());
        }
        if let Some(user_id) = &q.user_id {
            clauses.push("user_id = ?");
            args.push(user_id.clone().into());
        }
        if let Some(operation) = &q.operation {
            clauses.push("operation = ?");
            args.push(operation.clone().into());
        }
        if let Some(from_ms) = q.from_ms {
            clauses.push("ts_ms >= ?");
            args.push(from_ms.into());
        }
        if let Some(to_ms) = q.to_ms {
            clauses.push("ts_ms <= ?");
            args.push(to_ms.into());
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let total_count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM audit_log{where_sql}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let limit = if q.limit == 0 { 50 } else { q.limit };
        let mut sql = format!(
            "SELECT id, ts_ms, user_id, user_type, session_id, operation, block_id, block_type, \
                    before_hash, after_hash, before_content, after_content, diff, metadata \
             FROM audit_log{where_sql} ORDER BY ts_ms DESC, id DESC LIMIT {limit}"
        );
        if q.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", q.offset));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok(AuditEntry {
                id: row.get(0)?,
                ts_ms: row.get(1)?,
                user_id: row.get(2)?,
                user_type: row.get(3)?,
                session_id: row.get(4)?,
                operation: row.get(5)?,
                block_id: row.get(6)?,
                block_type: row.get(7)?,
                before_hash: row.get(8)?,
                after_hash: row.get(9)?,
                before_content: row.get(10)?,
                after_content: row.get(11)?,
                diff: row.get(12)?,
                metadata: row.get(13)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        let has_more = q.offset + entries.len() < total_count as usize;
        Ok(AuditPage {
            entries,
            total_count: total_count as usize,
            has_more,
        })
    }

    pub fn block_history(
        &self,
        block_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, StorageError> {
        let page = self.query(&AuditQuery {
            block_id: Some(block_id.to_string()),
            limit: if limit == 0 { 50 } else { limit },
            ..Default::default()
        })?;
        Ok(page.entries)
    }
}

/// JSON diff of the user-facing fields, for update rows.
fn compute_diff(before: &Block, after: &Block) -> String {
    let mut diff = serde_json::Map::new();
    if before.content != after.content {
        diff.insert(
            "content".to_string(),
            serde_json::json!({ "before": before.content, "after": after.content }),
        );
    }
    if before.position != after.position {
        diff.insert(
            "position".to_string(),
            serde_json::json!({ "before": before.position, "after": after.position }),
        );
    }
    if before.parent_id != after.parent_id {
        diff.insert(
            "parent_id".to_string(),
            serde_json::json!({ "before": before.parent_id, "after": after.parent_id }),
        );
    }
    if before.published != after.published {
        diff.insert(
            "published".to_string(),
            serde_json::json!({ "before": before.published, "after": after.published }),
        );
    }
    serde_json::Value::Object(diff).to_string()
}
