#![forbid(unsafe_code)]

//! Helpers over a single session store file.
//!
//! A session store is one self-contained SQLite file: the staged rows, the
//! change journal, the structural dependencies and the `_session_meta` row.
//! It stays in rollback-journal mode so the queue can move it with one
//! rename. The manager, the merger and the resolver all go through these
//! helpers.

use crate::content::{block_from_row, BLOCK_COLUMNS};
use crate::error::StorageError;
use crate::support::{now_ms, session_schema_sql};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction};
use std::path::Path;
use tessera_core::{Block, Change, ChangeOp, Ref, StructuralDep};

pub(crate) const SOURCE_NEW: &str = "new";
pub(crate) const SOURCE_COPY: &str = "copy";

/// The single `_session_meta` row.
#[derive(Clone, Debug)]
pub(crate) struct SessionMeta {
    pub session_id: String,
    pub user_id: String,
    pub user_type: String,
    pub created_at_ms: i64,
    pub last_activity_ms: i64,
    pub base_snapshot: String,
    pub schema_version: i64,
    pub schema_hash: String,
    pub status: String,
    pub conflicts: Option<String>,
}

pub(crate) fn open_session_db(path: &Path) -> Result<Connection, StorageError> {
    Ok(Connection::open(path)?)
}

pub(crate) fn open_session_db_read_only(path: &Path) -> Result<Connection, StorageError> {
    Ok(Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?)
}

pub(crate) fn init_session_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(&session_schema_sql())?;
    Ok(())
}

pub(crate) fn read_meta(conn: &Connection) -> Result<Option<SessionMeta>, StorageError> {
    Ok(conn
        .query_row(
            "SELECT session_id, user_id, user_type, created_at_ms, last_activity_ms, \
                    base_snapshot, schema_version, schema_hash, status, conflicts \
             FROM _session_meta LIMIT 1",
            [],
            |row| {
                Ok(SessionMeta {
                    session_id: row.get(0)?,
                    user_id: row.get(1)?,
                    user_type: row.get(2)?,
                    created_at_ms: row.get(3)?,
                    last_activity_ms: row.get(4)?,
                    base_snapshot: row.get(5)?,
                    schema_version: row.get(6)?,
                    schema_hash: row.get(7)?,
                    status: row.get(8)?,
                    conflicts: row.get(9)?,
                })
            },
        )
        .optional()?)
}

pub(crate) fn insert_meta(conn: &Connection, meta: &SessionMeta) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO _session_meta \
         (session_id, user_id, user_type, created_at_ms, last_activity_ms, \
          base_snapshot, schema_version, schema_hash, status) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            meta.session_id,
            meta.user_id,
            meta.user_type,
            meta.created_at_ms,
            meta.last_activity_ms,
            meta.base_snapshot,
            meta.schema_version,
            meta.schema_hash,
            meta.status,
        ],
    )?;
    Ok(())
}

pub(crate) fn set_status(conn: &Connection, status: &str) -> Result<(), StorageError> {
    conn.execute("UPDATE _session_meta SET status = ?1", params![status])?;
    Ok(())
}

pub(crate) fn set_conflicts(conn: &Connection, conflicts_json: &str) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE _session_meta SET conflicts = ?1",
        params![conflicts_json],
    )?;
    Ok(())
}

pub(crate) fn touch(conn: &Connection, ts_ms: i64) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE _session_meta SET last_activity_ms = ?1",
        params![ts_ms],
    )?;
    Ok(())
}

pub(crate) fn get_block(conn: &Connection, id: &str) -> Result<Option<Block>, StorageError> {
    Ok(conn
        .query_row(
            &format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE id=?1"),
            params![id],
            block_from_row,
        )
        .optional()?)
}

pub(crate) fn block_source(conn: &Connection, id: &str) -> Result<Option<String>, StorageError> {
    Ok(conn
        .query_row(
            "SELECT _source FROM blocks WHERE id=?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Dirty rows in staging order is not meaningful; callers that care about
/// order use the journal.
pub(crate) fn dirty_blocks(conn: &Connection) -> Result<Vec<(Block, String)>, StorageError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BLOCK_COLUMNS}, _source FROM blocks WHERE _dirty = 1"
    ))?;
    let rows = stmt.query_map([], |row| Ok((block_from_row(row)?, row.get::<_, String>(12)?)))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub(crate) fn structural_deps(conn: &Connection) -> Result<Vec<StructuralDep>, StorageError> {
    let mut stmt =
        conn.prepare("SELECT block_id, depends_on, snapshot_hashes FROM _structural_deps")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (block_id, depends_on, snapshot_hashes) = row?;
        out.push(StructuralDep {
            block_id,
            depends_on: serde_json::from_str(&depends_on).unwrap_or_default(),
            snapshot_hashes: serde_json::from_str(&snapshot_hashes).unwrap_or_default(),
        });
    }
    Ok(out)
}

pub(crate) fn upsert_structural_dep_tx(
    tx: &Transaction<'_>,
    dep: &StructuralDep,
) -> Result<(), StorageError> {
    tx.execute(
        "INSERT OR REPLACE INTO _structural_deps (block_id, depends_on, snapshot_hashes) \
         VALUES (?1, ?2, ?3)",
        params![
            dep.block_id,
            serde_json::to_string(&dep.depends_on)?,
            serde_json::to_string(&dep.snapshot_hashes)?,
        ],
    )?;
    Ok(())
}

pub(crate) fn append_change_tx(
    tx: &Transaction<'_>,
    op: ChangeOp,
    block_id: &str,
    field: Option<&str>,
    before: Option<&str>,
    after: Option<&str>,
) -> Result<(), StorageError> {
    tx.execute(
        "INSERT INTO _changes (ts_ms, operation, block_id, field, before, after) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![now_ms(), op.as_str(), block_id, field, before, after],
    )?;
    Ok(())
}

pub(crate) fn unmerged_changes(conn: &Connection) -> Result<Vec<Change>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT id, ts_ms, operation, block_id, field, before, after, merged \
         FROM _changes WHERE merged = 0 ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, Option<String>>(6)?,
            row.get::<_, i64>(7)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (id, ts_ms, operation, block_id, field, before, after, merged) = row?;
        let Some(op) = ChangeOp::parse(&operation) else {
            continue;
        };
        out.push(Change {
            id,
            ts_ms,
            op,
            block_id,
            field,
            before,
            after,
            merged: merged != 0,
        });
    }
    Ok(out)
}

pub(crate) fn mark_changes_merged(conn: &Connection) -> Result<(), StorageError> {
    conn.execute("UPDATE _changes SET merged = 1", [])?;
    Ok(())
}

pub(crate) fn ref_json(reference: &Ref) -> Result<String, StorageError> {
    Ok(serde_json::to_string(reference)?)
}
