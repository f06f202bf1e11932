#![forbid(unsafe_code)]

use crate::error::StorageError;
use crate::support::{content_schema_sql, WAL_PRAGMAS};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, Transaction};
use std::path::{Path, PathBuf};
use tessera_core::{content_hash, Attr, Block, Ref};

pub(crate) const BLOCK_COLUMNS: &str = "id, parent_id, type, content, content_html, position, \
     hash, created_at_ms, updated_at_ms, created_by, published, deleted_at_ms";

pub(crate) fn block_from_row(row: &Row<'_>) -> rusqlite::Result<Block> {
    Ok(Block {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        block_type: row.get(2)?,
        content: row.get(3)?,
        content_html: row.get(4)?,
        position: row.get(5)?,
        hash: row.get(6)?,
        created_at_ms: row.get(7)?,
        updated_at_ms: row.get(8)?,
        created_by: row.get(9)?,
        published: row.get::<_, i64>(10)? != 0,
        deleted_at_ms: row.get(11)?,
    })
}

pub(crate) fn ref_from_row(row: &Row<'_>) -> rusqlite::Result<Ref> {
    Ok(Ref {
        from_id: row.get(0)?,
        to_id: row.get(1)?,
        ref_type: row.get(2)?,
        anchor: row.get(3)?,
        created_at_ms: row.get(4)?,
        created_by: row.get(5)?,
    })
}

/// The authoritative block dataset. Everyone reads it; only the merger
/// holds a read-write handle.
#[derive(Debug)]
pub struct ContentStore {
    path: PathBuf,
    conn: Connection,
}

impl ContentStore {
    /// Open read-write, creating tables on first use. The merger (and the
    /// bootstrap tool) are the only callers.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.execute_batch(WAL_PRAGMAS)?;
        conn.execute_batch(&content_schema_sql())?;
        Ok(Self { path, conn })
    }

    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { path, conn })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn transaction(&mut self) -> Result<Transaction<'_>, StorageError> {
        Ok(self.conn.transaction()?)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Any row by id, soft-deleted included.
    pub fn get_block(&self, id: &str) -> Result<Option<Block>, StorageError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE id=?1"),
                params![id],
                block_from_row,
            )
            .optional()?)
    }

    pub fn get_live_block(&self, id: &str) -> Result<Option<Block>, StorageError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE id=?1 AND deleted_at_ms IS NULL"),
                params![id],
                block_from_row,
            )
            .optional()?)
    }

    pub fn block_hash(&self, id: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT hash FROM blocks WHERE id=?1", params![id], |row| {
                row.get(0)
            })
            .optional()?)
    }

    /// Live children ordered by their fractional position key.
    pub fn get_children(&self, parent_id: &str) -> Result<Vec<Block>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks \
             WHERE parent_id=?1 AND deleted_at_ms IS NULL ORDER BY position"
        ))?;
        let rows = stmt.query_map(params![parent_id], block_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_refs_from(&self, block_id: &str) -> Result<Vec<Ref>, StorageError> {
        self.query_refs("from_id", block_id)
    }

    pub fn get_refs_to(&self, block_id: &str) -> Result<Vec<Ref>, StorageError> {
        self.query_refs("to_id", block_id)
    }

    fn query_refs(&self, column: &str, block_id: &str) -> Result<Vec<Ref>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT from_id, to_id, type, anchor, created_at_ms, created_by \
             FROM refs WHERE {column}=?1 ORDER BY from_id, to_id, type"
        ))?;
        let rows = stmt.query_map(params![block_id], ref_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_attrs(&self, block_id: &str) -> Result<Vec<Attr>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT block_id, name, value FROM attrs WHERE block_id=?1 ORDER BY name")?;
        let rows = stmt.query_map(params![block_id], |row| {
            Ok(Attr {
                block_id: row.get(0)?,
                name: row.get(1)?,
                value: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Full-text search over live blocks.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<Block>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT b.id, b.parent_id, b.type, b.content, b.content_html, b.position, \
                    b.hash, b.created_at_ms, b.updated_at_ms, b.created_by, b.published, \
                    b.deleted_at_ms \
             FROM blocks_fts JOIN blocks b ON b.id = blocks_fts.id \
             WHERE blocks_fts MATCH ?1 AND b.deleted_at_ms IS NULL \
             ORDER BY blocks_fts.rank LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit as i64], block_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Cheap digest of the store state: `count(blocks):max(updated_at_ms)`.
    /// Every successful merge changes at least one of the two parts.
    pub fn snapshot_token(&self) -> Result<String, StorageError> {
        let (count, max_updated): (i64, Option<i64>) = self.conn.query_row(
            "SELECT COUNT(*), MAX(updated_at_ms) FROM blocks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(format!(
            "{count}:{}",
            max_updated.map(|v| v.to_string()).unwrap_or_default()
        ))
    }

    /// Invariant sweep for the operator tool: hash integrity, strict
    /// sibling order, referential integrity, symmetric ref pairing.
    /// Returns human-readable violation descriptions.
    pub fn check_integrity(&self, symmetric_types: &[String]) -> Result<Vec<String>, StorageError> {
        let mut violations = Vec::new();

        let mut stmt = self
            .conn
            .prepare("SELECT id, content, hash FROM blocks")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (id, content, hash) = row?;
            if content_hash(&content) != hash {
                violations.push(format!("block {id}: stored hash does not match content"));
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT COALESCE(parent_id, ''), id, position FROM blocks \
             WHERE deleted_at_ms IS NULL ORDER BY parent_id, position, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut prev: Option<(String, String, String)> = None;
        for row in rows {
            let (parent, id, position) = row?;
            if let Some((prev_parent, prev_id, prev_position)) = &prev {
                if *prev_parent == parent && *prev_position == position {
                    violations.push(format!(
                        "siblings {prev_id} and {id} under '{parent}' share position '{position}'"
                    ));
                }
            }
            prev = Some((parent, id, position));
        }

        let mut stmt = self.conn.prepare(
            "SELECT b.id, b.parent_id FROM blocks b \
             LEFT JOIN blocks p ON p.id = b.parent_id AND p.deleted_at_ms IS NULL \
             WHERE b.deleted_at_ms IS NULL AND b.parent_id IS NOT NULL AND p.id IS NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, parent) = row?;
            violations.push(format!("block {id}: parent {parent} is missing or deleted"));
        }

        let mut stmt = self.conn.prepare(
            "SELECT r.from_id, r.to_id, r.type FROM refs r \
             LEFT JOIN blocks f ON f.id = r.from_id AND f.deleted_at_ms IS NULL \
             LEFT JOIN blocks t ON t.id = r.to_id AND t.deleted_at_ms IS NULL \
             WHERE f.id IS NULL OR t.id IS NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (from, to, ref_type) = row?;
            violations.push(format!(
                "ref ({from} -[{ref_type}]-> {to}): endpoint missing or deleted"
            ));
        }

        for ref_type in symmetric_types {
            let mut stmt = self.conn.prepare(
                "SELECT a.from_id, a.to_id FROM refs a \
                 LEFT JOIN refs b ON b.from_id = a.to_id AND b.to_id = a.from_id AND b.type = a.type \
                 WHERE a.type = ?1 AND b.from_id IS NULL",
            )?;
            let rows = stmt.query_map(params![ref_type], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (from, to) = row?;
                violations.push(format!(
                    "symmetric ref {ref_type} ({from} -> {to}) has no inverse row"
                ));
            }
        }

        Ok(violations)
    }
}
