#![forbid(unsafe_code)]

use crate::error::StorageError;
use crate::support::{catalog_schema_sql, WAL_PRAGMAS};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tessera_core::{content_hash, BlockType, RelationType, SchemaInfo};

fn block_type_from_row(row: &Row<'_>) -> rusqlite::Result<BlockType> {
    let allowed_parents: String = row.get(4)?;
    let allowed_children: String = row.get(5)?;
    Ok(BlockType {
        name: row.get(0)?,
        label: row.get(1)?,
        icon: row.get(2)?,
        schema: row.get(3)?,
        allowed_parents: serde_json::from_str(&allowed_parents).unwrap_or_default(),
        allowed_children: serde_json::from_str(&allowed_children).unwrap_or_default(),
        category: row.get(6)?,
        version: row.get(7)?,
    })
}

fn relation_type_from_row(row: &Row<'_>) -> rusqlite::Result<RelationType> {
    let from_types: String = row.get(3)?;
    let to_types: String = row.get(4)?;
    Ok(RelationType {
        name: row.get(0)?,
        label: row.get(1)?,
        inverse: row.get(2)?,
        from_types: serde_json::from_str(&from_types).unwrap_or_default(),
        to_types: serde_json::from_str(&to_types).unwrap_or_default(),
        symmetric: row.get::<_, i64>(5)? != 0,
    })
}

/// The schema catalog store: block types, relation types, and the
/// process-wide schema version.
#[derive(Debug)]
pub struct SchemaCatalog {
    path: PathBuf,
    conn: Connection,
}

impl SchemaCatalog {
    /// Open read-write and seed the default catalog on first use. The
    /// schema hash is the digest of the seed DDL, so re-running `init`
    /// on an untouched catalog is a no-op.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.execute_batch(WAL_PRAGMAS)?;
        let ddl = catalog_schema_sql();
        conn.execute_batch(&ddl)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version(id, version, hash) VALUES (1, 1, ?1)",
            params![content_hash(&ddl)],
        )?;
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

    pub fn schema_info(&self) -> Result<SchemaInfo, StorageError> {
        Ok(self.conn.query_row(
            "SELECT version, hash FROM schema_version WHERE id = 1",
            [],
            |row| {
                Ok(SchemaInfo {
                    version: row.get(0)?,
                    hash: row.get(1)?,
                })
            },
        )?)
    }

    pub fn block_type(&self, name: &str) -> Result<Option<BlockType>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT name, label, icon, schema, allowed_parents, allowed_children, \
                        category, version FROM block_types WHERE name=?1",
                params![name],
                block_type_from_row,
            )
            .optional()?)
    }

    pub fn list_block_types(&self) -> Result<Vec<BlockType>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, label, icon, schema, allowed_parents, allowed_children, \
                    category, version FROM block_types ORDER BY name",
        )?;
        let rows = stmt.query_map([], block_type_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn relation_type(&self, name: &str) -> Result<Option<RelationType>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT name, label, inverse, from_types, to_types, symmetric \
                 FROM relation_types WHERE name=?1",
                params![name],
                relation_type_from_row,
            )
            .optional()?)
    }

    pub fn list_relation_types(&self) -> Result<Vec<RelationType>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, label, inverse, from_types, to_types, symmetric \
             FROM relation_types ORDER BY name",
        )?;
        let rows = stmt.query_map([], relation_type_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn symmetric_relation_names(&self) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM relation_types WHERE symmetric = 1 ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
