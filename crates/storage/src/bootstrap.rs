#![forbid(unsafe_code)]

//! Store bootstrap: the standard data-directory layout and `init`.

use crate::audit::{AuditConfig, AuditLog};
use crate::catalog::SchemaCatalog;
use crate::content::ContentStore;
use crate::error::StorageError;
use crate::support::{users_schema_sql, WAL_PRAGMAS};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// The four durable stores under one data directory.
#[derive(Clone, Debug)]
pub struct DataPaths {
    pub content: PathBuf,
    pub schema: PathBuf,
    pub users: PathBuf,
    pub audit: PathBuf,
}

impl DataPaths {
    pub fn under(data_dir: impl AsRef<Path>) -> Self {
        let dir = data_dir.as_ref();
        Self {
            content: dir.join("content.db"),
            schema: dir.join("schema.db"),
            users: dir.join("users.db"),
            audit: dir.join("audit.db"),
        }
    }

    pub fn all_exist(&self) -> bool {
        [&self.content, &self.schema, &self.users, &self.audit]
            .iter()
            .all(|p| p.exists())
    }
}

/// Create every store from the embedded DDL. Re-running against existing
/// stores is harmless: all DDL is `IF NOT EXISTS` and seeds are
/// `INSERT OR IGNORE`.
pub fn init_stores(data_dir: impl AsRef<Path>) -> Result<DataPaths, StorageError> {
    let data_dir = data_dir.as_ref();
    std::fs::create_dir_all(data_dir)?;
    let paths = DataPaths::under(data_dir);

    let _ = ContentStore::open(&paths.content)?;
    let _ = SchemaCatalog::open(&paths.schema)?;
    let _ = AuditLog::open(&paths.audit, AuditConfig::default())?;

    let users = Connection::open(&paths.users)?;
    users.execute_batch(WAL_PRAGMAS)?;
    users.execute_batch(&users_schema_sql())?;

    tracing::info!(data_dir = %data_dir.display(), "stores initialized");
    Ok(paths)
}
