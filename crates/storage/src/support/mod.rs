#![forbid(unsafe_code)]

mod ddl;

pub(crate) use ddl::{
    audit_schema_sql, catalog_schema_sql, content_schema_sql, session_schema_sql,
    users_schema_sql, WAL_PRAGMAS,
};

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use time::OffsetDateTime;

pub(crate) fn now_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    let ms = nanos / 1_000_000i128;
    if ms <= 0 {
        0
    } else if ms >= i64::MAX as i128 {
        i64::MAX
    } else {
        ms as i64
    }
}

/// Session/queue files: `<dir>/*.db`, oldest modification time first.
/// Entries that cannot be stat'ed are skipped.
pub(crate) fn list_db_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<(PathBuf, SystemTime)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || path.extension().map(|e| e != "db").unwrap_or(true) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((path, modified));
    }
    files.sort_by_key(|(_, modified)| *modified);
    Ok(files.into_iter().map(|(path, _)| path).collect())
}

pub(crate) fn file_age_days(path: &Path, now: SystemTime) -> Option<f64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let age = now.duration_since(modified).ok()?;
    Some(age.as_secs_f64() / 86_400.0)
}

/// Compact one-line snapshot used for `before` images in the change
/// journal and audit rows: only the fields a human diff needs.
pub(crate) fn compact_block_json(block: &tessera_core::Block) -> String {
    serde_json::json!({
        "id": block.id,
        "type": block.block_type,
        "content": block.content,
        "position": block.position,
    })
    .to_string()
}
