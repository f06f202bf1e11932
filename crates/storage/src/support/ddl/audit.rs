#![forbid(unsafe_code)]

pub(super) const TABLES_SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS audit_log (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          ts_ms INTEGER NOT NULL,
          user_id TEXT NOT NULL,
          user_type TEXT NOT NULL,
          session_id TEXT,
          operation TEXT NOT NULL,
          block_id TEXT NOT NULL,
          block_type TEXT NOT NULL,
          before_hash TEXT,
          after_hash TEXT,
          before_content TEXT,
          after_content TEXT,
          diff TEXT,
          metadata TEXT
        );

        CREATE TABLE IF NOT EXISTS merge_log (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          ts_ms INTEGER NOT NULL,
          session_id TEXT NOT NULL,
          user_id TEXT NOT NULL,
          status TEXT NOT NULL,
          blocks_inserted INTEGER NOT NULL DEFAULT 0,
          blocks_updated INTEGER NOT NULL DEFAULT 0,
          blocks_deleted INTEGER NOT NULL DEFAULT 0,
          refs_linked INTEGER NOT NULL DEFAULT 0,
          refs_unlinked INTEGER NOT NULL DEFAULT 0,
          duration_ms INTEGER NOT NULL DEFAULT 0,
          error_message TEXT
        );
"#;

pub(super) const INDEXES_SQL: &str = r#"

        CREATE INDEX IF NOT EXISTS idx_audit_block ON audit_log(block_id);
        CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_log(user_id);
        CREATE INDEX IF NOT EXISTS idx_audit_ts ON audit_log(ts_ms);
        CREATE INDEX IF NOT EXISTS idx_merge_session ON merge_log(session_id);
        CREATE INDEX IF NOT EXISTS idx_merge_ts ON merge_log(ts_ms);
"#;
