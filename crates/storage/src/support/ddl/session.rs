#![forbid(unsafe_code)]

pub(super) const TABLES_SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS blocks (
          id TEXT PRIMARY KEY,
          parent_id TEXT,
          type TEXT NOT NULL,
          content TEXT NOT NULL DEFAULT '',
          content_html TEXT,
          position TEXT NOT NULL DEFAULT 'm',
          hash TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          created_by TEXT NOT NULL DEFAULT '',
          published INTEGER NOT NULL DEFAULT 0,
          deleted_at_ms INTEGER,
          _dirty INTEGER NOT NULL DEFAULT 0,
          _source TEXT NOT NULL DEFAULT 'copy' CHECK (_source IN ('new', 'copy'))
        );

        CREATE TABLE IF NOT EXISTS refs (
          from_id TEXT NOT NULL,
          to_id TEXT NOT NULL,
          type TEXT NOT NULL,
          anchor TEXT,
          created_at_ms INTEGER NOT NULL,
          created_by TEXT NOT NULL DEFAULT '',
          _dirty INTEGER NOT NULL DEFAULT 0,
          PRIMARY KEY (from_id, to_id, type)
        );

        CREATE TABLE IF NOT EXISTS attrs (
          block_id TEXT NOT NULL,
          name TEXT NOT NULL,
          value TEXT NOT NULL DEFAULT '',
          _dirty INTEGER NOT NULL DEFAULT 0,
          PRIMARY KEY (block_id, name)
        );

        CREATE TABLE IF NOT EXISTS _session_meta (
          session_id TEXT PRIMARY KEY,
          user_id TEXT NOT NULL,
          user_type TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          last_activity_ms INTEGER NOT NULL,
          base_snapshot TEXT NOT NULL DEFAULT '',
          schema_version INTEGER NOT NULL,
          schema_hash TEXT NOT NULL DEFAULT '',
          status TEXT NOT NULL DEFAULT 'active',
          conflicts TEXT
        );

        CREATE TABLE IF NOT EXISTS _changes (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          ts_ms INTEGER NOT NULL,
          operation TEXT NOT NULL,
          block_id TEXT NOT NULL,
          field TEXT,
          before TEXT,
          after TEXT,
          merged INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS _structural_deps (
          block_id TEXT PRIMARY KEY,
          depends_on TEXT NOT NULL DEFAULT '[]',
          snapshot_hashes TEXT NOT NULL DEFAULT '{}'
        );
"#;
