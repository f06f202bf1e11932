#![forbid(unsafe_code)]

pub(super) const TABLES_SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS users (
          id TEXT PRIMARY KEY,
          name TEXT NOT NULL DEFAULT '',
          email TEXT,
          user_type TEXT NOT NULL DEFAULT 'human',
          created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS permissions (
          user_id TEXT NOT NULL,
          resource TEXT NOT NULL,
          level TEXT NOT NULL DEFAULT 'read',
          PRIMARY KEY (user_id, resource)
        );

        CREATE TABLE IF NOT EXISTS api_keys (
          key_hash TEXT PRIMARY KEY,
          user_id TEXT NOT NULL,
          label TEXT NOT NULL DEFAULT '',
          created_at_ms INTEGER NOT NULL,
          last_used_ms INTEGER
        );
"#;
