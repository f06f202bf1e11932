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
          deleted_at_ms INTEGER
        );

        CREATE TABLE IF NOT EXISTS refs (
          from_id TEXT NOT NULL,
          to_id TEXT NOT NULL,
          type TEXT NOT NULL,
          anchor TEXT,
          created_at_ms INTEGER NOT NULL,
          created_by TEXT NOT NULL DEFAULT '',
          PRIMARY KEY (from_id, to_id, type)
        );

        CREATE TABLE IF NOT EXISTS attrs (
          block_id TEXT NOT NULL,
          name TEXT NOT NULL,
          value TEXT NOT NULL DEFAULT '',
          PRIMARY KEY (block_id, name)
        );
"#;

pub(super) const FTS_SQL: &str = r#"

        CREATE VIRTUAL TABLE IF NOT EXISTS blocks_fts USING fts5(
          id UNINDEXED,
          type UNINDEXED,
          content,
          content='blocks',
          content_rowid='rowid'
        );

        CREATE TRIGGER IF NOT EXISTS blocks_fts_ai AFTER INSERT ON blocks BEGIN
          INSERT INTO blocks_fts(rowid, id, type, content)
          VALUES (new.rowid, new.id, new.type, new.content);
        END;

        CREATE TRIGGER IF NOT EXISTS blocks_fts_ad AFTER DELETE ON blocks BEGIN
          INSERT INTO blocks_fts(blocks_fts, rowid, id, type, content)
          VALUES ('delete', old.rowid, old.id, old.type, old.content);
        END;

        CREATE TRIGGER IF NOT EXISTS blocks_fts_au AFTER UPDATE ON blocks BEGIN
          INSERT INTO blocks_fts(blocks_fts, rowid, id, type, content)
          VALUES ('delete', old.rowid, old.id, old.type, old.content);
          INSERT INTO blocks_fts(rowid, id, type, content)
          VALUES (new.rowid, new.id, new.type, new.content);
        END;
"#;

pub(super) const INDEXES_SQL: &str = r#"

        CREATE INDEX IF NOT EXISTS idx_blocks_parent_position ON blocks(parent_id, position);
        CREATE INDEX IF NOT EXISTS idx_blocks_type ON blocks(type);
        CREATE INDEX IF NOT EXISTS idx_blocks_updated ON blocks(updated_at_ms);
        CREATE INDEX IF NOT EXISTS idx_blocks_hash ON blocks(hash);
        CREATE INDEX IF NOT EXISTS idx_blocks_published ON blocks(published) WHERE deleted_at_ms IS NULL;
        CREATE INDEX IF NOT EXISTS idx_refs_to ON refs(to_id);
"#;
