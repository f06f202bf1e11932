#![forbid(unsafe_code)]

pub(super) const TABLES_SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS block_types (
          name TEXT PRIMARY KEY,
          label TEXT NOT NULL,
          icon TEXT,
          schema TEXT,
          allowed_parents TEXT NOT NULL DEFAULT '[]',
          allowed_children TEXT NOT NULL DEFAULT '[]',
          category TEXT NOT NULL,
          version INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS relation_types (
          name TEXT PRIMARY KEY,
          label TEXT NOT NULL,
          inverse TEXT,
          from_types TEXT NOT NULL DEFAULT '[]',
          to_types TEXT NOT NULL DEFAULT '[]',
          symmetric INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS schema_version (
          id INTEGER PRIMARY KEY CHECK (id = 1),
          version INTEGER NOT NULL,
          hash TEXT NOT NULL
        );
"#;

pub(super) const SEED_SQL: &str = r#"

        INSERT OR IGNORE INTO block_types(name, label, category) VALUES
          ('document', 'Document', 'content'),
          ('heading', 'Heading', 'content'),
          ('paragraph', 'Paragraph', 'content'),
          ('list', 'List', 'content'),
          ('list_item', 'List item', 'content'),
          ('code', 'Code', 'content'),
          ('table', 'Table', 'content'),
          ('quote', 'Quote', 'content'),
          ('embed', 'Embed', 'content'),
          ('question', 'Question', 'discussion'),
          ('answer', 'Answer', 'discussion'),
          ('claim', 'Claim', 'knowledge'),
          ('task', 'Task', 'task'),
          ('bot_request', 'Bot request', 'bot'),
          ('bot_response', 'Bot response', 'bot');

        INSERT OR IGNORE INTO relation_types(name, label, inverse, symmetric) VALUES
          ('parent_of', 'Parent of', 'child_of', 0),
          ('child_of', 'Child of', 'parent_of', 0),
          ('references', 'References', 'referenced_by', 0),
          ('referenced_by', 'Referenced by', 'references', 0),
          ('cites', 'Cites', 'cited_by', 0),
          ('cited_by', 'Cited by', 'cites', 0),
          ('refutes', 'Refutes', 'refuted_by', 0),
          ('refuted_by', 'Refuted by', 'refutes', 0),
          ('extends', 'Extends', 'extended_by', 0),
          ('extended_by', 'Extended by', 'extends', 0),
          ('depends', 'Depends on', 'depended_on_by', 0),
          ('depended_on_by', 'Depended on by', 'depends', 0),
          ('supersedes', 'Supersedes', 'superseded_by', 0),
          ('superseded_by', 'Superseded by', 'supersedes', 0),
          ('answers', 'Answers', 'answered_by', 0),
          ('answered_by', 'Answered by', 'answers', 0),
          ('blocks', 'Blocks', 'blocked_by', 0),
          ('blocked_by', 'Blocked by', 'blocks', 0),
          ('related_to', 'Related to', 'related_to', 1);
"#;
