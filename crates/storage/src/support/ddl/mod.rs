#![forbid(unsafe_code)]

mod audit;
mod catalog;
mod content;
mod session;
mod users;

/// Applied to the durable stores (content, catalog, users, audit).
/// Session stores deliberately stay in rollback-journal mode: a WAL
/// sidecar would make the single-file queue rename protocol unsound.
/// `recursive_triggers` keeps the external-content FTS index in sync
/// when a block row is replaced in place.
pub(crate) const WAL_PRAGMAS: &str = r#"
        PRAGMA journal_mode=WAL;
        PRAGMA foreign_keys=ON;
        PRAGMA recursive_triggers=ON;
"#;

pub(crate) fn content_schema_sql() -> String {
    let mut sql = String::new();
    sql.push_str(content::TABLES_SQL);
    sql.push_str(content::FTS_SQL);
    sql.push_str(content::INDEXES_SQL);
    sql
}

pub(crate) fn catalog_schema_sql() -> String {
    let mut sql = String::new();
    sql.push_str(catalog::TABLES_SQL);
    sql.push_str(catalog::SEED_SQL);
    sql
}

pub(crate) fn users_schema_sql() -> String {
    users::TABLES_SQL.to_string()
}

pub(crate) fn audit_schema_sql() -> String {
    let mut sql = String::new();
    sql.push_str(audit::TABLES_SQL);
    sql.push_str(audit::INDEXES_SQL);
    sql
}

pub(crate) fn session_schema_sql() -> String {
    session::TABLES_SQL.to_string()
}
