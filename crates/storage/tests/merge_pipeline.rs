#![forbid(unsafe_code)]

use std::path::PathBuf;
use tessera_core::{content_hash, Block, Ref, SessionStatus, UserType};
use tessera_storage::{
    init_stores, AuditLog, AuditQuery, ContentStore, DataPaths, Merger, MergerConfig, QueueDirs,
    SessionManager, SessionManagerConfig,
};

fn temp_root(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("tessera_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

struct Env {
    paths: DataPaths,
    queue: QueueDirs,
    manager: SessionManager,
}

fn setup(test_name: &str) -> Env {
    let root = temp_root(test_name);
    let paths = init_stores(root.join("data")).expect("init stores");
    let queue = QueueDirs::under(root.join("queue"));
    queue.ensure().expect("queue dirs");
    let manager = SessionManager::new(SessionManagerConfig::new(
        root.join("sessions"),
        &paths.content,
        &paths.schema,
        queue.clone(),
    ))
    .expect("session manager");
    Env {
        paths,
        queue,
        manager,
    }
}

fn new_merger(env: &Env) -> Merger {
    Merger::new(MergerConfig::new(
        &env.paths.content,
        &env.paths.schema,
        &env.paths.audit,
        env.queue.clone(),
    ))
    .expect("merger")
}

fn paragraph(id: &str, content: &str) -> Block {
    Block {
        id: id.to_string(),
        block_type: "paragraph".to_string(),
        content: content.to_string(),
        position: "m".to_string(),
        ..Block::default()
    }
}

#[test]
fn single_user_insert_merges_into_canonical() {
    let env = setup("single_user_insert");
    let session = env
        .manager
        .create("u1", UserType::Human)
        .expect("create session");

    env.manager
        .insert_block(&session.id, paragraph("b1", "Hello"))
        .expect("insert block");
    env.manager.submit(&session.id).expect("submit");

    let mut merger = new_merger(&env);
    assert_eq!(merger.run_once().expect("sweep"), 1);

    let content = ContentStore::open_read_only(&env.paths.content).expect("open content");
    let block = content
        .get_live_block("b1")
        .expect("read block")
        .expect("block exists");
    assert_eq!(block.content, "Hello");
    assert_eq!(block.hash, content_hash("Hello"));
    assert_eq!(block.created_by, "u1");

    let audit = AuditLog::open_read_only(&env.paths.audit).expect("open audit");
    let merges = audit
        .merge_log_for_session(&session.id)
        .expect("merge log");
    assert_eq!(merges.len(), 1);
    assert_eq!(merges[0].status, "success");
    assert_eq!(merges[0].blocks_inserted, 1);
    assert_eq!(merges[0].blocks_updated, 0);

    let refreshed = env.manager.refresh(&session.id).expect("refresh");
    assert_eq!(refreshed.status, SessionStatus::Merged);
    assert!(env.queue.done.join(format!("{}.db", session.id)).exists());
}

#[test]
fn empty_session_merges_with_zero_counts() {
    let env = setup("empty_session");
    let session = env
        .manager
        .create("u1", UserType::Human)
        .expect("create session");
    env.manager.submit(&session.id).expect("submit");

    let mut merger = new_merger(&env);
    merger.run_once().expect("sweep");

    let audit = AuditLog::open_read_only(&env.paths.audit).expect("open audit");
    let merges = audit
        .merge_log_for_session(&session.id)
        .expect("merge log");
    assert_eq!(merges.len(), 1);
    assert_eq!(merges[0].status, "success");
    assert_eq!(merges[0].blocks_inserted, 0);
    assert_eq!(merges[0].blocks_updated, 0);
    assert_eq!(merges[0].blocks_deleted, 0);

    let refreshed = env.manager.refresh(&session.id).expect("refresh");
    assert_eq!(refreshed.status, SessionStatus::Merged);
}

#[test]
fn noop_update_leaves_canonical_untouched() {
    let env = setup("noop_update");
    let first = env.manager.create("u1", UserType::Human).expect("create");
    env.manager
        .insert_block(&first.id, paragraph("b1", "stable"))
        .expect("insert");
    env.manager.submit(&first.id).expect("submit");
    let mut merger = new_merger(&env);
    merger.run_once().expect("sweep");

    let before = ContentStore::open_read_only(&env.paths.content)
        .expect("open content")
        .get_live_block("b1")
        .expect("read")
        .expect("exists");

    let second = env.manager.create("u1", UserType::Human).expect("create");
    let copied = env.manager.copy_block(&second.id, "b1").expect("copy");
    env.manager
        .update_block(&second.id, copied)
        .expect("no-op update");
    env.manager.submit(&second.id).expect("submit");
    merger.run_once().expect("sweep");

    let refreshed = env.manager.refresh(&second.id).expect("refresh");
    assert_eq!(refreshed.status, SessionStatus::Merged);

    let after = ContentStore::open_read_only(&env.paths.content)
        .expect("open content")
        .get_live_block("b1")
        .expect("read")
        .expect("exists");
    assert_eq!(after.hash, before.hash);
    assert_eq!(after.updated_at_ms, before.updated_at_ms, "no-op update must not bump updated_at");
}

#[test]
fn insert_then_delete_yields_soft_deleted_row() {
    let env = setup("insert_then_delete");
    let session = env.manager.create("u1", UserType::Human).expect("create");
    env.manager
        .insert_block(&session.id, paragraph("b1", "ephemeral"))
        .expect("insert");
    env.manager
        .delete_block(&session.id, "b1")
        .expect("delete");
    env.manager.submit(&session.id).expect("submit");

    let mut merger = new_merger(&env);
    merger.run_once().expect("sweep");

    let content = ContentStore::open_read_only(&env.paths.content).expect("open content");
    assert!(content.get_live_block("b1").expect("read").is_none());
    let row = content.get_block("b1").expect("read").expect("row exists");
    assert!(row.is_deleted(), "row was never live");
}

#[test]
fn links_and_attrs_merge_and_unmerge() {
    let env = setup("links_and_attrs");
    let session = env.manager.create("u1", UserType::Human).expect("create");
    env.manager
        .insert_block(&session.id, paragraph("b1", "claim"))
        .expect("insert b1");
    env.manager
        .insert_block(&session.id, paragraph("b2", "evidence"))
        .expect("insert b2");
    env.manager
        .link(
            &session.id,
            Ref {
                from_id: "b2".to_string(),
                to_id: "b1".to_string(),
                ref_type: "cites".to_string(),
                ..Ref::default()
            },
        )
        .expect("link");
    env.manager
        .set_attr(&session.id, "b1", "status", "open")
        .expect("set attr");
    env.manager.submit(&session.id).expect("submit");

    let mut merger = new_merger(&env);
    merger.run_once().expect("sweep");

    let content = ContentStore::open_read_only(&env.paths.content).expect("open content");
    let refs = content.get_refs_from("b2").expect("refs");
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].to_id, "b1");
    assert_eq!(refs[0].ref_type, "cites");
    let attrs = content.get_attrs("b1").expect("attrs");
    assert_eq!(attrs.len(), 1);
    assert_eq!(attrs[0].value, "open");
    drop(content);

    let second = env.manager.create("u1", UserType::Human).expect("create");
    env.manager
        .unlink(&second.id, "b2", "b1", "cites")
        .expect("unlink");
    env.manager
        .delete_attr(&second.id, "b1", "status")
        .expect("delete attr");
    env.manager.submit(&second.id).expect("submit");
    merger.run_once().expect("sweep");

    let content = ContentStore::open_read_only(&env.paths.content).expect("open content");
    assert!(content.get_refs_from("b2").expect("refs").is_empty());
    assert!(content.get_attrs("b1").expect("attrs").is_empty());
}

#[test]
fn merged_content_is_searchable() {
    let env = setup("fts_search");
    let session = env.manager.create("u1", UserType::Human).expect("create");
    env.manager
        .insert_block(&session.id, paragraph("b1", "the quick brown fox"))
        .expect("insert");
    env.manager
        .insert_block(&session.id, paragraph("b2", "a lazy dog"))
        .expect("insert");
    env.manager.submit(&session.id).expect("submit");
    new_merger(&env).run_once().expect("sweep");

    let content = ContentStore::open_read_only(&env.paths.content).expect("open content");
    let hits = content.search("quick", 10).expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "b1");
}

#[test]
fn audit_elides_content_except_allow_listed_types() {
    let env = setup("audit_allow_list");
    let session = env.manager.create("u1", UserType::Human).expect("create");
    env.manager
        .insert_block(&session.id, paragraph("b1", "private prose"))
        .expect("insert paragraph");
    let code = Block {
        id: "b2".to_string(),
        block_type: "code".to_string(),
        content: "fn main() {}".to_string(),
        position: "n".to_string(),
        ..Block::default()
    };
    env.manager
        .insert_block(&session.id, code)
        .expect("insert code");
    env.manager.submit(&session.id).expect("submit");
    new_merger(&env).run_once().expect("sweep");

    let audit = AuditLog::open_read_only(&env.paths.audit).expect("open audit");
    let prose = audit.block_history("b1", 10).expect("history b1");
    assert_eq!(prose.len(), 1);
    assert_eq!(prose[0].operation, "insert");
    assert!(prose[0].after_content.is_none(), "paragraph content is elided");
    assert_eq!(prose[0].after_hash.as_deref(), Some(content_hash("private prose").as_str()));

    let code_rows = audit.block_history("b2", 10).expect("history b2");
    assert_eq!(code_rows.len(), 1);
    assert_eq!(code_rows[0].after_content.as_deref(), Some("fn main() {}"));

    let page = audit
        .query(&AuditQuery {
            user_id: Some("u1".to_string()),
            operation: Some("insert".to_string()),
            ..Default::default()
        })
        .expect("query");
    assert_eq!(page.total_count, 2);
    assert!(!page.has_more);
}

#[test]
fn canonical_integrity_holds_after_merges() {
    let env = setup("integrity_after_merge");
    let session = env.manager.create("u1", UserType::Human).expect("create");
    env.manager
        .insert_block(&session.id, paragraph("root", "root"))
        .expect("insert root");
    let child = Block {
        id: "child".to_string(),
        parent_id: Some("root".to_string()),
        block_type: "paragraph".to_string(),
        content: "child".to_string(),
        position: "m".to_string(),
        ..Block::default()
    };
    env.manager
        .insert_block(&session.id, child)
        .expect("insert child");
    env.manager.submit(&session.id).expect("submit");
    new_merger(&env).run_once().expect("sweep");

    let content = ContentStore::open_read_only(&env.paths.content).expect("open content");
    let violations = content.check_integrity(&[]).expect("check");
    assert!(violations.is_empty(), "violations: {violations:?}");
    let children = content.get_children("root").expect("children");
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, "child");
}
