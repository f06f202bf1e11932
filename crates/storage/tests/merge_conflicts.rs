#![forbid(unsafe_code)]

use rusqlite::Connection;
use std::path::PathBuf;
use tessera_core::{Block, ConflictKind, SessionStatus, UserType};
use tessera_storage::{
    init_stores, AuditLog, ContentStore, DataPaths, Merger, MergerConfig, QueueDirs,
    SessionManager, SessionManagerConfig, StorageError,
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

/// Seed the canonical store with one merged block.
fn seed_block(env: &Env, merger: &mut Merger, id: &str, content: &str) {
    let session = env.manager.create("seed", UserType::System).expect("create");
    env.manager
        .insert_block(&session.id, paragraph(id, content))
        .expect("insert");
    env.manager.submit(&session.id).expect("submit");
    merger.run_once().expect("sweep");
}

#[test]
fn concurrent_edits_conflict_on_content() {
    let env = setup("content_conflict");
    let mut merger = new_merger(&env);
    seed_block(&env, &mut merger, "b1", "original");

    let session_a = env.manager.create("alice", UserType::Human).expect("a");
    let session_b = env.manager.create("bob", UserType::Human).expect("b");

    let mut a_copy = env.manager.copy_block(&session_a.id, "b1").expect("copy a");
    let mut b_copy = env.manager.copy_block(&session_b.id, "b1").expect("copy b");

    // B merges first.
    b_copy.content = "Hi".to_string();
    env.manager
        .update_block(&session_b.id, b_copy)
        .expect("update b");
    env.manager.submit(&session_b.id).expect("submit b");
    merger.run_once().expect("sweep");

    // A now carries a stale snapshot hash.
    a_copy.content = "Hey".to_string();
    env.manager
        .update_block(&session_a.id, a_copy)
        .expect("update a");
    env.manager.submit(&session_a.id).expect("submit a");
    merger.run_once().expect("sweep");

    let refreshed = env.manager.refresh(&session_a.id).expect("refresh");
    assert_eq!(refreshed.status, SessionStatus::Conflict);
    assert!(env
        .queue
        .failed
        .join(format!("{}.db", session_a.id))
        .exists());

    let conflicts = env.manager.conflicts(&session_a.id).expect("conflicts");
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].block_id, "b1");
    assert_eq!(conflicts[0].kind, ConflictKind::Content);

    // Canonical keeps B's version.
    let content = ContentStore::open_read_only(&env.paths.content).expect("open");
    let block = content.get_live_block("b1").expect("read").expect("exists");
    assert_eq!(block.content, "Hi");

    let audit = AuditLog::open_read_only(&env.paths.audit).expect("audit");
    let merges = audit
        .merge_log_for_session(&session_a.id)
        .expect("merge log");
    assert_eq!(merges.len(), 1);
    assert_eq!(merges[0].status, "conflict");
}

#[test]
fn editing_a_deleted_block_conflicts_as_deleted() {
    let env = setup("deleted_conflict");
    let mut merger = new_merger(&env);
    seed_block(&env, &mut merger, "b1", "doomed");

    let session_a = env.manager.create("alice", UserType::Human).expect("a");
    let mut a_copy = env.manager.copy_block(&session_a.id, "b1").expect("copy");

    let session_b = env.manager.create("bob", UserType::Human).expect("b");
    env.manager.copy_block(&session_b.id, "b1").expect("copy b");
    env.manager
        .delete_block(&session_b.id, "b1")
        .expect("delete");
    env.manager.submit(&session_b.id).expect("submit b");
    merger.run_once().expect("sweep");

    a_copy.content = "edited anyway".to_string();
    env.manager
        .update_block(&session_a.id, a_copy)
        .expect("update a");
    env.manager.submit(&session_a.id).expect("submit a");
    merger.run_once().expect("sweep");

    let conflicts = env.manager.conflicts(&session_a.id).expect("conflicts");
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].kind, ConflictKind::Deleted);
}

#[test]
fn missing_parent_is_a_structure_conflict() {
    let env = setup("structure_conflict");
    let mut merger = new_merger(&env);
    seed_block(&env, &mut merger, "b1", "parent");

    // A stages a child of b1; B deletes b1 and merges first.
    let session_a = env.manager.create("alice", UserType::Human).expect("a");
    let child = Block {
        id: "b3".to_string(),
        parent_id: Some("b1".to_string()),
        block_type: "paragraph".to_string(),
        content: "child".to_string(),
        position: "m".to_string(),
        ..Block::default()
    };
    env.manager
        .insert_block(&session_a.id, child)
        .expect("insert child");

    let session_b = env.manager.create("bob", UserType::Human).expect("b");
    env.manager.copy_block(&session_b.id, "b1").expect("copy");
    env.manager
        .delete_block(&session_b.id, "b1")
        .expect("delete");
    env.manager.submit(&session_b.id).expect("submit b");
    merger.run_once().expect("sweep");

    env.manager.submit(&session_a.id).expect("submit a");
    merger.run_once().expect("sweep");

    let conflicts = env.manager.conflicts(&session_a.id).expect("conflicts");
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].block_id, "b3");
    assert_eq!(conflicts[0].kind, ConflictKind::Structure);
}

#[test]
fn deleting_a_parent_of_a_staged_child_is_rejected() {
    let env = setup("delete_parent_same_session");
    let mut merger = new_merger(&env);
    seed_block(&env, &mut merger, "p1", "parent");

    let session = env.manager.create("alice", UserType::Human).expect("a");
    env.manager.copy_block(&session.id, "p1").expect("copy");
    let child = Block {
        id: "c1".to_string(),
        parent_id: Some("p1".to_string()),
        block_type: "paragraph".to_string(),
        content: "child".to_string(),
        position: "m".to_string(),
        ..Block::default()
    };
    env.manager
        .insert_block(&session.id, child)
        .expect("insert child");
    env.manager.delete_block(&session.id, "p1").expect("delete");
    env.manager.submit(&session.id).expect("submit");
    merger.run_once().expect("sweep");

    let refreshed = env.manager.refresh(&session.id).expect("refresh");
    assert_eq!(refreshed.status, SessionStatus::Conflict);
    let conflicts = env.manager.conflicts(&session.id).expect("conflicts");
    assert!(conflicts
        .iter()
        .any(|c| c.kind == ConflictKind::Structure && c.block_id == "c1"));

    // Nothing applied: the canonical parent is still live, the child absent.
    let content = ContentStore::open_read_only(&env.paths.content).expect("open");
    assert!(content.get_live_block("p1").expect("read").is_some());
    assert!(content.get_block("c1").expect("read").is_none());
}

#[test]
fn newer_session_schema_is_rejected_at_submit() {
    let env = setup("schema_submit");
    let session = env.manager.create("alice", UserType::Human).expect("a");

    // Inflate the persisted schema version, then reload it into memory.
    let conn = Connection::open(&session.db_path).expect("open session db");
    conn.execute("UPDATE _session_meta SET schema_version = schema_version + 10", [])
        .expect("bump version");
    drop(conn);
    env.manager.refresh(&session.id).expect("refresh");

    let err = env
        .manager
        .submit(&session.id)
        .expect_err("submit must fail");
    assert!(matches!(err, StorageError::SchemaMismatch { .. }));
    assert!(session.db_path.exists(), "nothing was queued");
}

#[test]
fn newer_session_schema_in_queue_goes_to_failed() {
    let env = setup("schema_queue");
    let session = env.manager.create("alice", UserType::Human).expect("a");
    env.manager
        .insert_block(&session.id, paragraph("b1", "x"))
        .expect("insert");
    env.manager.submit(&session.id).expect("submit");

    // Corrupt the queued file the way a foreign writer could.
    let queued = env.queue.pending.join(format!("{}.db", session.id));
    let conn = Connection::open(&queued).expect("open queued db");
    conn.execute("UPDATE _session_meta SET schema_version = schema_version + 10", [])
        .expect("bump version");
    drop(conn);

    let mut merger = new_merger(&env);
    merger.run_once().expect("sweep");

    assert!(env
        .queue
        .failed
        .join(format!("{}.db", session.id))
        .exists());
    let content = ContentStore::open_read_only(&env.paths.content).expect("open");
    assert!(content.get_block("b1").expect("read").is_none());

    let audit = AuditLog::open_read_only(&env.paths.audit).expect("audit");
    let merges = audit
        .merge_log_for_session(&session.id)
        .expect("merge log");
    assert_eq!(merges.len(), 1);
    assert_eq!(merges[0].status, "failed");
}
