#![forbid(unsafe_code)]

use std::path::PathBuf;
use tessera_core::{Block, SessionStatus, UserType};
use tessera_storage::{
    init_stores, AuditLog, ContentStore, DataPaths, Merger, MergerConfig, QueueDirs,
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

fn merger_config(env: &Env) -> MergerConfig {
    MergerConfig::new(
        &env.paths.content,
        &env.paths.schema,
        &env.paths.audit,
        env.queue.clone(),
    )
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
fn interrupted_sessions_move_to_failed_on_startup() {
    let env = setup("interrupted_recovery");
    let session = env.manager.create("u1", UserType::Human).expect("create");
    env.manager
        .insert_block(&session.id, paragraph("b1", "in flight"))
        .expect("insert");
    env.manager.submit(&session.id).expect("submit");

    // Simulate a crash after the claim: the file sits in processing/.
    let name = format!("{}.db", session.id);
    std::fs::rename(
        env.queue.pending.join(&name),
        env.queue.processing.join(&name),
    )
    .expect("simulate claim");

    // A fresh merger recovers on startup.
    let _merger = Merger::new(merger_config(&env)).expect("merger");
    assert!(env.queue.failed.join(&name).exists());
    assert!(!env.queue.processing.join(&name).exists());

    // The canonical store saw no partial transaction.
    let content = ContentStore::open_read_only(&env.paths.content).expect("open");
    assert!(content.get_block("b1").expect("read").is_none());
}

#[test]
fn recovery_can_be_disabled() {
    let env = setup("recovery_disabled");
    let session = env.manager.create("u1", UserType::Human).expect("create");
    env.manager.submit(&session.id).expect("submit");
    let name = format!("{}.db", session.id);
    std::fs::rename(
        env.queue.pending.join(&name),
        env.queue.processing.join(&name),
    )
    .expect("simulate claim");

    let mut cfg = merger_config(&env);
    cfg.recover_on_startup = false;
    let _merger = Merger::new(cfg).expect("merger");
    assert!(env.queue.processing.join(&name).exists());
}

#[test]
fn replaying_a_merged_session_is_a_noop() {
    let env = setup("replay_merged");
    let session = env.manager.create("u1", UserType::Human).expect("create");
    env.manager
        .insert_block(&session.id, paragraph("b1", "once"))
        .expect("insert");
    env.manager.submit(&session.id).expect("submit");

    let mut merger = Merger::new(merger_config(&env)).expect("merger");
    merger.run_once().expect("first sweep");

    let name = format!("{}.db", session.id);
    let done = env.queue.done.join(&name);
    assert!(done.exists());

    // An operator drags the merged file back into pending by mistake.
    std::fs::copy(&done, env.queue.pending.join(&name)).expect("requeue copy");
    merger.run_once().expect("second sweep");

    // Journal rows are already marked merged, so nothing re-applies.
    let content = ContentStore::open_read_only(&env.paths.content).expect("open");
    let block = content.get_live_block("b1").expect("read").expect("exists");
    assert_eq!(block.content, "once");

    let audit = AuditLog::open_read_only(&env.paths.audit).expect("audit");
    let merges = audit
        .merge_log_for_session(&session.id)
        .expect("merge log");
    assert_eq!(merges.len(), 2);
    assert!(merges.iter().all(|m| m.status == "success"));
    assert_eq!(merges[1].blocks_inserted, 0);
}

#[test]
fn manager_rescans_session_files_on_startup() {
    let env = setup("manager_rescan");
    let session = env.manager.create("u1", UserType::Human).expect("create");
    env.manager
        .insert_block(&session.id, paragraph("b1", "persisted"))
        .expect("insert");

    // A second manager over the same directories sees the session.
    let sessions_dir = session.db_path.parent().expect("sessions dir").to_path_buf();
    let manager2 = SessionManager::new(SessionManagerConfig::new(
        sessions_dir,
        &env.paths.content,
        &env.paths.schema,
        env.queue.clone(),
    ))
    .expect("second manager");

    let found = manager2.get(&session.id).expect("session reloaded");
    assert_eq!(found.user_id, "u1");
    assert_eq!(found.status, SessionStatus::Active);
}
