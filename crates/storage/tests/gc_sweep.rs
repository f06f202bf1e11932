#![forbid(unsafe_code)]

use rusqlite::Connection;
use std::path::PathBuf;
use tessera_core::{Block, UserType};
use tessera_storage::{
    init_stores, DataPaths, Gc, GcConfig, Merger, MergerConfig, QueueDirs, SessionManager,
    SessionManagerConfig,
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
    sessions_dir: PathBuf,
    manager: SessionManager,
}

fn setup(test_name: &str) -> Env {
    let root = temp_root(test_name);
    let paths = init_stores(root.join("data")).expect("init stores");
    let queue = QueueDirs::under(root.join("queue"));
    queue.ensure().expect("queue dirs");
    let sessions_dir = root.join("sessions");
    let manager = SessionManager::new(SessionManagerConfig::new(
        &sessions_dir,
        &paths.content,
        &paths.schema,
        queue.clone(),
    ))
    .expect("session manager");
    Env {
        paths,
        queue,
        sessions_dir,
        manager,
    }
}

fn gc_config(env: &Env) -> GcConfig {
    GcConfig::new(
        &env.sessions_dir,
        env.queue.clone(),
        &env.paths.content,
        &env.paths.audit,
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
fn stale_active_sessions_are_reclaimed() {
    let env = setup("stale_sessions");
    let stale = env.manager.create("alice", UserType::Human).expect("stale");
    std::thread::sleep(std::time::Duration::from_millis(10));

    // Zero-day horizon: anything with past activity is reclaimable.
    let mut cfg = gc_config(&env);
    cfg.abandoned_days = 0;
    let report = Gc::new(cfg).run_cycle();
    assert_eq!(report.abandoned_removed, 1);
    assert!(!stale.db_path.exists());

    // With the default horizon a fresh session survives.
    let fresh = env.manager.create("bob", UserType::Human).expect("fresh");
    let report = Gc::new(gc_config(&env)).run_cycle();
    assert_eq!(report.abandoned_removed, 0);
    assert!(fresh.db_path.exists());
}

#[test]
fn submitted_sessions_are_not_abandoned_material() {
    let env = setup("submitted_not_reclaimed");
    let session = env.manager.create("alice", UserType::Human).expect("create");
    env.manager.submit(&session.id).expect("submit");
    std::thread::sleep(std::time::Duration::from_millis(10));

    let mut cfg = gc_config(&env);
    cfg.abandoned_days = 0;
    let report = Gc::new(cfg).run_cycle();
    // The file is in the queue, not the sessions dir; the queue sweeps
    // only touch done/ and failed/.
    assert_eq!(report.abandoned_removed, 0);
    assert!(env
        .queue
        .pending
        .join(format!("{}.db", session.id))
        .exists());
}

#[test]
fn done_and_failed_files_expire_by_age() {
    let env = setup("queue_expiry");
    let mut merger = Merger::new(MergerConfig::new(
        &env.paths.content,
        &env.paths.schema,
        &env.paths.audit,
        env.queue.clone(),
    ))
    .expect("merger");

    let merged = env.manager.create("alice", UserType::Human).expect("a");
    env.manager
        .insert_block(&merged.id, paragraph("b1", "x"))
        .expect("insert");
    env.manager.submit(&merged.id).expect("submit");
    merger.run_once().expect("sweep");
    assert!(env.queue.done.join(format!("{}.db", merged.id)).exists());

    // Zero-day retention drains done/ immediately; failed/ keeps its file
    // under the default 30-day horizon.
    let mut cfg = gc_config(&env);
    cfg.merged_days = 0;
    let report = Gc::new(cfg).run_cycle();
    assert_eq!(report.merged_removed, 1);
    assert!(!env.queue.done.join(format!("{}.db", merged.id)).exists());
    assert_eq!(report.failed_removed, 0);
}

#[test]
fn audit_rows_are_trimmed_by_retention() {
    let env = setup("audit_trim");
    let mut merger = Merger::new(MergerConfig::new(
        &env.paths.content,
        &env.paths.schema,
        &env.paths.audit,
        env.queue.clone(),
    ))
    .expect("merger");
    let session = env.manager.create("alice", UserType::Human).expect("a");
    env.manager
        .insert_block(&session.id, paragraph("b1", "x"))
        .expect("insert");
    env.manager.submit(&session.id).expect("submit");
    merger.run_once().expect("sweep");
    std::thread::sleep(std::time::Duration::from_millis(10));

    let count_rows = |table: &str| -> i64 {
        let conn = Connection::open(&env.paths.audit).expect("open audit");
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .expect("count")
    };
    assert!(count_rows("audit_log") > 0);
    assert!(count_rows("merge_log") > 0);

    let mut cfg = gc_config(&env);
    cfg.audit_retention_days = 0;
    let report = Gc::new(cfg).run_cycle();
    assert!(report.audit_rows_trimmed > 0);
    assert_eq!(count_rows("audit_log"), 0);
    assert_eq!(count_rows("merge_log"), 0);
}

#[test]
fn vacuum_runs_only_inside_the_window() {
    let env = setup("vacuum_window");

    let mut cfg = gc_config(&env);
    cfg.vacuum_start_hour = 0;
    cfg.vacuum_end_hour = 24;
    cfg.vacuum_threshold = 0;
    let report = Gc::new(cfg).run_cycle();
    assert_eq!(report.vacuums_run, 2, "content and audit stores compacted");

    let mut cfg = gc_config(&env);
    cfg.vacuum_start_hour = 0;
    cfg.vacuum_end_hour = 0;
    cfg.vacuum_threshold = 0;
    let report = Gc::new(cfg).run_cycle();
    assert_eq!(report.vacuums_run, 0, "empty window disables compaction");
}
