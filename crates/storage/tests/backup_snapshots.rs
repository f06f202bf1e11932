#![forbid(unsafe_code)]

use rusqlite::Connection;
use std::path::PathBuf;
use tessera_storage::{init_stores, BackupConfig, BackupManager, BackupStore};

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

#[test]
fn run_now_snapshots_every_store() {
    let root = temp_root("backup_run_now");
    let paths = init_stores(root.join("data")).expect("init stores");

    let manager = BackupManager::new(BackupConfig::new(
        root.join("backup"),
        vec![
            BackupStore {
                name: "content".to_string(),
                path: paths.content.clone(),
            },
            BackupStore {
                name: "schema".to_string(),
                path: paths.schema.clone(),
            },
        ],
    ))
    .expect("backup manager");

    let written = manager.run_now().expect("run backup");
    assert_eq!(written.len(), 2);
    for path in &written {
        assert!(path.exists());
    }

    let listed = manager.list_backups().expect("list backups");
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|b| b.name.ends_with("_content")));
    assert!(listed.iter().any(|b| b.name.ends_with("_schema")));

    // The snapshot is a usable store.
    let snapshot = written
        .iter()
        .find(|p| p.to_string_lossy().contains("_schema"))
        .expect("schema snapshot");
    let conn = Connection::open(snapshot).expect("open snapshot");
    let version: i64 = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get(0)
        })
        .expect("read version");
    assert_eq!(version, 1);
}

#[test]
fn max_backups_bounds_snapshots_per_store() {
    let root = temp_root("backup_prune");
    let paths = init_stores(root.join("data")).expect("init stores");

    let mut cfg = BackupConfig::new(
        root.join("backup"),
        vec![BackupStore {
            name: "content".to_string(),
            path: paths.content.clone(),
        }],
    );
    cfg.max_backups = 1;
    let manager = BackupManager::new(cfg).expect("backup manager");

    manager.run_now().expect("first run");
    std::thread::sleep(std::time::Duration::from_millis(1100));
    manager.run_now().expect("second run");

    let listed = manager.list_backups().expect("list backups");
    assert_eq!(listed.len(), 1, "older snapshot was pruned");
}
