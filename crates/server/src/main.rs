#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera_storage::{
    init_stores, BackupConfig, BackupManager, BackupStore, CacheConfig, DataPaths, Gc, GcConfig,
    Merger, MergerConfig, PageCache, QueueDirs, SchemaCatalog, SessionManager,
    SessionManagerConfig, StorageError,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tessera", about = "Block-structured content store")]
struct Cli {
    /// Directory holding the durable stores.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,
    /// Directory holding active session files.
    #[arg(long, default_value = "./sessions")]
    sessions_dir: PathBuf,
    /// Root of the pending/processing/done/failed queue.
    #[arg(long, default_value = "./queue")]
    queue_dir: PathBuf,
    /// Page cache directory.
    #[arg(long, default_value = "./cache/pages")]
    cache_dir: PathBuf,
    /// Backup snapshot directory.
    #[arg(long, default_value = "./backup")]
    backup_dir: PathBuf,
    /// Enable debug logging (RUST_LOG overrides).
    #[arg(long)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the stores from the embedded DDL.
    Init,
    /// Run the merger, GC and backup daemons until interrupted.
    Serve {
        #[arg(long, default_value_t = 500)]
        poll_interval_ms: u64,
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
        #[arg(long, default_value_t = 30_000)]
        lock_timeout_ms: u64,
        #[arg(long, default_value_t = 6)]
        gc_interval_hours: u64,
        #[arg(long, default_value_t = 24)]
        backup_interval_hours: u64,
        #[arg(long, default_value_t = 100)]
        cache_max_size_mb: u64,
        #[arg(long, default_value_t = 24)]
        cache_ttl_hours: u64,
        #[arg(long)]
        cache_disabled: bool,
    },
    /// Verify canonical-store invariants and report violations.
    Check,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if let Err(err) = run(cli) {
        tracing::error!(error = %err, "fatal");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), StorageError> {
    match cli.command {
        Command::Init => {
            init_stores(&cli.data_dir)?;
            QueueDirs::under(&cli.queue_dir).ensure()?;
            std::fs::create_dir_all(&cli.sessions_dir)?;
            std::fs::create_dir_all(&cli.cache_dir)?;
            std::fs::create_dir_all(&cli.backup_dir)?;
            Ok(())
        }
        Command::Serve {
            poll_interval_ms,
            max_retries,
            lock_timeout_ms,
            gc_interval_hours,
            backup_interval_hours,
            cache_max_size_mb,
            cache_ttl_hours,
            cache_disabled,
        } => serve(
            &cli,
            ServeOptions {
                poll_interval_ms,
                max_retries,
                lock_timeout_ms,
                gc_interval_hours,
                backup_interval_hours,
                cache_max_size_mb,
                cache_ttl_hours,
                cache_enabled: !cache_disabled,
            },
        ),
        Command::Check => check(&cli),
    }
}

struct ServeOptions {
    poll_interval_ms: u64,
    max_retries: u32,
    lock_timeout_ms: u64,
    gc_interval_hours: u64,
    backup_interval_hours: u64,
    cache_max_size_mb: u64,
    cache_ttl_hours: u64,
    cache_enabled: bool,
}

fn serve(cli: &Cli, opts: ServeOptions) -> Result<(), StorageError> {
    let paths = DataPaths::under(&cli.data_dir);
    if !paths.all_exist() {
        tracing::error!(data_dir = %cli.data_dir.display(), "stores not found, run `tessera init` first");
        return Err(StorageError::InvalidInput("stores not initialized"));
    }

    let queue = QueueDirs::under(&cli.queue_dir);
    queue.ensure()?;
    std::fs::create_dir_all(&cli.sessions_dir)?;

    let cache = Arc::new(PageCache::new(CacheConfig {
        dir: cli.cache_dir.clone(),
        max_size_mb: opts.cache_max_size_mb,
        ttl_hours: opts.cache_ttl_hours,
        enabled: opts.cache_enabled,
    })?);

    // The session manager is handed to the API layer; constructing it
    // here also rescans any session files left from a previous run.
    let session_manager = SessionManager::new(SessionManagerConfig::new(
        &cli.sessions_dir,
        &paths.content,
        &paths.schema,
        queue.clone(),
    ))?;
    tracing::info!(
        sessions = session_manager.list_sessions().len(),
        "session manager ready"
    );

    let mut merger_cfg = MergerConfig::new(&paths.content, &paths.schema, &paths.audit, queue.clone());
    merger_cfg.poll_interval_ms = opts.poll_interval_ms;
    merger_cfg.max_retries = opts.max_retries;
    merger_cfg.lock_timeout_ms = opts.lock_timeout_ms;
    let merger = Merger::new(merger_cfg)?.with_cache(cache.clone());
    let merger_handle = merger.start();

    let mut gc_cfg = GcConfig::new(&cli.sessions_dir, queue.clone(), &paths.content, &paths.audit);
    gc_cfg.interval_hours = opts.gc_interval_hours;
    let gc_handle = Gc::new(gc_cfg).start();

    let mut backup_cfg = BackupConfig::new(
        &cli.backup_dir,
        vec![
            BackupStore {
                name: "content".to_string(),
                path: paths.content.clone(),
            },
            BackupStore {
                name: "schema".to_string(),
                path: paths.schema.clone(),
            },
            BackupStore {
                name: "users".to_string(),
                path: paths.users.clone(),
            },
            BackupStore {
                name: "audit".to_string(),
                path: paths.audit.clone(),
            },
        ],
    );
    backup_cfg.interval_hours = opts.backup_interval_hours;
    let backup_handle = BackupManager::new(backup_cfg)?.start();

    // Graceful shutdown on SIGINT/SIGTERM; daemons finish their current
    // item before exiting.
    let shutdown = Arc::new(AtomicBool::new(false));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone());
    let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone());

    tracing::info!("serving; press ctrl-c to stop");
    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }
    tracing::info!("shutdown signal received");

    merger_handle.stop();
    gc_handle.stop();
    backup_handle.stop();
    tracing::info!("goodbye");
    Ok(())
}

fn check(cli: &Cli) -> Result<(), StorageError> {
    let paths = DataPaths::under(&cli.data_dir);
    let content = tessera_storage::ContentStore::open_read_only(&paths.content)?;
    let catalog = SchemaCatalog::open_read_only(&paths.schema)?;
    let symmetric = catalog.symmetric_relation_names()?;
    let violations = content.check_integrity(&symmetric)?;
    if violations.is_empty() {
        tracing::info!("canonical store is consistent");
        return Ok(());
    }
    for violation in &violations {
        tracing::error!("{violation}");
    }
    Err(StorageError::InvalidInput("integrity violations found"))
}
