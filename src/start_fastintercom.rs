//! Startup helpers shared by the `fastintercom` and `fastintercom-server` binaries.
//!
//! Logs go to stderr so the stdio tool server keeps stdout for JSON-RPC.

use std::future::Future;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::mirror::core::config::{MirrorConfig, app_dir};
use crate::mirror::engine::core::MirrorEngine;
use crate::mirror::maintenance::background_sync::BackgroundSync;
use crate::server::{self, AppState, StdioServer};
use crate::tools::render::humanize_since;

/// Days of history synced first when `init` gets a negative value.
pub const DEFAULT_SYNC_DAYS: u32 = 7;

/// Install the global tracing subscriber writing to stderr.
///
/// `RUST_LOG` directives are honoured on top of the base level.
pub fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .try_init();
}

/// Drive `future` on a fresh runtime and turn its outcome into an exit code.
#[must_use]
pub fn block_on<F>(future: F) -> ExitCode
where
    F: Future<Output = Result<()>>,
{
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match rt.block_on(future) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

/// Load configuration from `path` or the default location.
///
/// # Errors
/// Returns an error if the file exists but is unreadable or invalid.
pub fn load_config(path: Option<&Path>) -> Result<MirrorConfig> {
    MirrorConfig::load(path).context("Error loading configuration")
}

/// Normalize the `--sync-days` flag: negative means the default, 0 means all history.
#[must_use]
pub fn normalize_sync_days(days: i64) -> u32 {
    if days < 0 {
        DEFAULT_SYNC_DAYS
    } else {
        u32::try_from(days).unwrap_or(u32::MAX)
    }
}

/// `fastintercom init`: persist credentials and create the database.
///
/// # Errors
/// Returns an error if the config cannot be written or the database opened.
pub async fn run_init(config_path: Option<PathBuf>, token: Option<String>, sync_days: i64) -> Result<()> {
    let path = config_path.unwrap_or_else(MirrorConfig::default_path);
    let mut config = load_config(Some(path.as_path()))?;
    if let Some(token) = token {
        config.remote.access_token = Some(token);
    }
    if config.remote.access_token.is_none() {
        tracing::warn!("No Intercom access token configured, remote sync stays unavailable");
    }
    config.remote.initial_sync_days = normalize_sync_days(sync_days);
    config
        .save(&path)
        .with_context(|| format!("Failed to write configuration to {}", path.display()))?;
    tracing::info!("Configuration saved to {}", path.display());

    let engine = MirrorEngine::open(config)
        .await
        .context("Failed to initialize database")?;
    tracing::info!(
        "Database initialized at {}",
        engine.config().storage.database_path.display()
    );
    engine.close();
    Ok(())
}

/// `fastintercom start`: serve the tools over stdin/stdout.
///
/// # Errors
/// Returns an error if the database cannot be opened or stdio fails.
pub async fn run_start(config: MirrorConfig) -> Result<()> {
    let state = AppState::from_config(config)
        .await
        .context("Failed to open mirror")?;
    let background = spawn_background_sync(state.engine());

    StdioServer::new(Arc::clone(&state.dispatcher))
        .run()
        .await
        .context("Stdio server failed")?;

    background.notify_one();
    state.engine().close();
    Ok(())
}

/// `fastintercom serve`: serve the tools over HTTP until Ctrl+C.
///
/// # Errors
/// Returns an error if the database cannot be opened or the listener fails.
pub async fn run_serve(config: MirrorConfig, port: Option<u16>) -> Result<()> {
    let mut server_config = config.server.clone();
    if let Some(port) = port {
        server_config.port = port;
    }
    let listener = server::bind(&server_config)
        .await
        .with_context(|| format!("Failed to bind {}", server_config.socket_addr()))?;
    let state = AppState::from_config(config)
        .await
        .context("Failed to open mirror")?;
    let background = spawn_background_sync(state.engine());

    server::serve(listener, Arc::clone(&state), shutdown_signal())
        .await
        .context("Server error")?;

    background.notify_one();
    state.engine().close();
    Ok(())
}

/// `fastintercom status`: print counts, size and recent sync activity.
///
/// # Errors
/// Returns an error if the database cannot be read.
#[allow(clippy::print_stdout)]
pub async fn run_status(config: MirrorConfig) -> Result<()> {
    if !config.storage.database_path.exists() {
        println!("Database not found. Run 'fastintercom init' first.");
        return Ok(());
    }

    let engine = MirrorEngine::open(config)
        .await
        .context("Failed to open mirror")?;
    let status = engine
        .status_with_recent(5)
        .await
        .context("Failed to read status")?;
    engine.close();

    println!("FastIntercom Server Status");
    println!("{}", "=".repeat(40));
    println!("Storage: {:.2} MB", status.database_size_mb);
    println!("Conversations: {}", status.total_conversations);
    println!("Messages: {}", status.total_messages);
    println!("Last Sync: {}", humanize_since(status.last_sync, Utc::now()));
    println!("Database: {}", status.database_path.display());

    if !status.recent_syncs.is_empty() {
        println!();
        println!("Recent Sync Activity:");
        for period in &status.recent_syncs {
            println!(
                "  {}: {} conversations ({} new)",
                period.last_synced.format("%m/%d %H:%M"),
                period.conversation_count,
                period.new_conversations
            );
        }
    }
    Ok(())
}

/// `fastintercom reset`: delete the data directory after confirmation.
///
/// # Errors
/// Returns an error if the confirmation cannot be read or deletion fails.
#[allow(clippy::print_stdout)]
pub fn run_reset(config: &MirrorConfig, yes: bool) -> Result<()> {
    if !yes && !confirm("Are you sure you want to reset all data? [y/N] ")? {
        println!("Aborted.");
        return Ok(());
    }

    let dir = app_dir();
    let mut removed = false;
    if dir.exists() {
        std::fs::remove_dir_all(&dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
        removed = true;
    }

    // Databases configured outside the app directory are removed with their sidecars.
    let db = &config.storage.database_path;
    if !db.starts_with(&dir) {
        for path in database_files(db) {
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                removed = true;
            }
        }
    }

    if removed {
        println!("All FastIntercom data has been reset.");
    } else {
        println!("No data found to reset.");
    }
    Ok(())
}

/// The database file and its `-wal`/`-shm` sidecars.
fn database_files(db: &Path) -> [PathBuf; 3] {
    let with_suffix = |suffix: &str| {
        let mut name = db.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    };
    [db.to_path_buf(), with_suffix("-wal"), with_suffix("-shm")]
}

fn confirm(prompt: &str) -> Result<bool> {
    let mut stderr = std::io::stderr();
    stderr.write_all(prompt.as_bytes())?;
    stderr.flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Run the HTTP server (used by the `fastintercom-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run_server() -> ExitCode {
    init_tracing(false);
    tracing::info!("Starting FastIntercom v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_config(None) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e:#}");
            return ExitCode::from(1);
        }
    };
    block_on(run_serve(config, None))
}

fn spawn_background_sync(engine: &Arc<MirrorEngine>) -> Arc<tokio::sync::Notify> {
    let worker = BackgroundSync::new(Arc::clone(engine), engine.config().sync.background.clone());
    let shutdown = worker.shutdown_notifier();
    drop(worker.spawn());
    shutdown
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
