// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node runtime: listeners, periodic persistence, signal handling.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::dispatch::ws::{self, WsState};
use crate::dispatch::Connection;
use crate::frame::{FrameReader, FrameWriter};
use crate::manager::SessionManager;

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / CODEWIRE_LOG_LEVEL > RUST_LOG > default.
    let filter = if std::env::var("CODEWIRE_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// A node with listeners bound and background tasks running.
///
/// Returned by [`prepare`] so callers (and tests) can reach the manager and
/// the shutdown token before entering [`PreparedNode::run`].
pub struct PreparedNode {
    pub manager: Arc<SessionManager>,
    pub shutdown: CancellationToken,
    pub socket_path: PathBuf,
    pid_path: PathBuf,
}

impl PreparedNode {
    /// Block until shutdown, then flush state and remove the rendezvous
    /// files. Returns the process exit code.
    pub async fn run(self) -> anyhow::Result<i32> {
        self.shutdown.cancelled().await;

        self.manager.refresh_statuses().await;
        if let Err(e) = self.manager.persist().await {
            error!("final persist failed: {e}");
        }
        let _ = std::fs::remove_file(&self.socket_path);
        let _ = std::fs::remove_file(&self.pid_path);
        info!("codewire node stopped");
        Ok(0)
    }
}

/// Run the node to completion.
pub async fn run(config: Config) -> anyhow::Result<i32> {
    let node = prepare(config).await?;
    spawn_signal_handler(node.shutdown.clone());
    node.run().await
}

/// Bind listeners, restore state, and start the background tasks.
pub async fn prepare(config: Config) -> anyhow::Result<PreparedNode> {
    init_tracing(&config);

    let data_dir = config.resolve_data_dir()?;
    std::fs::create_dir_all(&data_dir)?;
    std::fs::set_permissions(&data_dir, Permissions::from_mode(0o755))?;

    let (manager, persist_rx) = SessionManager::new(&data_dir)?;
    let shutdown = CancellationToken::new();

    // PID file, replacing any stale one.
    let pid_path = data_dir.join("codewire.pid");
    std::fs::write(&pid_path, format!("{}\n", std::process::id()))?;

    // Unix socket rendezvous: remove stale, bind, clamp to owner-only.
    let socket_path = config.socket_path(&data_dir);
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;
    std::fs::set_permissions(&socket_path, Permissions::from_mode(0o600))?;
    info!(path = %socket_path.display(), "unix socket listening");

    spawn_persister(Arc::clone(&manager), persist_rx, config.persist_interval, shutdown.clone());
    spawn_accept_loop(listener, Arc::clone(&manager), shutdown.clone());

    if let Some(addr) = &config.ws_addr {
        let tcp = TcpListener::bind(addr).await?;
        info!(addr = %tcp.local_addr()?, "websocket listening");
        let state = Arc::new(WsState {
            manager: Arc::clone(&manager),
            shutdown: shutdown.clone(),
        });
        let router = ws::router(state);
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let result =
                axum::serve(tcp, router).with_graceful_shutdown(sd.cancelled_owned()).await;
            if let Err(e) = result {
                error!("websocket server error: {e}");
            }
        });
    }

    Ok(PreparedNode { manager, shutdown, socket_path, pid_path })
}

/// Wakes on the manager's one-slot trigger (coalescing bursts) and on a
/// periodic tick; refreshes statuses, sweeps dead pending requests, and
/// persists.
fn spawn_persister(
    manager: Arc<SessionManager>,
    mut persist_rx: mpsc::Receiver<()>,
    interval_secs: u64,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = persist_rx.recv() => {}
                _ = tick.tick() => {}
            }
            manager.refresh_statuses().await;
            manager.sweep_pending();
            if let Err(e) = manager.persist().await {
                error!("persist failed: {e}");
            }
        }
        debug!("persister stopped");
    });
}

fn spawn_accept_loop(
    listener: UnixListener,
    manager: Arc<SessionManager>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accept = listener.accept() => match accept {
                    Ok((stream, _addr)) => {
                        let (read_half, write_half) = stream.into_split();
                        let conn = Connection {
                            reader: Box::new(FrameReader::new(read_half)),
                            writer: Box::new(FrameWriter::new(write_half)),
                            manager: Arc::clone(&manager),
                            shutdown: shutdown.clone(),
                        };
                        tokio::spawn(conn.run());
                    }
                    Err(e) => debug!("unix accept error: {e}"),
                }
            }
        }
        debug!("accept loop stopped");
    });
}

/// First SIGTERM/SIGINT cancels everything for a clean stop; a second
/// forces exit.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM again, forcing exit");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
