// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};

use clap::Parser;

/// Persistent PTY supervisor for command-line agents.
#[derive(Debug, Parser)]
#[command(name = "codewire", version, about)]
pub struct Config {
    /// Data directory (default: $HOME/.codewire).
    #[arg(long, env = "CODEWIRE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Unix socket path (default: <data_dir>/codewire.sock).
    #[arg(long, env = "CODEWIRE_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Optional WebSocket listen address (e.g. 127.0.0.1:7070).
    #[arg(long, env = "CODEWIRE_WS_ADDR")]
    pub ws_addr: Option<String>,

    /// Log format (json or text).
    #[arg(long, env = "CODEWIRE_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "CODEWIRE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Seconds between periodic persistence sweeps.
    #[arg(long, env = "CODEWIRE_PERSIST_INTERVAL", default_value = "5")]
    pub persist_interval: u64,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("invalid log format: {}", self.log_format);
        }
        if self.persist_interval == 0 {
            anyhow::bail!("--persist-interval must be at least 1 second");
        }
        if let Some(addr) = &self.ws_addr {
            addr.parse::<std::net::SocketAddr>()
                .map_err(|e| anyhow::anyhow!("invalid --ws-addr {addr:?}: {e}"))?;
        }
        Ok(())
    }

    /// Resolve the data directory; `HOME` supplies the default.
    pub fn resolve_data_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let home = std::env::var_os("HOME")
            .ok_or_else(|| anyhow::anyhow!("HOME is not set and --data-dir was not given"))?;
        Ok(PathBuf::from(home).join(".codewire"))
    }

    pub fn socket_path(&self, data_dir: &Path) -> PathBuf {
        self.socket.clone().unwrap_or_else(|| data_dir.join("codewire.sock"))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
