// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::ffi::CString;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{chdir, execve, Pid};
use tokio::io::unix::AsyncFd;

use super::nbio::{set_nonblocking, MasterFd};
use crate::error::NodeError;

/// Exit code reported when the child dies to a signal: `128 + signo`.
pub(crate) fn signal_exit_code(sig: Signal) -> i32 {
    128 + sig as i32
}

/// Compute the child's environment from the parent's.
///
/// `CLAUDECODE` is always removed (an embedded agent must not detect itself
/// as re-entrant), overrides replace an existing key in place or append, and
/// everything else passes through. `TERM` is defaulted when absent since the
/// child runs on a PTY.
pub fn child_env(
    parent: impl IntoIterator<Item = (String, String)>,
    overrides: &[(String, String)],
) -> Vec<String> {
    let mut vars: Vec<(String, String)> =
        parent.into_iter().filter(|(key, _)| key != "CLAUDECODE").collect();
    for (key, value) in overrides {
        match vars.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1 = value.clone(),
            None => vars.push((key.clone(), value.clone())),
        }
    }
    if !vars.iter().any(|(k, _)| k == "TERM") {
        vars.push(("TERM".to_owned(), "xterm-256color".to_owned()));
    }
    vars.into_iter().map(|(k, v)| format!("{k}={v}")).collect()
}

/// Resolve a program to an executable path: as-is when it contains a slash,
/// otherwise via `PATH` lookup.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).map(|dir| dir.join(program)).find(|p| is_executable(p))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

pub struct SpawnOptions<'a> {
    pub command: &'a [String],
    pub working_dir: &'a Path,
    pub env_overrides: &'a [(String, String)],
    pub cols: u16,
    pub rows: u16,
}

/// A child process on a fresh PTY.
///
/// `forkpty` makes the child a session leader on the slave side, so the
/// whole process tree can be signalled through its process group without
/// touching sibling sessions.
pub struct PtyProcess {
    master: Arc<AsyncFd<MasterFd>>,
    pid: Pid,
    reaped: Arc<AtomicBool>,
}

impl PtyProcess {
    // forkpty requires unsafe: the child is partially initialized until exec
    #[allow(unsafe_code)]
    pub fn spawn(opts: &SpawnOptions<'_>) -> Result<Self, NodeError> {
        let program = opts
            .command
            .first()
            .ok_or_else(|| NodeError::SpawnFailed("empty command".to_owned()))?;
        if !opts.working_dir.is_dir() {
            return Err(NodeError::SpawnFailed(format!(
                "working dir {} is not a directory",
                opts.working_dir.display()
            )));
        }
        let resolved = resolve_program(program)
            .ok_or_else(|| NodeError::SpawnFailed(format!("executable not found: {program}")))?;

        // Everything the child needs is materialised before forking; the
        // child only chdirs and execs.
        let c_path = cstring(resolved.as_os_str().as_bytes())?;
        let c_args: Vec<CString> =
            opts.command.iter().map(|a| cstring(a.as_bytes())).collect::<Result<_, _>>()?;
        let c_env: Vec<CString> = child_env(std::env::vars(), opts.env_overrides)
            .into_iter()
            .map(|kv| cstring(kv.as_bytes()))
            .collect::<Result<_, _>>()?;

        let winsize = Winsize {
            ws_col: opts.cols,
            ws_row: opts.rows,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // SAFETY: forkpty is unsafe because the child is in a partially
        // initialized state after fork. The child performs only
        // async-signal-safe work (chdir, execve, _exit) on pre-built data.
        let result = unsafe { forkpty(&winsize, None) }
            .map_err(|e| NodeError::SpawnFailed(format!("forkpty failed: {e}")))?;
        match result {
            ForkptyResult::Child => {
                if chdir(opts.working_dir).is_err() {
                    // SAFETY: _exit is async-signal-safe and does not unwind.
                    unsafe { libc::_exit(126) }
                }
                let _ = execve(&c_path, &c_args, &c_env);
                // SAFETY: exec failed; leave without unwinding into the runtime.
                unsafe { libc::_exit(127) }
            }
            ForkptyResult::Parent { child, master } => {
                set_nonblocking(&master)
                    .map_err(|e| NodeError::SpawnFailed(format!("set_nonblocking failed: {e}")))?;
                let afd = AsyncFd::new(MasterFd(master))
                    .map_err(|e| NodeError::SpawnFailed(format!("AsyncFd::new failed: {e}")))?;
                Ok(Self {
                    master: Arc::new(afd),
                    pid: child,
                    reaped: Arc::new(AtomicBool::new(false)),
                })
            }
        }
    }

    pub fn master(&self) -> Arc<AsyncFd<MasterFd>> {
        Arc::clone(&self.master)
    }

    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Set the PTY window size.
    // TIOCSWINSZ requires unsafe for the libc::ioctl call
    #[allow(unsafe_code)]
    pub fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        let ws = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
        // SAFETY: TIOCSWINSZ is a well-defined ioctl on the PTY master fd
        // and the Winsize struct is fully initialized.
        let ret = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            anyhow::bail!("TIOCSWINSZ ioctl failed: {}", std::io::Error::last_os_error());
        }
        Ok(())
    }

    /// Deliver a signal to the child's process group (falling back to the
    /// child itself). No-op once the child has been reaped, so a recycled
    /// pid is never signalled.
    pub fn signal(&self, sig: Signal) {
        if self.reaped.load(Ordering::Acquire) {
            return;
        }
        if killpg(self.pid, sig).is_err() {
            let _ = kill(self.pid, sig);
        }
    }

    /// Handle for the blocking reaper thread.
    pub fn exit_wait(&self) -> ExitWait {
        ExitWait { pid: self.pid, reaped: Arc::clone(&self.reaped) }
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        // Best-effort shutdown of a still-live child when the session is
        // dropped (node shutdown): SIGTERM, brief grace, SIGKILL.
        if self.reaped.load(Ordering::Acquire) {
            return;
        }
        let _ = killpg(self.pid, Signal::SIGTERM);
        std::thread::sleep(std::time::Duration::from_millis(50));
        if !self.reaped.load(Ordering::Acquire) {
            let _ = killpg(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, Some(WaitPidFlag::WNOHANG));
        }
    }
}

/// Blocks until the child exits and reports its exit code.
pub struct ExitWait {
    pid: Pid,
    reaped: Arc<AtomicBool>,
}

impl ExitWait {
    /// Block until the child exits. Call from a blocking thread.
    ///
    /// Signal death maps to `128 + signo`; wait errors map to the `-1`
    /// sentinel.
    pub fn wait(self) -> i32 {
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => {
                    self.reaped.store(true, Ordering::Release);
                    return code;
                }
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    self.reaped.store(true, Ordering::Release);
                    return signal_exit_code(sig);
                }
                Ok(_) => continue,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => {
                    self.reaped.store(true, Ordering::Release);
                    return -1;
                }
            }
        }
    }
}

fn cstring(bytes: &[u8]) -> Result<CString, NodeError> {
    CString::new(bytes)
        .map_err(|_| NodeError::SpawnFailed("argument contains NUL byte".to_owned()))
}
