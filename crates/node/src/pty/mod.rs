// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY allocation and non-blocking master-side I/O.

mod nbio;
mod spawn;

pub use nbio::{read_chunk, write_all, MasterFd};
pub use spawn::{child_env, resolve_program, ExitWait, PtyProcess, SpawnOptions};

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
