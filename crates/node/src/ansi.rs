// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ANSI escape stripping for log output and session snippets.

use std::sync::LazyLock;

use regex::bytes::Regex;

// CSI sequences, OSC sequences (BEL or ST terminated), and single-character
// escapes. Input is raw PTY bytes, so the regex runs in bytes mode.
#[allow(clippy::unwrap_used)] // pattern is a compile-time constant
static ESCAPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)?|[@-Z\\^_])")
        .unwrap()
});

/// Remove ANSI escape sequences, leaving printable bytes and line endings.
pub fn strip_ansi(input: &[u8]) -> Vec<u8> {
    ESCAPES.replace_all(input, &b""[..]).into_owned()
}

/// The last non-empty line of `input` after escape stripping, trimmed and
/// capped at `max_len` characters. Used for `last_output_snippet`.
pub fn last_line_snippet(input: &[u8], max_len: usize) -> Option<String> {
    let clean = strip_ansi(input);
    let text = String::from_utf8_lossy(&clean);
    let line = text.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
    Some(line.chars().take(max_len).collect())
}

#[cfg(test)]
#[path = "ansi_tests.rs"]
mod tests;
