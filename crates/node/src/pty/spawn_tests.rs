// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::spawn::signal_exit_code;
use super::*;

fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
}

#[test]
fn claudecode_is_always_removed() {
    let merged = child_env(env(&[("CLAUDECODE", "1"), ("PATH", "/bin"), ("TERM", "vt100")]), &[]);
    assert!(!merged.iter().any(|kv| kv.starts_with("CLAUDECODE=")));
    assert!(merged.contains(&"PATH=/bin".to_owned()));
}

#[test]
fn overrides_replace_in_place_or_append() {
    let overrides = env(&[("PATH", "/opt/bin"), ("EXTRA", "yes")]);
    let merged = child_env(env(&[("PATH", "/bin"), ("HOME", "/root"), ("TERM", "vt100")]), &overrides);
    // Replaced in place: PATH keeps its original position.
    assert_eq!(merged[0], "PATH=/opt/bin");
    assert_eq!(merged[1], "HOME=/root");
    assert!(merged.contains(&"EXTRA=yes".to_owned()));
}

#[test]
fn term_defaulted_when_absent() {
    let merged = child_env(env(&[("HOME", "/root")]), &[]);
    assert!(merged.contains(&"TERM=xterm-256color".to_owned()));

    let merged = child_env(env(&[("TERM", "vt100")]), &[]);
    assert!(merged.contains(&"TERM=vt100".to_owned()));
    assert!(!merged.contains(&"TERM=xterm-256color".to_owned()));
}

#[test]
fn override_may_reintroduce_claudecode() {
    // Rule order: removal happens first, then caller overrides apply.
    let merged = child_env(env(&[("CLAUDECODE", "1")]), &env(&[("CLAUDECODE", "2")]));
    assert!(merged.contains(&"CLAUDECODE=2".to_owned()));
}

#[test]
fn resolve_absolute_path() {
    let sh = resolve_program("/bin/sh");
    assert_eq!(sh, Some(std::path::PathBuf::from("/bin/sh")));
    assert_eq!(resolve_program("/bin/definitely-not-a-real-binary"), None);
}

#[test]
fn resolve_via_path_lookup() {
    // `sh` exists on every platform this crate targets.
    let sh = resolve_program("sh");
    assert!(sh.is_some());
    assert_eq!(resolve_program("definitely-not-a-real-binary-name"), None);
}

#[test]
fn signal_exit_codes() {
    assert_eq!(signal_exit_code(nix::sys::signal::Signal::SIGTERM), 143);
    assert_eq!(signal_exit_code(nix::sys::signal::Signal::SIGKILL), 137);
}
