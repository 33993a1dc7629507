// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::Utc;

use super::*;

fn meta(id: u32, status: &str) -> SessionMeta {
    SessionMeta {
        id,
        name: None,
        prompt: "bash -c true".to_owned(),
        working_dir: "/tmp".to_owned(),
        created_at: Utc::now(),
        status: status.to_owned(),
        pid: None,
        tags: vec![],
        exit_code: None,
        completed_at: None,
    }
}

#[test]
fn save_then_load_round_trips() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = MetaStore::new(dir.path());

    let mut a = meta(1, "completed (0)");
    a.name = Some("planner".to_owned());
    a.exit_code = Some(0);
    a.completed_at = Some(Utc::now());
    let b = meta(4, "killed");
    store.save(&[a.clone(), b])?;

    let loaded = store.load()?;
    assert_eq!(loaded.metas.len(), 2);
    assert_eq!(loaded.metas[0].id, 1);
    assert_eq!(loaded.metas[0].name.as_deref(), Some("planner"));
    assert_eq!(loaded.metas[0].status, "completed (0)");
    assert_eq!(loaded.next_id, 5);
    Ok(())
}

#[test]
fn missing_file_is_empty_state() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let loaded = MetaStore::new(dir.path()).load()?;
    assert!(loaded.metas.is_empty());
    assert_eq!(loaded.next_id, 1);
    Ok(())
}

#[test]
fn corrupt_file_is_quarantined() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("sessions.json"), b"{oops")?;

    let loaded = MetaStore::new(dir.path()).load()?;
    assert!(loaded.metas.is_empty());
    assert_eq!(loaded.next_id, 1);

    let quarantined = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().starts_with("sessions.json.corrupt."));
    assert!(quarantined);
    assert!(!dir.path().join("sessions.json").exists());
    Ok(())
}

#[test]
fn next_id_respects_on_disk_session_dirs() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("sessions.json"), b"not json at all")?;
    std::fs::create_dir_all(dir.path().join("sessions").join("7"))?;
    std::fs::create_dir_all(dir.path().join("sessions").join("3"))?;

    let loaded = MetaStore::new(dir.path()).load()?;
    assert_eq!(loaded.next_id, 8);
    Ok(())
}

#[test]
fn running_records_normalise_to_killed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = MetaStore::new(dir.path());
    let mut m = meta(2, "running");
    m.pid = Some(12345);
    store.save(&[m])?;

    let loaded = store.load()?;
    assert_eq!(loaded.metas[0].status, "killed");
    assert_eq!(loaded.metas[0].pid, None);
    assert!(loaded.metas[0].completed_at.is_some());
    Ok(())
}

#[test]
fn duration_from_timestamps() {
    let mut m = meta(1, "completed (0)");
    m.completed_at = Some(m.created_at + chrono::Duration::milliseconds(1500));
    assert_eq!(m.duration_ms(), Some(1500));
    assert_eq!(meta(2, "running").duration_ms(), None);
}
