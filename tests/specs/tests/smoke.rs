// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `codewire` binary and drive
//! the framed protocol over its Unix socket.

use std::time::Duration;

use serde_json::json;

use codewire::protocol::{Request, Response, SessionRef};
use codewire_specs::NodeProcess;

const TIMEOUT: Duration = Duration::from_secs(10);

fn launch_request(command: &[&str], name: Option<&str>, tags: &[&str]) -> Request {
    Request::Launch {
        command: command.iter().map(|s| (*s).to_owned()).collect(),
        working_dir: "/tmp".to_owned(),
        env: vec![],
        stdin_data: None,
        name: name.map(str::to_owned),
        tags: tags.iter().map(|s| (*s).to_owned()).collect(),
    }
}

async fn launch(
    node: &NodeProcess,
    command: &[&str],
    name: Option<&str>,
    tags: &[&str],
) -> anyhow::Result<u32> {
    match node.one_shot(&launch_request(command, name, tags)).await? {
        Response::Launched { id } => Ok(id),
        other => anyhow::bail!("unexpected launch reply: {other:?}"),
    }
}

// -- Scenario 1: spawn and read ----------------------------------------------

#[tokio::test]
async fn spawn_and_read() -> anyhow::Result<()> {
    let node = NodeProcess::start()?;
    node.wait_ready(TIMEOUT).await?;

    let id = launch(&node, &["sh", "-c", "printf hello"], None, &[]).await?;
    assert_eq!(id, 1);
    node.wait_session_status(id, "completed (0)", TIMEOUT).await?;

    let reply = node
        .one_shot(&Request::Logs {
            target: SessionRef::by_id(id),
            follow: false,
            tail_lines: None,
            strip_ansi: None,
        })
        .await?;
    match reply {
        Response::LogData { data, done } => {
            assert_eq!(data, "hello");
            assert!(done);
        }
        other => anyhow::bail!("unexpected logs reply: {other:?}"),
    }
    Ok(())
}

// -- Scenario 2: name uniqueness ---------------------------------------------

#[tokio::test]
async fn name_uniqueness_across_lifecycle() -> anyhow::Result<()> {
    let node = NodeProcess::start()?;
    node.wait_ready(TIMEOUT).await?;

    let a = launch(&node, &["sleep", "30"], Some("planner"), &[]).await?;
    let b = launch(&node, &["sleep", "30"], None, &[]).await?;

    // B cannot take the live name.
    match node.one_shot(&launch_request(&["sleep", "30"], Some("planner"), &[])).await? {
        Response::Error { message } => {
            assert_eq!(message, format!("name \"planner\" already in use by session {a}"));
        }
        other => anyhow::bail!("unexpected reply: {other:?}"),
    }

    // Kill A; once killed the name is reusable.
    match node.one_shot(&Request::Kill { target: SessionRef::by_id(a) }).await? {
        Response::Killed { id } => assert_eq!(id, a),
        other => anyhow::bail!("unexpected kill reply: {other:?}"),
    }
    node.wait_session_status(a, "killed", TIMEOUT).await?;

    // The reaper releases the name before publishing the terminal status;
    // a short retry loop absorbs scheduling noise.
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let reply = node
            .one_shot(&launch_request(&["sleep", "30"], Some("planner"), &[]))
            .await?;
        match reply {
            Response::Launched { .. } => break,
            Response::Error { .. } if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            other => anyhow::bail!("name never became reusable: {other:?}"),
        }
    }

    let _ = b;
    Ok(())
}

// -- Scenario 4: request/reply ------------------------------------------------

#[tokio::test]
async fn request_reply() -> anyhow::Result<()> {
    let node = NodeProcess::start()?;
    node.wait_ready(TIMEOUT).await?;
    let responder = launch(&node, &["sleep", "30"], Some("responder"), &[]).await?;

    let mut requester = node.connect().await?;
    requester
        .send(&Request::MsgRequest {
            from: None,
            to: Some(responder),
            to_name: None,
            body: json!("ping"),
            timeout: Some(5.0),
        })
        .await?;

    // Discover the request id via the responder's message log.
    let request_id = {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        loop {
            let reply = node
                .one_shot(&Request::MsgRead { target: SessionRef::by_id(responder), tail: None })
                .await?;
            if let Response::MsgReadResult { messages } = &reply {
                if let Some(id) = messages
                    .iter()
                    .find_map(|m| m.data.get("request_id").and_then(|v| v.as_str()))
                {
                    break id.to_owned();
                }
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("request never appeared in message log: {reply:?}");
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    };

    match node
        .one_shot(&Request::MsgReply {
            from: Some(responder),
            from_name: None,
            request_id: request_id.clone(),
            body: json!("pong"),
        })
        .await?
    {
        Response::MsgReplySent { request_id: echoed } => assert_eq!(echoed, request_id),
        other => anyhow::bail!("unexpected reply ack: {other:?}"),
    }

    match tokio::time::timeout(TIMEOUT, requester.recv_response()).await?? {
        Response::MsgRequestResult { request_id: echoed, reply_body, from_id, .. } => {
            assert_eq!(echoed, request_id);
            assert_eq!(reply_body, json!("pong"));
            assert_eq!(from_id, Some(responder));
        }
        other => anyhow::bail!("unexpected request result: {other:?}"),
    }
    Ok(())
}

// -- Scenario 5: wait on tags -------------------------------------------------

#[tokio::test]
async fn wait_on_all_tagged_sessions() -> anyhow::Result<()> {
    let node = NodeProcess::start()?;
    node.wait_ready(TIMEOUT).await?;

    launch(&node, &["sleep", "0.3"], None, &["batch-1"]).await?;
    launch(&node, &["sleep", "0.6"], None, &["batch-1"]).await?;
    launch(&node, &["sh", "-c", "true"], None, &["batch-1"]).await?;

    let reply = node
        .one_shot(&Request::Wait {
            ids: vec![],
            tags: vec!["batch-1".to_owned()],
            condition: "all".to_owned(),
            timeout: Some(10.0),
        })
        .await?;
    match reply {
        Response::WaitResult { sessions } => {
            assert_eq!(sessions.len(), 3);
            assert!(sessions.iter().all(|s| s.status.starts_with("completed")));
        }
        other => anyhow::bail!("unexpected wait reply: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn wait_any_returns_on_first_completion() -> anyhow::Result<()> {
    let node = NodeProcess::start()?;
    node.wait_ready(TIMEOUT).await?;

    launch(&node, &["sleep", "30"], None, &["batch-2"]).await?;
    let quick = launch(&node, &["sh", "-c", "true"], None, &["batch-2"]).await?;

    let reply = node
        .one_shot(&Request::Wait {
            ids: vec![],
            tags: vec!["batch-2".to_owned()],
            condition: "any".to_owned(),
            timeout: Some(10.0),
        })
        .await?;
    match reply {
        Response::WaitResult { sessions } => {
            assert!(sessions.iter().any(|s| s.id == quick));
        }
        other => anyhow::bail!("unexpected wait reply: {other:?}"),
    }
    Ok(())
}

// -- Scenario 6: corrupt-state recovery ----------------------------------------

#[tokio::test]
async fn corrupt_state_recovery() -> anyhow::Result<()> {
    let data_dir = tempfile::tempdir()?;
    std::fs::write(data_dir.path().join("sessions.json"), b"{definitely not json")?;

    let node = NodeProcess::start_in(data_dir)?;
    node.wait_ready(TIMEOUT).await?;

    let quarantined = std::fs::read_dir(node.data_dir())?
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().starts_with("sessions.json.corrupt."));
    assert!(quarantined);

    let id = launch(&node, &["sh", "-c", "true"], None, &[]).await?;
    assert_eq!(id, 1);
    Ok(())
}

// -- Persistence across restart -------------------------------------------------

#[tokio::test]
async fn restart_restores_sessions_and_id_watermark() -> anyhow::Result<()> {
    let node = NodeProcess::start()?;
    node.wait_ready(TIMEOUT).await?;

    let id = launch(&node, &["sh", "-c", "exit 7"], None, &["restartable"]).await?;
    node.wait_session_status(id, "completed (7)", TIMEOUT).await?;

    let (code, data_dir) = node.stop()?;
    assert_eq!(code, 0);

    let node = NodeProcess::start_in(data_dir)?;
    node.wait_ready(TIMEOUT).await?;

    match node.one_shot(&Request::ListSessions {}).await? {
        Response::SessionList { sessions } => {
            assert_eq!(sessions.len(), 1);
            assert_eq!(sessions[0].id, id);
            assert_eq!(sessions[0].status, "completed (7)");
            assert_eq!(sessions[0].tags, vec!["restartable"]);
        }
        other => anyhow::bail!("unexpected list reply: {other:?}"),
    }

    let next = launch(&node, &["sh", "-c", "true"], None, &[]).await?;
    assert!(next > id);
    Ok(())
}

// -- SendInput / attach over the wire ------------------------------------------

#[tokio::test]
async fn send_input_reaches_the_pty() -> anyhow::Result<()> {
    let node = NodeProcess::start()?;
    node.wait_ready(TIMEOUT).await?;
    let id = launch(&node, &["cat"], None, &[]).await?;

    match node
        .one_shot(&Request::SendInput {
            target: SessionRef::by_id(id),
            data: "echo-marker\n".to_owned(),
        })
        .await?
    {
        Response::InputSent { bytes } => assert_eq!(bytes, 12),
        other => anyhow::bail!("unexpected input reply: {other:?}"),
    }

    // cat echoes the line; poll the logs until it shows up.
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let reply = node
            .one_shot(&Request::Logs {
                target: SessionRef::by_id(id),
                follow: false,
                tail_lines: None,
                strip_ansi: None,
            })
            .await?;
        if let Response::LogData { data, .. } = &reply {
            if data.contains("echo-marker") {
                break;
            }
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("input never echoed: {reply:?}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    Ok(())
}
