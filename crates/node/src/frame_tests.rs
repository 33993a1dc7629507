// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio::io::AsyncWriteExt;

use super::*;

#[tokio::test]
async fn stream_round_trip() -> anyhow::Result<()> {
    let (client, server) = tokio::io::duplex(1024);
    let (server_rx, _server_tx) = tokio::io::split(server);
    let (_client_rx, client_tx) = tokio::io::split(client);

    let mut writer = FrameWriter::new(client_tx);
    let mut reader = FrameReader::new(server_rx);

    writer.write_frame(Frame::Control("{\"type\":\"ListSessions\"}".to_owned())).await?;
    writer.write_frame(Frame::Data(Bytes::from_static(b"\x1b[1mhi\x00bytes"))).await?;

    let first = reader.read_frame().await?;
    assert_eq!(first, Some(Frame::Control("{\"type\":\"ListSessions\"}".to_owned())));
    let second = reader.read_frame().await?;
    assert_eq!(second, Some(Frame::Data(Bytes::from_static(b"\x1b[1mhi\x00bytes"))));
    Ok(())
}

#[tokio::test]
async fn clean_eof_is_none() -> anyhow::Result<()> {
    let (client, server) = tokio::io::duplex(64);
    drop(client);
    let (server_rx, _server_tx) = tokio::io::split(server);
    let mut reader = FrameReader::new(server_rx);
    assert_eq!(reader.read_frame().await?, None);
    Ok(())
}

#[tokio::test]
async fn mid_frame_eof_is_error() -> anyhow::Result<()> {
    let (mut client, server) = tokio::io::duplex(64);
    // type + claimed length 10, but only 3 payload bytes before EOF
    client.write_all(&[0x01, 0, 0, 0, 10, b'a', b'b', b'c']).await?;
    drop(client);

    let (server_rx, _server_tx) = tokio::io::split(server);
    let mut reader = FrameReader::new(server_rx);
    assert!(reader.read_frame().await.is_err());
    Ok(())
}

#[tokio::test]
async fn oversized_frame_rejected() -> anyhow::Result<()> {
    let (mut client, server) = tokio::io::duplex(64);
    let too_big = (MAX_FRAME_LEN + 1).to_be_bytes();
    client.write_all(&[0x00]).await?;
    client.write_all(&too_big).await?;

    let (server_rx, _server_tx) = tokio::io::split(server);
    let mut reader = FrameReader::new(server_rx);
    assert!(reader.read_frame().await.is_err());
    Ok(())
}

#[tokio::test]
async fn unknown_type_rejected() -> anyhow::Result<()> {
    let (mut client, server) = tokio::io::duplex(64);
    client.write_all(&[0x07, 0, 0, 0, 1, b'x']).await?;

    let (server_rx, _server_tx) = tokio::io::split(server);
    let mut reader = FrameReader::new(server_rx);
    assert!(reader.read_frame().await.is_err());
    Ok(())
}

#[test]
fn buffer_encode_decode() -> anyhow::Result<()> {
    let frame = Frame::Data(Bytes::from_static(b"payload"));
    let buf = frame.encode();
    assert_eq!(buf[0], 0x01);
    assert_eq!(&buf[1..5], &7u32.to_be_bytes());
    assert_eq!(Frame::decode(&buf)?, frame);

    let control = Frame::Control("{}".to_owned());
    assert_eq!(Frame::decode(&control.encode())?, control);
    Ok(())
}

#[test]
fn decode_rejects_length_mismatch() {
    let mut buf = Frame::Data(Bytes::from_static(b"abc")).encode();
    buf.push(b'x');
    assert!(Frame::decode(&buf).is_err());
    assert!(Frame::decode(&[0x00, 0, 0]).is_err());
}

#[test]
fn control_parse_helpers() -> anyhow::Result<()> {
    let frame = Frame::control(&serde_json::json!({ "type": "Unsubscribed" }))?;
    let value: serde_json::Value = frame.parse_control()?;
    assert_eq!(value["type"], "Unsubscribed");

    let data = Frame::Data(Bytes::from_static(b"x"));
    assert!(data.parse_control::<serde_json::Value>().is_err());
    Ok(())
}

#[test]
fn control_rejects_non_utf8() {
    let buf = [0x00u8, 0, 0, 0, 2, 0xff, 0xfe];
    assert!(Frame::decode(&buf).is_err());
}
