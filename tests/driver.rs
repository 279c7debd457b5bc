//! End-to-end tests of the tokio driver over an in-memory duplex stream.

#![cfg(feature = "async-tokio")]

mod harness;

use std::sync::Arc;
use std::time::Duration;

use harness::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use wsession::protocol::{Frame, OpCode};
use wsession::{CloseCode, Error, Request, ServerConfig, run_session};

/// Read until `pred` accepts the accumulated bytes or the peer closes.
async fn read_until(client: &mut DuplexStream, buf: &mut Vec<u8>, pred: impl Fn(&[u8]) -> bool) {
    let mut chunk = [0u8; 1024];
    while !pred(buf) {
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut chunk))
            .await
            .expect("timed out waiting for server")
            .unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Complete frames after the HTTP response head.
fn frames_after_head(buf: &[u8]) -> Vec<Frame> {
    let Some(start) = head_end(buf) else {
        return Vec::new();
    };
    let mut data = &buf[start..];
    let mut frames = Vec::new();
    while let Ok((frame, consumed)) = Frame::parse(data) {
        frames.push(frame);
        data = &data[consumed..];
    }
    frames
}

#[tokio::test]
async fn test_echo_and_close() {
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let config = Arc::new(ServerConfig::new());

    let task = tokio::spawn(async move {
        run_session(server, &upgrade_request(), config, Recorder::echoing()).await
    });

    let mut buf = Vec::new();
    read_until(&mut client, &mut buf, |b| head_end(b).is_some()).await;
    let head = String::from_utf8_lossy(&buf[..head_end(&buf).unwrap()]).to_string();
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(head.contains(SAMPLE_ACCEPT));

    client.write_all(&client_text("hello over duplex")).await.unwrap();
    read_until(&mut client, &mut buf, |b| !frames_after_head(b).is_empty()).await;
    let frames = frames_after_head(&buf);
    assert_eq!(frames[0].opcode, OpCode::Text);
    assert_eq!(frames[0].payload(), b"hello over duplex");

    client.write_all(&client_close(CloseCode::Normal, "")).await.unwrap();
    read_until(&mut client, &mut buf, |b| frames_after_head(b).len() >= 2).await;
    let frames = frames_after_head(&buf);
    assert_eq!(frames[1].opcode, OpCode::Close);
    assert_eq!(close_code(&frames[1]), Some(1000));

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("session did not finish")
        .unwrap();
    assert_eq!(result, Ok(()));
}

#[tokio::test]
async fn test_rejected_handshake_writes_response_and_returns_error() {
    let (mut client, server) = tokio::io::duplex(4096);
    let config = Arc::new(ServerConfig::new());
    let request = Request::new("GET").with_header("Sec-WebSocket-Version", "9");

    let task = tokio::spawn(async move { run_session(server, &request, config, Recorder::default()).await });

    let mut buf = Vec::new();
    client.read_to_end(&mut buf).await.unwrap();
    let text = String::from_utf8(buf).unwrap();
    assert!(text.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
    assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));

    let result = task.await.unwrap();
    assert_eq!(result, Err(Error::UnsupportedVersion(Some("9".into()))));
}

#[tokio::test]
async fn test_protocol_error_closes_with_1002() {
    let (mut client, server) = tokio::io::duplex(4096);
    let config = Arc::new(ServerConfig::new());

    let task = tokio::spawn(async move {
        run_session(server, &upgrade_request(), config, Recorder::default()).await
    });

    // Unmasked frame from a client.
    let mut frame = Vec::new();
    Frame::text("unmasked").write(&mut frame, None);
    client.write_all(&frame).await.unwrap();

    let mut buf = Vec::new();
    client.read_to_end(&mut buf).await.unwrap();
    let frames = frames_after_head(&buf);
    assert_eq!(frames.len(), 1);
    assert_eq!(close_code(&frames[0]), Some(1002));

    assert_eq!(task.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn test_peer_disconnect_ends_session() {
    let (client, server) = tokio::io::duplex(4096);
    let config = Arc::new(ServerConfig::new());

    let task = tokio::spawn(async move {
        run_session(server, &upgrade_request(), config, Recorder::default()).await
    });
    drop(client);

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("session did not finish")
        .unwrap();
    assert_eq!(result, Ok(()));
}

#[tokio::test]
async fn test_silent_client_gets_ping_after_upgrade() {
    let (mut client, server) = tokio::io::duplex(4096);
    let config = Arc::new(ServerConfig::new().with_keep_alive(Duration::from_millis(50)));

    let _task = tokio::spawn(async move {
        run_session(server, &upgrade_request(), config, Recorder::default()).await
    });

    // The client never writes after the upgrade.
    let mut buf = Vec::new();
    read_until(&mut client, &mut buf, |b| {
        frames_after_head(b).iter().any(|f| f.opcode == OpCode::Ping)
    })
    .await;
    assert!(frames_after_head(&buf).iter().any(|f| f.opcode == OpCode::Ping));
}

#[tokio::test]
async fn test_active_client_still_gets_ping_when_idle() {
    let (mut client, server) = tokio::io::duplex(4096);
    let config = Arc::new(ServerConfig::new().with_keep_alive(Duration::from_millis(50)));

    let _task = tokio::spawn(async move {
        run_session(server, &upgrade_request(), config, Recorder::default()).await
    });

    client
        .write_all(&client_frame(&Frame::pong(Vec::new())))
        .await
        .unwrap();

    let mut buf = Vec::new();
    read_until(&mut client, &mut buf, |b| {
        frames_after_head(b).iter().any(|f| f.opcode == OpCode::Ping)
    })
    .await;
    assert!(frames_after_head(&buf).iter().any(|f| f.opcode == OpCode::Ping));
}
