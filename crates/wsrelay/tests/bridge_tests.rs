//! Websocket bridge integration tests over real loopback connections.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::{
    Router,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use bytes::Bytes;
use futures::SinkExt;

use wsrelay::backend::HttpPollBackend;

mod common;
use common::*;

#[tokio::test]
async fn test_poll_round_trip() {
    let (push, _opened) = StubPush::new();
    let poll = Arc::new(EchoPoll::default());
    let addr = spawn_server(test_server(test_instance(), poll.clone(), push.clone(), "http://127.0.0.1:9")).await;

    let mut ws = connect(addr, None).await;
    send_data(&mut ws, "AAAA").await;
    assert_eq!(recv_data(&mut ws).await, "AAAA");

    send_data(&mut ws, "second").await;
    assert_eq!(recv_data(&mut ws).await, "second");

    assert_eq!(poll.calls.load(Ordering::SeqCst), 2);
    assert_eq!(push.opens(), 0);
}

#[tokio::test]
async fn test_poll_header_selects_poll() {
    let (push, _opened) = StubPush::new();
    let addr = spawn_server(test_server(
        test_instance(),
        Arc::new(EchoPoll::default()),
        push.clone(),
        "http://127.0.0.1:9",
    ))
    .await;

    let mut ws = connect(addr, Some("Poll")).await;
    send_data(&mut ws, "checkin").await;
    assert_eq!(recv_data(&mut ws).await, "checkin");
    assert_eq!(push.opens(), 0);
}

#[tokio::test]
async fn test_poll_backend_failure_replies_empty_and_stays_open() {
    let (push, _opened) = StubPush::new();
    let poll = Arc::new(FailingPoll::default());
    let addr = spawn_server(test_server(test_instance(), poll.clone(), push, "http://127.0.0.1:9")).await;

    let mut ws = connect(addr, None).await;
    for _ in 0..3 {
        send_data(&mut ws, "AAAA").await;
        assert_eq!(recv_data(&mut ws).await, "");
    }
    assert_eq!(poll.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_poll_invalid_envelope_ends_session() {
    let (push, _opened) = StubPush::new();
    let addr = spawn_server(test_server(
        test_instance(),
        Arc::new(EchoPoll::default()),
        push,
        "http://127.0.0.1:9",
    ))
    .await;

    let mut ws = connect(addr, None).await;
    ws.send(tokio_tungstenite::tungstenite::Message::text("not json"))
        .await
        .unwrap();
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_poll_over_http_backend() {
    async fn agent_message(headers: HeaderMap, body: Bytes) -> (StatusCode, Bytes) {
        if headers.get("Mythic").map(|v| v.as_bytes()) != Some(b"websocket".as_slice()) {
            return (StatusCode::BAD_REQUEST, Bytes::new());
        }
        if body.as_ref() == b"fail" {
            return (StatusCode::INTERNAL_SERVER_ERROR, Bytes::from_static(b"oops"));
        }
        (StatusCode::OK, body)
    }
    let backend_addr = spawn_router(Router::new().route("/agent_message", post(agent_message))).await;

    let poll = Arc::new(HttpPollBackend::with_client(
        reqwest::Client::new(),
        format!("http://{backend_addr}/agent_message"),
    ));
    let (push, _opened) = StubPush::new();
    let addr = spawn_server(test_server(test_instance(), poll, push, "http://127.0.0.1:9")).await;

    let mut ws = connect(addr, None).await;
    send_data(&mut ws, "AAAA").await;
    assert_eq!(recv_data(&mut ws).await, "AAAA");

    // Non-200 answers are delivered as empty replies.
    send_data(&mut ws, "fail").await;
    assert_eq!(recv_data(&mut ws).await, "");

    send_data(&mut ws, "BBBB").await;
    assert_eq!(recv_data(&mut ws).await, "BBBB");
}

#[tokio::test]
async fn test_poll_unreachable_backend_replies_empty() {
    let poll = Arc::new(HttpPollBackend::with_client(
        reqwest::Client::new(),
        "http://127.0.0.1:9/agent_message",
    ));
    let (push, _opened) = StubPush::new();
    let addr = spawn_server(test_server(test_instance(), poll, push, "http://127.0.0.1:9")).await;

    let mut ws = connect(addr, None).await;
    send_data(&mut ws, "AAAA").await;
    assert_eq!(recv_data(&mut ws).await, "");
}

#[tokio::test]
async fn test_push_relays_in_order() {
    let (push, mut opened) = StubPush::new();
    let poll = Arc::new(EchoPoll::default());
    let addr = spawn_server(test_server(test_instance(), poll.clone(), push, "http://127.0.0.1:9")).await;

    let mut ws = connect(addr, Some("Push")).await;
    let mut stream = next_stream(&mut opened).await;

    for i in 0..10 {
        send_data(&mut ws, &format!("up-{i}")).await;
    }
    for i in 0..10 {
        let message = stream.next_from_agent().await.unwrap();
        assert_eq!(message.c2_profile_name, "websocket");
        assert!(message.remote_ip.starts_with("127.0.0.1:"));
        assert!(message.message.is_empty());
        assert_eq!(message.base64_message, format!("up-{i}").into_bytes());
    }

    for i in 0..10 {
        stream.reply(&format!("down-{i}")).await;
    }
    for i in 0..10 {
        assert_eq!(recv_data(&mut ws).await, format!("down-{i}"));
    }

    assert_eq!(poll.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_push_is_full_duplex() {
    let (push, mut opened) = StubPush::new();
    let addr = spawn_server(test_server(
        test_instance(),
        Arc::new(EchoPoll::default()),
        push,
        "http://127.0.0.1:9",
    ))
    .await;

    let mut ws = connect(addr, Some("anything-but-poll")).await;
    let mut stream = next_stream(&mut opened).await;

    // Backend speaks first, without waiting for the agent.
    stream.reply("tasking").await;
    assert_eq!(recv_data(&mut ws).await, "tasking");

    send_data(&mut ws, "response").await;
    assert_eq!(stream.next_from_agent().await.unwrap().base64_message, b"response");
}

#[tokio::test]
async fn test_push_agent_close_releases_stream() {
    let (push, mut opened) = StubPush::new();
    let addr = spawn_server(test_server(
        test_instance(),
        Arc::new(EchoPoll::default()),
        push,
        "http://127.0.0.1:9",
    ))
    .await;

    let mut ws = connect(addr, Some("Push")).await;
    let mut stream = next_stream(&mut opened).await;
    send_data(&mut ws, "hello").await;
    assert!(stream.next_from_agent().await.is_some());

    // The backend receive is blocked: nothing is ever sent to the agent.
    ws.close(None).await.unwrap();

    assert!(stream.next_from_agent().await.is_none());
    let released = tokio::time::timeout(WAIT, stream.to_agent.closed()).await;
    assert!(released.is_ok(), "backend stream was not released");
}

#[tokio::test]
async fn test_push_backend_end_closes_session_on_next_send() {
    let (push, mut opened) = StubPush::new();
    let addr = spawn_server(test_server(
        test_instance(),
        Arc::new(EchoPoll::default()),
        push,
        "http://127.0.0.1:9",
    ))
    .await;

    let mut ws = connect(addr, Some("Push")).await;
    let stream = next_stream(&mut opened).await;

    stream.reply("last").await;
    assert_eq!(recv_data(&mut ws).await, "last");

    // End the backend stream; the session half-closes its send side.
    let StubStream { from_agent, to_agent } = stream;
    drop(to_agent);
    let mut from_agent = from_agent;
    let ended = tokio::time::timeout(WAIT, futures::StreamExt::next(&mut from_agent)).await;
    assert!(matches!(ended, Ok(None)));

    // The agent's next message cannot be delivered and ends the session.
    send_data(&mut ws, "too late").await;
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_push_open_failure_closes_socket() {
    let addr = spawn_server(test_server(
        test_instance(),
        Arc::new(EchoPoll::default()),
        Arc::new(UnreachablePush),
        "http://127.0.0.1:9",
    ))
    .await;

    let mut ws = connect(addr, Some("Push")).await;
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_concurrent_sessions_are_isolated() {
    let (push, mut opened) = StubPush::new();
    let poll = Arc::new(EchoPoll::default());
    let addr = spawn_server(test_server(test_instance(), poll.clone(), push.clone(), "http://127.0.0.1:9")).await;

    let mut push_a = connect(addr, Some("Push")).await;
    let mut stream_a = next_stream(&mut opened).await;
    let mut push_b = connect(addr, Some("Push")).await;
    let mut stream_b = next_stream(&mut opened).await;
    let mut poll_ws = connect(addr, None).await;

    send_data(&mut push_a, "from-a").await;
    send_data(&mut push_b, "from-b").await;
    send_data(&mut poll_ws, "from-poll").await;

    assert_eq!(stream_a.next_from_agent().await.unwrap().base64_message, b"from-a");
    assert_eq!(stream_b.next_from_agent().await.unwrap().base64_message, b"from-b");
    assert_eq!(recv_data(&mut poll_ws).await, "from-poll");

    stream_b.reply("to-b").await;
    stream_a.reply("to-a").await;
    assert_eq!(recv_data(&mut push_a).await, "to-a");
    assert_eq!(recv_data(&mut push_b).await, "to-b");

    assert_eq!(push.opens(), 2);
    assert_eq!(poll.calls.load(Ordering::SeqCst), 1);
}

/// Larger than the default websocket frame limit.
const OVERSIZED: usize = 17 * 1024 * 1024;

#[tokio::test]
async fn test_poll_accepts_oversized_frame() {
    let (push, _opened) = StubPush::new();
    let addr = spawn_server(test_server(
        test_instance(),
        Arc::new(LengthPoll),
        push,
        "http://127.0.0.1:9",
    ))
    .await;

    let mut ws = connect(addr, None).await;
    send_data(&mut ws, &"A".repeat(OVERSIZED)).await;
    assert_eq!(recv_data(&mut ws).await, OVERSIZED.to_string());

    send_data(&mut ws, "small").await;
    assert_eq!(recv_data(&mut ws).await, "5");
}

#[tokio::test]
async fn test_push_accepts_oversized_frame() {
    let (push, mut opened) = StubPush::new();
    let addr = spawn_server(test_server(
        test_instance(),
        Arc::new(EchoPoll::default()),
        push,
        "http://127.0.0.1:9",
    ))
    .await;

    let mut ws = connect(addr, Some("Push")).await;
    let mut stream = next_stream(&mut opened).await;
    send_data(&mut ws, &"B".repeat(OVERSIZED)).await;

    let message = stream.next_from_agent().await.unwrap();
    assert_eq!(message.base64_message.len(), OVERSIZED);
    assert!(message.base64_message.iter().all(|&b| b == b'B'));
}
