use super::*;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::state::test_helpers::{self, MockLlm};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, crate::routes::app(state)).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/ws")).await.unwrap();
    ws
}

async fn send(ws: &mut Client, event: &str, data: Value) {
    let text = json!({ "event": event, "data": data }).to_string();
    ws.send(WsMessage::Text(text.into())).await.unwrap();
}

async fn next_frame(ws: &mut Client) -> Frame {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Next frame that is not a presence broadcast.
async fn next_chat_frame(ws: &mut Client) -> Frame {
    loop {
        let frame = next_frame(ws).await;
        if frame.event != "users:online" {
            return frame;
        }
    }
}

async fn identify(ws: &mut Client, user_id: &str, name: &str) {
    send(ws, "user:online", json!({ "userId": user_id, "userName": name })).await;
    loop {
        let frame = next_frame(ws).await;
        if frame.event == "users:online"
            && frame.data["users"]
                .as_array()
                .is_some_and(|users| users.iter().any(|u| u["id"] == user_id))
        {
            return;
        }
    }
}

/// Drain until the server closes the socket.
async fn expect_closed(ws: &mut Client) {
    loop {
        match timeout(Duration::from_secs(2), ws.next()).await.expect("socket stayed open") {
            None | Some(Err(_) | Ok(WsMessage::Close(_))) => return,
            Some(Ok(_)) => {}
        }
    }
}

// =============================================================================
// parse_inbound
// =============================================================================

#[test]
fn parse_inbound_fills_missing_id_and_ts() {
    let frame = parse_inbound(r#"{"event":"user:online","data":{"userId":"u1","userName":"Ada"}}"#).unwrap();
    assert_eq!(frame.event, "user:online");
    assert!(frame.ts > 0);
    assert!(frame.parent_id.is_none());
}

#[test]
fn parse_inbound_rejects_garbage_and_blank_event() {
    assert!(matches!(parse_inbound("not json"), Err(ChatError::Validation(_))));
    assert!(matches!(parse_inbound(r#"{"data":{}}"#), Err(ChatError::Validation(_))));
    assert!(matches!(parse_inbound(r#"{"event":"  "}"#), Err(ChatError::Validation(_))));
}

#[test]
fn connection_loop_is_send() {
    fn assert_send<F: std::future::Future + Send>(_: impl Fn(WebSocket, AppState) -> F) {}
    assert_send(run_ws);
}

// =============================================================================
// end to end
// =============================================================================

#[tokio::test]
async fn public_hello_reaches_both_clients() {
    let addr = spawn_server(test_helpers::test_app_state()).await;
    let mut ada = connect(addr).await;
    let mut grace = connect(addr).await;
    identify(&mut ada, "u1", "Ada").await;
    identify(&mut grace, "u2", "Grace").await;

    send(&mut ada, "message:public", json!({ "senderId": "u1", "senderName": "Ada", "content": "hello" })).await;

    for ws in [&mut ada, &mut grace] {
        let frame = next_chat_frame(ws).await;
        assert_eq!(frame.event, "message:public");
        assert_eq!(frame.data["content"], "hello");
        assert_eq!(frame.data["senderId"], "u1");
    }
}

#[tokio::test]
async fn ai_exchange_arrives_in_order() {
    let llm = Arc::new(MockLlm::replying("Hypsarrhythmia is chaotic high-voltage activity."));
    let addr = spawn_server(test_helpers::test_app_state_with_llm(llm)).await;
    let mut ada = connect(addr).await;
    identify(&mut ada, "u1", "Ada").await;

    send(
        &mut ada,
        "message:ai",
        json!({ "senderId": "u1", "senderName": "Ada", "content": "What is hypsarrhythmia?", "userContext": { "quizzesTaken": 2 } }),
    )
    .await;

    let question = next_chat_frame(&mut ada).await;
    assert_eq!(question.event, "message:public");
    assert_eq!(question.data["senderId"], "u1");
    let typing_on = next_chat_frame(&mut ada).await;
    assert_eq!((typing_on.event.as_str(), &typing_on.data["typing"]), ("ai:typing", &json!(true)));
    let typing_off = next_chat_frame(&mut ada).await;
    assert_eq!((typing_off.event.as_str(), &typing_off.data["typing"]), ("ai:typing", &json!(false)));
    let reply = next_chat_frame(&mut ada).await;
    assert_eq!(reply.event, "message:public");
    assert_eq!(reply.data["senderId"], "ai-bot");
    assert_eq!(reply.data["content"], "Hypsarrhythmia is chaotic high-voltage activity.");
}

#[tokio::test]
async fn created_room_is_live_immediately() {
    let addr = spawn_server(test_helpers::test_app_state()).await;
    let mut ada = connect(addr).await;
    let mut grace = connect(addr).await;
    identify(&mut ada, "u1", "Ada").await;
    identify(&mut grace, "u2", "Grace").await;

    send(
        &mut ada,
        "room:create",
        json!({ "creatorId": "u1", "creatorName": "Ada", "name": "Absence cases", "description": "", "participants": ["u2"] }),
    )
    .await;
    let created = next_chat_frame(&mut ada).await;
    assert_eq!(created.event, "room:created");
    assert_eq!(next_chat_frame(&mut grace).await.event, "room:created");
    let room_id = created.data["id"].clone();

    send(&mut grace, "message:group", json!({ "roomId": room_id, "content": "3 Hz, generalized" })).await;

    let got = next_chat_frame(&mut ada).await;
    assert_eq!(got.event, "message:group");
    assert_eq!(got.data["senderName"], "Grace");
}

#[tokio::test]
async fn error_frames_are_correlated_and_keep_session_open() {
    let addr = spawn_server(test_helpers::test_app_state()).await;
    let mut ada = connect(addr).await;

    let request_id = uuid::Uuid::new_v4();
    let text = json!({ "id": request_id, "event": "message:public", "data": { "content": "too early" } }).to_string();
    ada.send(WsMessage::Text(text.into())).await.unwrap();

    let err = next_frame(&mut ada).await;
    assert_eq!(err.event, "error");
    assert_eq!(err.parent_id, Some(request_id));
    assert_eq!(err.data["code"], "validation-error");
    assert_eq!(err.data["retryable"], false);

    identify(&mut ada, "u1", "Ada").await;
}

#[tokio::test]
async fn malformed_input_closes_session_and_clears_presence() {
    let state = test_helpers::test_app_state();
    let addr = spawn_server(state.clone()).await;
    let mut ada = connect(addr).await;
    let mut grace = connect(addr).await;
    identify(&mut ada, "u1", "Ada").await;
    identify(&mut grace, "u2", "Grace").await;

    ada.send(WsMessage::Text("{not json".into())).await.unwrap();

    let err = next_chat_frame(&mut ada).await;
    assert_eq!(err.event, "error");
    assert_eq!(err.data["code"], "validation-error");
    expect_closed(&mut ada).await;

    let presence = next_frame(&mut grace).await;
    assert_eq!(presence.event, "users:online");
    let users = presence.data["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["id"], "u2");
    assert!(!state.presence.is_online("u1"));
}

#[tokio::test]
async fn binary_input_is_malformed() {
    let addr = spawn_server(test_helpers::test_app_state()).await;
    let mut ada = connect(addr).await;

    ada.send(WsMessage::Binary(vec![0xde, 0xad].into())).await.unwrap();

    let err = next_frame(&mut ada).await;
    assert_eq!(err.data["code"], "validation-error");
    expect_closed(&mut ada).await;
}
