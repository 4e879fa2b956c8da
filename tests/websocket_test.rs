//! End-to-end tests against a real WebSocket server.
//!
//! Each test binds a tokio-tungstenite server on 127.0.0.1:0 and drives a
//! `SessionService` over `WsConnector`, checking what actually crosses
//! the wire: the handshake header, in-band commands and routed events.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use syncwire::{
    ConnectionError, EventCategory, SessionConfig, SessionService, SessionStatus, Topic,
    TypedEvent, WsConnector,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type ServerWs = WebSocketStream<TcpStream>;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Accept one client, returning the socket, request path and Authorization header.
async fn accept(listener: &TcpListener) -> (ServerWs, String, Option<String>) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut path = String::new();
    let mut auth = None;
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            path = req.uri().path().to_string();
            auth = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(resp)
        },
    )
    .await
    .unwrap();
    (ws, path, auth)
}

async fn next_json(ws: &mut ServerWs) -> serde_json::Value {
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

async fn push(ws: &mut ServerWs, text: &str) {
    ws.send(Message::Text(text.to_string())).await.unwrap();
}

fn session(addr: SocketAddr, token: Option<&str>) -> SessionService {
    let mut config = SessionConfig::new(format!("http://{addr}"), token.map(str::to_string));
    config.connection.policy.base_delay = Duration::from_millis(50);
    SessionService::new(config, Arc::new(WsConnector))
}

const CHAT_EVENT: &str = r#"{"type":"chat.message","timestamp":"2024-01-01T00:00:00Z","chatId":"c1","action":"messageAdded","messageId":"m1"}"#;

#[tokio::test]
async fn test_handshake_auth_and_routing() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, path, auth) = accept(&listener).await;
        let authenticate = next_json(&mut ws).await;

        push(&mut ws, CHAT_EVENT).await;
        push(&mut ws, "{not json").await;
        push(&mut ws, r#"{"type":"file.change","timestamp":"2024-01-01T00:00:00Z","path":"src/lib.rs"}"#).await;

        let subscribe = next_json(&mut ws).await;
        (path, auth, authenticate, subscribe)
    });

    let session = session(addr, Some("tok"));
    let mut chat = session.events(EventCategory::Chat);
    let mut file = session.events(EventCategory::File);

    session.connect().await.unwrap();
    session
        .subscribe(Topic::new(EventCategory::Chat, "c1"))
        .await
        .unwrap();

    let event = tokio::time::timeout(TIMEOUT, chat.recv()).await.unwrap().unwrap();
    let TypedEvent::Chat(chat_event) = event else {
        panic!("expected chat event, got {event:?}");
    };
    assert_eq!(chat_event.payload.chat_id, "c1");

    // The malformed frame in between is dropped on its own.
    let event = tokio::time::timeout(TIMEOUT, file.recv()).await.unwrap().unwrap();
    assert_eq!(event.category(), Some(EventCategory::File));

    let (path, auth, authenticate, subscribe) = tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
    assert_eq!(path, "/ws");
    assert_eq!(auth.as_deref(), Some("Bearer tok"));
    assert_eq!(
        authenticate,
        serde_json::json!({"type": "authenticate", "channel": "auth", "data": {"token": "tok"}})
    );
    assert_eq!(
        subscribe,
        serde_json::json!({"type": "subscribe", "channel": "chat", "data": {"id": "c1"}})
    );

    session.shutdown().await;
}

#[tokio::test]
async fn test_server_close_triggers_reconnect_and_reauth() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let (mut first, _, _) = accept(&listener).await;
        assert_eq!(next_json(&mut first).await["type"], "authenticate");
        first.close(None).await.unwrap();
        drop(first);

        let (mut second, _, auth) = accept(&listener).await;
        let reauth = next_json(&mut second).await;
        push(&mut second, CHAT_EVENT).await;
        // Keep the socket open until the client is done.
        let _ = second.next().await;
        (auth, reauth)
    });

    let session = session(addr, Some("tok"));
    let mut chat = session.events(EventCategory::Chat);
    session.connect().await.unwrap();
    let mut statuses = session.subscribe_status();

    let event = tokio::time::timeout(TIMEOUT, chat.recv()).await.unwrap().unwrap();
    assert_eq!(event.category(), Some(EventCategory::Chat));

    let mut seen = Vec::new();
    while let Ok(status) = statuses.try_recv() {
        seen.push(status);
    }
    assert!(
        seen.iter().any(|s| matches!(s, SessionStatus::Reconnecting { attempt: 1 })),
        "{seen:?}"
    );
    assert_eq!(session.status(), SessionStatus::Connected);

    session.shutdown().await;
    let (auth, reauth) = tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
    assert_eq!(auth.as_deref(), Some("Bearer tok"));
    assert_eq!(reauth["type"], "authenticate");
}

#[tokio::test]
async fn test_unreachable_server_fails_without_retry() {
    let (listener, addr) = bind().await;
    drop(listener);

    let session = session(addr, None);
    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, ConnectionError::HandshakeFailed(_)), "{err:?}");

    let mut status = session.watch_status();
    tokio::time::timeout(TIMEOUT, status.wait_for(|s| matches!(s, SessionStatus::Failed(_))))
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!session.connection().retry_pending());
    session.shutdown().await;
}

#[tokio::test]
async fn test_send_after_disconnect_is_not_connected() {
    let (listener, addr) = bind().await;
    let server = tokio::spawn(async move {
        let (mut ws, _, _) = accept(&listener).await;
        // Drain until the client closes.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let session = session(addr, None);
    session.connect().await.unwrap();
    session.disconnect().await;

    let err = session
        .subscribe(Topic::new(EventCategory::Project, "p1"))
        .await
        .unwrap_err();
    assert_eq!(err, ConnectionError::NotConnected);

    tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
    session.shutdown().await;
}
