//! Realtime connection against a local WebSocket server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, header};
use axum::response::IntoResponse;
use axum::routing::get;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use masdash::Dashboard;
use masdash::auth::Session;
use masdash::config::DashConfig;
use masdash::realtime::ConnectionState;

/// What the server observed: connection number, then either the handshake
/// credential or an inbound frame.
#[derive(Debug)]
enum Seen {
    Handshake(usize, Option<String>),
    Frame(usize, Value),
}

#[derive(Clone)]
struct Server {
    seen: mpsc::UnboundedSender<Seen>,
    connections: Arc<AtomicUsize>,
    /// Close the first connection after answering its first subscribe.
    close_first: bool,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(server): State<Server>,
) -> impl IntoResponse {
    let n = server.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let _ = server.seen.send(Seen::Handshake(n, auth));
    ws.on_upgrade(move |socket| handle_socket(socket, server, n))
}

async fn handle_socket(mut socket: WebSocket, server: Server, n: usize) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        let frame: Value = serde_json::from_str(text.as_str()).unwrap();
        let is_subscribe = frame["event"] == "task:subscribe";
        let task_id = frame["data"].as_str().unwrap_or_default().to_string();
        let _ = server.seen.send(Seen::Frame(n, frame));

        if is_subscribe {
            let push = json!({
                "event": "agent:event",
                "data": {
                    "taskId": task_id,
                    "agent": "coder",
                    "type": "agent:progress",
                    "message": format!("connection {}", n),
                    "timestamp": "2024-01-01T00:00:00Z"
                }
            });
            if socket
                .send(Message::Text(push.to_string().into()))
                .await
                .is_err()
            {
                return;
            }
            if server.close_first && n == 1 {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        }
    }
}

async fn serve(close_first: bool) -> (String, mpsc::UnboundedReceiver<Seen>) {
    let (seen, rx) = mpsc::unbounded_channel();
    let state = Server {
        seen,
        connections: Arc::new(AtomicUsize::new(0)),
        close_first,
    };
    let app = Router::new().route("/ws", get(ws_handler)).with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), rx)
}

fn config(base: &str) -> DashConfig {
    let mut config = DashConfig::parse(&format!(
        "[api]\nbase_url = \"{}\"\n\n[realtime]\nreconnect_delay_ms = 100\nreconnect_delay_max_ms = 200\n",
        base
    ))
    .unwrap();
    config.token = Some("ws-token".into());
    config
}

async fn connected(dash: &Dashboard) {
    let mut state = dash.connection_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .unwrap()
    .unwrap();
}

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Seen>) -> (usize, Value) {
    loop {
        let seen = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        if let Seen::Frame(n, frame) = seen {
            return (n, frame);
        }
    }
}

#[tokio::test]
async fn test_handshake_subscribe_and_push() {
    let (base, mut seen) = serve(false).await;
    let config = config(&base);
    let session = Arc::new(Session::new(config.token.clone()));
    let dash = Dashboard::new(&config, session).unwrap();
    connected(&dash).await;

    match seen.recv().await.unwrap() {
        Seen::Handshake(1, auth) => assert_eq!(auth.as_deref(), Some("Bearer ws-token")),
        other => panic!("expected handshake, got {:?}", other),
    }

    let feed = dash.task_events("t1");
    let (n, frame) = next_frame(&mut seen).await;
    assert_eq!(n, 1);
    assert_eq!(frame, json!({"event": "task:subscribe", "data": "t1"}));

    let mut changes = feed.changes();
    tokio::time::timeout(Duration::from_secs(5), changes.wait_for(|v| *v > 0))
        .await
        .unwrap()
        .unwrap();
    let events = feed.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message, "connection 1");

    drop(feed);
    let (_, frame) = next_frame(&mut seen).await;
    assert_eq!(frame, json!({"event": "task:unsubscribe", "data": "t1"}));
}

#[tokio::test]
async fn test_server_close_reconnects_and_rejoins() {
    let (base, mut seen) = serve(true).await;
    let config = config(&base);
    let session = Arc::new(Session::new(config.token.clone()));
    let dash = Dashboard::new(&config, session).unwrap();
    connected(&dash).await;

    let feed = dash.task_events("t7");
    let (n, frame) = next_frame(&mut seen).await;
    assert_eq!((n, frame["event"].as_str()), (1, Some("task:subscribe")));

    // The first connection closes after its push; the join is replayed on the next one.
    let (n, frame) = next_frame(&mut seen).await;
    assert_eq!(n, 2);
    assert_eq!(frame, json!({"event": "task:subscribe", "data": "t7"}));

    let mut changes = feed.changes();
    tokio::time::timeout(
        Duration::from_secs(5),
        changes.wait_for(|_| feed.events().len() == 2),
    )
    .await
    .unwrap()
    .unwrap();
    let messages: Vec<String> = feed.events().into_iter().map(|e| e.message).collect();
    assert_eq!(messages, ["connection 1", "connection 2"]);
}

#[tokio::test]
async fn test_sign_out_closes_socket() {
    let (base, mut seen) = serve(false).await;
    let config = config(&base);
    let session = Arc::new(Session::new(config.token.clone()));
    let dash = Dashboard::new(&config, session.clone()).unwrap();
    connected(&dash).await;
    assert!(dash.connection().is_some());

    session.sign_out();
    let mut state = dash.connection_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(dash.connection().is_none());

    // Nothing reconnects while signed out.
    tokio::time::sleep(Duration::from_millis(300)).await;
    while let Ok(seen) = seen.try_recv() {
        assert!(
            matches!(seen, Seen::Handshake(1, _)),
            "unexpected activity after sign-out: {:?}",
            seen
        );
    }
}
