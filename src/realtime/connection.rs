//! One authenticated realtime connection and its reconnect state machine.
//!
//! ```text
//!            connect ok                  server close / transport drop
//! Connecting ─────────▶ Connected ─────────────────────────────▶ Disconnected
//!     ▲                                                               │
//!     └──────────────── RetryPolicy::delay_for(attempt) ──────────────┘
//!                       (None → give up, connection is dead)
//! ```
//!
//! Listeners and channel subscriptions are RAII guards; dropping one detaches
//! it. Channel joins are reference counted and replayed after every reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use super::protocol::{Channel, ServerEvent};
use super::retry::RetryPolicy;
use super::transport::{Connector, InboundFrame, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

type ListenerFn = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    id: u64,
    token: String,
    state: watch::Sender<ConnectionState>,
    outbound: mpsc::UnboundedSender<String>,
    listeners: Mutex<HashMap<u64, ListenerFn>>,
    next_listener: AtomicU64,
    channels: Mutex<HashMap<Channel, usize>>,
    shutdown: CancellationToken,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn emit(&self, frame: String) {
        // The run loop owns the receiver for as long as Shared lives.
        let _ = self.outbound.send(frame);
    }

    fn active_channels(&self) -> Vec<Channel> {
        lock(&self.channels).keys().cloned().collect()
    }

    fn release(&self, channel: &Channel) {
        let last = {
            let mut channels = lock(&self.channels);
            match channels.get_mut(channel) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    channels.remove(channel);
                    true
                }
                None => false,
            }
        };
        if last {
            self.emit(channel.leave_frame());
        }
    }

    fn remove_listener(&self, id: u64) {
        lock(&self.listeners).remove(&id);
    }

    fn dispatch(&self, text: &str) {
        let event = match ServerEvent::decode(text) {
            Ok(ServerEvent::Unknown { event }) => {
                debug!(connection = self.id, event = %event, "Ignoring unknown push event");
                return;
            }
            Ok(event) => event,
            Err(e) => {
                debug!(connection = self.id, error = %e, "Skipping malformed frame");
                return;
            }
        };
        // Handlers may attach or detach listeners; call them outside the lock.
        let handlers: Vec<ListenerFn> = lock(&self.listeners).values().cloned().collect();
        for handler in handlers {
            handler(&event);
        }
    }
}

/// Handle to a live connection. Cheap to clone; the connection shuts down
/// when [`Connection::close`] is called or the last handle is dropped.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    _guard: Arc<DropGuard>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("live", &self.is_live())
            .finish()
    }
}

impl Connection {
    /// Spawn the connection's run loop. Requires a tokio runtime.
    pub(crate) fn open(
        id: u64,
        token: &str,
        connector: Arc<dyn Connector>,
        policy: RetryPolicy,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shutdown = CancellationToken::new();
        let shared = Arc::new(Shared {
            id,
            token: token.to_string(),
            state,
            outbound: outbound_tx,
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
            channels: Mutex::new(HashMap::new()),
            shutdown: shutdown.clone(),
        });

        tokio::spawn(run(shared.clone(), connector, policy, outbound_rx));

        Self {
            shared,
            _guard: Arc::new(shutdown.drop_guard()),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn token(&self) -> &str {
        &self.shared.token
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// False once closed or once the retry budget is exhausted.
    pub fn is_live(&self) -> bool {
        !self.shared.shutdown.is_cancelled()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Attach a push listener. It stays attached until the guard is dropped.
    pub fn on(&self, handler: impl Fn(&ServerEvent) + Send + Sync + 'static) -> Listener {
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.listeners).insert(id, Arc::new(handler));
        Listener {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.shared.listeners).len()
    }

    pub fn remove_all_listeners(&self) {
        lock(&self.shared.listeners).clear();
    }

    /// Join `channel`. The join frame is sent only on the first reference.
    pub fn subscribe(&self, channel: &Channel) {
        let first = {
            let mut channels = lock(&self.shared.channels);
            let count = channels.entry(channel.clone()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            self.shared.emit(channel.join_frame());
        }
    }

    /// Release one reference to `channel`. A no-op when not subscribed.
    pub fn unsubscribe(&self, channel: &Channel) {
        self.shared.release(channel);
    }

    /// Subscribe for as long as the returned guard lives.
    pub fn subscription(&self, channel: Channel) -> ChannelSubscription {
        self.subscribe(&channel);
        ChannelSubscription {
            shared: Arc::downgrade(&self.shared),
            _guard: self._guard.clone(),
            channel,
        }
    }

    pub fn active_channels(&self) -> Vec<Channel> {
        self.shared.active_channels()
    }

    /// Detach every listener and stop the connection. Idempotent.
    pub fn close(&self) {
        self.remove_all_listeners();
        self.shared.shutdown.cancel();
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

/// Push listener guard. Dropping it detaches the handler.
pub struct Listener {
    shared: Weak<Shared>,
    id: u64,
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove_listener(self.id);
        }
    }
}

/// Channel subscription guard. Dropping it sends the matching leave frame
/// once no other guard holds the channel.
pub struct ChannelSubscription {
    shared: Weak<Shared>,
    // Keeps the connection alive while a consumer still holds a scope on it.
    _guard: Arc<DropGuard>,
    channel: Channel,
}

impl ChannelSubscription {
    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.release(&self.channel);
        }
    }
}

enum Disconnect {
    Shutdown,
    ServerClosed,
    TransportLost(String),
}

async fn run(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let id = shared.id;
    let mut attempt: u32 = 0;

    loop {
        shared.set_state(ConnectionState::Connecting);
        let result = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            result = connector.connect(&shared.token) => result,
        };

        match result {
            Ok(transport) => {
                if attempt > 0 {
                    info!(connection = id, attempt, "Reconnected after {} attempt(s)", attempt);
                } else {
                    info!(connection = id, "Connected");
                }
                attempt = 0;
                shared.set_state(ConnectionState::Connected);

                match pump(&shared, transport, &mut outbound).await {
                    Disconnect::Shutdown => break,
                    Disconnect::ServerClosed => {
                        // Automatic backoff does not cover server-forced closes.
                        warn!(connection = id, "Disconnected by server; reconnecting");
                        shared.set_state(ConnectionState::Disconnected);
                        continue;
                    }
                    Disconnect::TransportLost(reason) => {
                        warn!(connection = id, reason = %reason, "Disconnected");
                    }
                }
            }
            Err(e) => {
                if attempt == 0 {
                    error!(connection = id, error = %e, "Connection error");
                } else {
                    error!(connection = id, attempt, error = %e, "Reconnection error");
                }
            }
        }
        shared.set_state(ConnectionState::Disconnected);

        attempt += 1;
        let Some(delay) = policy.delay_for(attempt) else {
            error!(
                connection = id,
                attempts = policy.max_attempts,
                "Reconnection failed; giving up after max attempts"
            );
            break;
        };
        info!(connection = id, attempt, delay = ?delay, "Reconnection attempt #{}", attempt);
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.shutdown.cancel();
    shared.state.send_replace(ConnectionState::Disconnected);
    debug!(connection = id, "Connection loop finished");
}

async fn pump(
    shared: &Shared,
    transport: Transport,
    outbound: &mut mpsc::UnboundedReceiver<String>,
) -> Disconnect {
    let Transport {
        mut sink,
        mut stream,
    } = transport;

    // Frames queued while disconnected targeted the old socket; channel
    // membership is replayed below instead.
    while outbound.try_recv().is_ok() {}
    for channel in shared.active_channels() {
        if let Err(e) = sink.send(channel.join_frame()).await {
            return Disconnect::TransportLost(e.to_string());
        }
    }

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                let _ = sink.close().await;
                return Disconnect::Shutdown;
            }
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(text).await {
                        return Disconnect::TransportLost(e.to_string());
                    }
                }
                None => return Disconnect::Shutdown,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(InboundFrame::Text(text))) => shared.dispatch(&text),
                Some(Ok(InboundFrame::Close)) => return Disconnect::ServerClosed,
                Some(Err(e)) => return Disconnect::TransportLost(e.to_string()),
                None => return Disconnect::TransportLost("stream ended".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::testing::{FakeConnector, next_end};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn wait_state(conn: &Connection, want: ConnectionState) {
        let mut rx = conn.state_changes();
        tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| *s == want))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed");
    }

    #[tokio::test]
    async fn test_connects_with_token_and_delivers_push() {
        let (connector, mut ends) = FakeConnector::new();
        let conn = Connection::open(1, "tok-1", connector.clone(), RetryPolicy::default());
        let server = next_end(&mut ends).await;
        assert_eq!(server.token, "tok-1");
        wait_state(&conn, ConnectionState::Connected).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _listener = conn.on(move |event| {
            if let ServerEvent::TaskUpdate(p) = event {
                let _ = tx.send(p.task_id.clone());
            }
        });

        server.push(
            "task:update",
            json!({"taskId": "t1", "status": "completed", "updatedAt": "now"}),
        );
        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(got.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let (connector, mut ends) = FakeConnector::new();
        let conn = Connection::open(1, "tok", connector, RetryPolicy::default());
        let server = next_end(&mut ends).await;
        wait_state(&conn, ConnectionState::Connected).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _listener = conn.on(move |event| {
            let _ = tx.send(event.name().to_string());
        });

        server.push_raw("{not json");
        server.push("task:update", json!({"bogus": true}));
        server.push("mystery:event", json!({}));
        server.push(
            "agent:status",
            json!({"agentId": "a1", "status": "busy", "updatedAt": "now"}),
        );

        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(got.as_deref(), Some("agent:status"));
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_subscriptions_are_reference_counted() {
        let (connector, mut ends) = FakeConnector::new();
        let conn = Connection::open(1, "tok", connector, RetryPolicy::default());
        let mut server = next_end(&mut ends).await;
        wait_state(&conn, ConnectionState::Connected).await;

        let task = Channel::Task("t1".into());
        let agent = Channel::Agent("a1".into());
        conn.subscribe(&task);
        conn.subscribe(&task);
        conn.subscribe(&agent);

        let first = server.recv_frame().await;
        assert_eq!(first.event, "task:subscribe");
        assert_eq!(first.data, json!("t1"));
        let second = server.recv_frame().await;
        assert_eq!(second.event, "agent:subscribe");

        conn.unsubscribe(&task);
        conn.unsubscribe(&agent);
        let third = server.recv_frame().await;
        assert_eq!(third.event, "agent:unsubscribe");

        conn.unsubscribe(&task);
        let fourth = server.recv_frame().await;
        assert_eq!(fourth.event, "task:unsubscribe");

        // Not subscribed any more: safe, and emits nothing.
        conn.unsubscribe(&task);
        assert!(conn.active_channels().is_empty());
    }

    #[tokio::test]
    async fn test_subscription_guard_leaves_on_drop() {
        let (connector, mut ends) = FakeConnector::new();
        let conn = Connection::open(1, "tok", connector, RetryPolicy::default());
        let mut server = next_end(&mut ends).await;
        wait_state(&conn, ConnectionState::Connected).await;

        let guard = conn.subscription(Channel::Conversation("c1".into()));
        assert_eq!(guard.channel().id(), "c1");
        assert_eq!(server.recv_frame().await.event, "chat:join");
        drop(guard);
        assert_eq!(server.recv_frame().await.event, "chat:leave");
    }

    #[tokio::test]
    async fn test_listener_guard_detaches_on_drop() {
        let (connector, _ends) = FakeConnector::new();
        let conn = Connection::open(1, "tok", connector, RetryPolicy::default());
        let a = conn.on(|_| {});
        let b = conn.on(|_| {});
        assert_eq!(conn.listener_count(), 2);
        drop(a);
        assert_eq!(conn.listener_count(), 1);
        drop(b);
        assert_eq!(conn.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_close_reconnects_and_rejoins_channels() {
        let (connector, mut ends) = FakeConnector::new();
        let conn = Connection::open(1, "tok", connector.clone(), RetryPolicy::default());
        let mut server = next_end(&mut ends).await;
        wait_state(&conn, ConnectionState::Connected).await;

        conn.subscribe(&Channel::Task("t1".into()));
        assert_eq!(server.recv_frame().await.event, "task:subscribe");

        server.close();
        let mut server2 = next_end(&mut ends).await;
        let rejoin = server2.recv_frame().await;
        assert_eq!(rejoin.event, "task:subscribe");
        assert_eq!(rejoin.data, json!("t1"));
        wait_state(&conn, ConnectionState::Connected).await;
        assert!(conn.is_live());
        assert_eq!(connector.tokens(), vec!["tok", "tok"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_close_reconnects_without_retry_budget() {
        let (connector, mut ends) = FakeConnector::new();
        let policy = RetryPolicy::new(0, Duration::from_secs(10), Duration::from_secs(60));
        let conn = Connection::open(1, "tok", connector.clone(), policy);
        let server = next_end(&mut ends).await;
        wait_state(&conn, ConnectionState::Connected).await;

        let closed_at = tokio::time::Instant::now();
        server.close();
        let _server2 = next_end(&mut ends).await;
        wait_state(&conn, ConnectionState::Connected).await;

        // Straight back to connect, no backoff delay.
        assert!(closed_at.elapsed() < Duration::from_secs(10));
        assert!(conn.is_live());
        assert_eq!(connector.tokens().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_drop_reconnects() {
        let (connector, mut ends) = FakeConnector::new();
        let conn = Connection::open(1, "tok", connector, RetryPolicy::default());
        let server = next_end(&mut ends).await;
        wait_state(&conn, ConnectionState::Connected).await;

        server.drop_transport();
        let _server2 = next_end(&mut ends).await;
        wait_state(&conn, ConnectionState::Connected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhaustion_leaves_connection_dead() {
        let (connector, _ends) = FakeConnector::new();
        connector.fail_next(100);
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(400));
        let conn = Connection::open(1, "tok", connector.clone(), policy);

        let mut rx = conn.state_changes();
        tokio::time::timeout(Duration::from_secs(60), async {
            while conn.is_live() {
                let _ = rx.changed().await;
            }
        })
        .await
        .expect("connection never gave up");

        assert_eq!(conn.state(), ConnectionState::Disconnected);
        // Initial attempt plus three retries.
        assert_eq!(connector.tokens().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_detaches() {
        let (connector, mut ends) = FakeConnector::new();
        let conn = Connection::open(1, "tok", connector.clone(), RetryPolicy::default());
        let _server = next_end(&mut ends).await;
        wait_state(&conn, ConnectionState::Connected).await;

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let listener = conn.on(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        conn.close();
        conn.close();
        assert!(!conn.is_live());
        assert_eq!(conn.listener_count(), 0);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        drop(listener);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.tokens().len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropping_last_handle_stops_loop() {
        let (connector, mut ends) = FakeConnector::new();
        let conn = Connection::open(1, "tok", connector, RetryPolicy::default());
        let mut server = next_end(&mut ends).await;
        wait_state(&conn, ConnectionState::Connected).await;
        drop(conn);

        // The run loop closes its sink on shutdown.
        let closed = tokio::time::timeout(Duration::from_secs(5), server.from_client.next())
            .await
            .unwrap();
        assert!(closed.is_none());
    }
}
