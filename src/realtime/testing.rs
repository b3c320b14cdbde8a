//! Channel-backed connector for exercising the connection state machine.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::protocol::Frame;
use super::transport::{Connector, InboundFrame, Transport};
use crate::errors::RealtimeError;

/// Server half of one fake transport.
pub(crate) struct ServerEnd {
    pub token: String,
    pub from_client: fmpsc::UnboundedReceiver<String>,
    pub to_client: fmpsc::UnboundedSender<Result<InboundFrame, RealtimeError>>,
}

impl ServerEnd {
    pub async fn recv_frame(&mut self) -> Frame {
        let text = tokio::time::timeout(Duration::from_secs(5), self.from_client.next())
            .await
            .expect("timed out waiting for client frame")
            .expect("client sink closed");
        serde_json::from_str(&text).expect("client sent invalid frame")
    }

    pub fn push(&self, event: &str, data: serde_json::Value) {
        let text = Frame::new(event, data).to_json();
        let _ = self.to_client.unbounded_send(Ok(InboundFrame::Text(text)));
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self
            .to_client
            .unbounded_send(Ok(InboundFrame::Text(text.to_string())));
    }

    pub fn close(&self) {
        let _ = self.to_client.unbounded_send(Ok(InboundFrame::Close));
    }

    pub fn drop_transport(&self) {
        let _ = self.to_client.unbounded_send(Err(RealtimeError::Closed));
    }
}

pub(crate) struct FakeConnector {
    ends: mpsc::UnboundedSender<ServerEnd>,
    fail_next: AtomicU32,
    tokens: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new() -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = std::sync::Arc::new(Self {
            ends: tx,
            fail_next: AtomicU32::new(0),
            tokens: Mutex::new(Vec::new()),
        });
        (connector, rx)
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Tokens seen by every connect attempt, in order.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, token: &str) -> Result<Transport, RealtimeError> {
        self.tokens.lock().unwrap().push(token.to_string());
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RealtimeError::Connect {
                url: "fake://".into(),
                message: "connection refused".into(),
            });
        }

        let (client_tx, server_rx) = fmpsc::unbounded::<String>();
        let (server_tx, client_rx) = fmpsc::unbounded::<Result<InboundFrame, RealtimeError>>();
        let _ = self.ends.send(ServerEnd {
            token: token.to_string(),
            from_client: server_rx,
            to_client: server_tx,
        });

        Ok(Transport {
            sink: Box::pin(client_tx.sink_map_err(|_| RealtimeError::Closed)),
            stream: Box::pin(client_rx),
        })
    }
}

pub(crate) async fn next_end(rx: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for connect")
        .expect("connector dropped")
}
