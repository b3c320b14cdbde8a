//! Process-wide owner of the single realtime connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use super::connection::Connection;
use super::retry::RetryPolicy;
use super::transport::Connector;

/// Hands out the one active [`Connection`], replacing it when the token
/// changes. At most one connection is live at any time.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    current: Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, policy: RetryPolicy) -> Self {
        Self {
            connector,
            policy,
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Return the live connection for `token`, opening one if needed.
    ///
    /// A connection for a different token (or one that gave up reconnecting)
    /// is torn down first: its listeners are removed before it disconnects.
    pub fn get_connection(&self, token: &str) -> Connection {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(conn) = current.as_ref() {
            if conn.token() == token && conn.is_live() {
                return conn.clone();
            }
        }

        if let Some(old) = current.take() {
            info!(connection = old.id(), "Replacing realtime connection");
            old.close();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(connection = id, "Opening realtime connection");
        let conn = Connection::open(id, token, self.connector.clone(), self.policy);
        *current = Some(conn.clone());
        conn
    }

    /// The current connection, if any.
    pub fn current(&self) -> Option<Connection> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Close and forget the current connection. Idempotent.
    pub fn destroy_connection(&self) {
        let taken = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = taken {
            info!(connection = conn.id(), "Destroying realtime connection");
            conn.close();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.destroy_connection();
    }
}
