//! Session token provider.
//!
//! Identity is owned by an external provider; this module only holds the
//! current bearer token and lets callers observe changes to it. Every
//! outbound call asks the provider for the token at call time, so a refreshed
//! token is picked up without rebuilding clients.

use async_trait::async_trait;
use tokio::sync::watch;

/// Supplies the bearer token for authenticated calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current token, or `None` when signed out.
    async fn token(&self) -> Option<String>;
}

/// A fixed token, e.g. from `MASDASH_TOKEN` or `--token`.
#[derive(Debug, Clone)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token)
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Session state shared by the api client, realtime supervisor and hooks.
#[derive(Debug)]
pub struct Session {
    tx: watch::Sender<Option<String>>,
}

impl Session {
    pub fn new(token: Option<String>) -> Self {
        let (tx, _) = watch::channel(token);
        Self { tx }
    }

    /// Install a token (sign-in or refresh). Observers are woken only when it changes.
    pub fn sign_in(&self, token: impl Into<String>) {
        let token = token.into();
        self.tx.send_if_modified(|current| {
            if current.as_deref() == Some(token.as_str()) {
                false
            } else {
                *current = Some(token);
                true
            }
        });
    }

    pub fn sign_out(&self) {
        self.tx.send_if_modified(|current| current.take().is_some());
    }

    pub fn current(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Observe token changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl TokenProvider for Session {
    async fn token(&self) -> Option<String> {
        self.current()
    }
}
