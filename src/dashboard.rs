//! Session-scoped wiring of the client core.
//!
//! [`Dashboard`] owns the api client, request cache, connection manager and
//! event store for one session, and runs a supervisor that follows the
//! session token:
//!
//! - token present: obtain the token's connection and feed its `agent:event`
//!   pushes into the event store
//! - token gone: detach the store listener, then destroy the connection

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

use crate::api::ApiClient;
use crate::auth::{Session, TokenProvider};
use crate::chat::ChatEngine;
use crate::config::DashConfig;
use crate::errors::ApiError;
use crate::events::EventStore;
use crate::models::{DeploymentStatus, Task, TaskQuery};
use crate::realtime::{Connection, ConnectionManager, ConnectionState, Connector, Listener, WsConnector};
use crate::sync::{
    AgentStatusResource, RequestCache, Resource, SyncContext, TaskEvents, deployment_resource,
    task_list_resource, task_resource,
};

pub struct Dashboard {
    session: Arc<Session>,
    api: Arc<ApiClient>,
    cache: Arc<RequestCache>,
    connections: Arc<ConnectionManager>,
    events: Arc<EventStore>,
    state: watch::Receiver<ConnectionState>,
    config: DashConfig,
    _supervisor: DropGuard,
}

impl Dashboard {
    /// Build the session context over a WebSocket connector. Requires a
    /// tokio runtime.
    pub fn new(config: &DashConfig, session: Arc<Session>) -> Result<Self, ApiError> {
        let connector = Arc::new(WsConnector::new(config.realtime_url(), config.connect_timeout()));
        Self::with_connector(config, session, connector)
    }

    pub fn with_connector(
        config: &DashConfig,
        session: Arc<Session>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ApiError> {
        let tokens: Arc<dyn TokenProvider> = session.clone();
        let api = Arc::new(ApiClient::new(
            config.api.base_url.clone(),
            tokens,
            config.request_timeout(),
        )?);
        let connections = Arc::new(ConnectionManager::new(connector, config.retry_policy()));
        let events = Arc::new(EventStore::with_capacity(config.events.max_events_per_task));

        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();
        tokio::spawn(supervise(
            session.subscribe(),
            connections.clone(),
            events.clone(),
            state_tx,
            cancel.clone(),
        ));

        Ok(Self {
            session,
            api,
            cache: Arc::new(RequestCache::new()),
            connections,
            events,
            state,
            config: config.clone(),
            _supervisor: cancel.drop_guard(),
        })
    }

    pub fn config(&self) -> &DashConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Realtime state of the current session's connection.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    pub fn sync_context(&self) -> SyncContext {
        SyncContext {
            api: self.api.clone(),
            cache: self.cache.clone(),
            connections: self.connections.clone(),
            session: self.session.subscribe(),
            polling: self.config.polling.clone(),
        }
    }

    /// Chat engine bound to this session's api client. Push merges are
    /// attached with [`ChatEngine::attach`].
    pub fn chat(&self) -> ChatEngine {
        ChatEngine::new(self.api.clone())
    }

    pub fn task(&self, id: &str) -> Resource<Task> {
        task_resource(&self.sync_context(), id)
    }

    pub fn tasks(&self, query: &TaskQuery) -> Resource<Vec<Task>> {
        task_list_resource(&self.sync_context(), query)
    }

    pub fn agent_status(&self) -> AgentStatusResource {
        AgentStatusResource::spawn(&self.sync_context())
    }

    pub fn task_events(&self, task_id: &str) -> TaskEvents {
        TaskEvents::spawn(&self.sync_context(), self.events.clone(), task_id)
    }

    pub fn deployment_status(&self) -> Resource<DeploymentStatus> {
        deployment_resource(&self.sync_context())
    }

    /// Current connection, if signed in.
    pub fn connection(&self) -> Option<Connection> {
        self.connections.current()
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.connections.destroy_connection();
    }
}

async fn supervise(
    mut session: watch::Receiver<Option<String>>,
    connections: Arc<ConnectionManager>,
    events: Arc<EventStore>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    let mut listener: Option<Listener> = None;
    let mut conn_state: Option<watch::Receiver<ConnectionState>> = None;

    loop {
        let token = session.borrow_and_update().clone();
        match token {
            Some(token) => {
                let conn = connections.get_connection(&token);
                // Replacing drops the previous listener after the new one is live.
                listener = Some(events.attach(&conn));
                let rx = conn.state_changes();
                state.send_replace(*rx.borrow());
                conn_state = Some(rx);
                info!(connection = conn.id(), "Session bound to realtime connection");
            }
            None => {
                conn_state = None;
                if listener.take().is_some() {
                    info!("Session ended; destroying realtime connection");
                }
                connections.destroy_connection();
                state.send_replace(ConnectionState::Disconnected);
            }
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    drop(listener.take());
                    connections.destroy_connection();
                    debug!("Dashboard supervisor stopped");
                    return;
                }
                changed = session.changed() => {
                    if changed.is_err() {
                        drop(listener.take());
                        connections.destroy_connection();
                        return;
                    }
                    break;
                }
                next = async {
                    match conn_state.as_mut() {
                        Some(rx) => rx.changed().await.map(|_| *rx.borrow_and_update()),
                        None => std::future::pending().await,
                    }
                } => match next {
                    Ok(s) => {
                        state.send_replace(s);
                    }
                    // The connection is gone; wait for the next session change.
                    Err(_) => {
                        conn_state = None;
                        state.send_replace(ConnectionState::Disconnected);
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::testing::{FakeConnector, ServerEnd, next_end};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn dashboard(session: &Arc<Session>) -> (Dashboard, UnboundedReceiver<ServerEnd>) {
        let (connector, ends) = FakeConnector::new();
        let dash = Dashboard::with_connector(&DashConfig::default(), session.clone(), connector).unwrap();
        (dash, ends)
    }

    async fn wait_connected(dash: &Dashboard, want: bool) {
        let mut rx = dash.connection_state();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| (*s == ConnectionState::Connected) == want),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn test_sign_in_connects_and_feeds_event_store() {
        let session = Arc::new(Session::new(None));
        let (dash, mut ends) = dashboard(&session);
        assert!(!dash.is_connected());

        session.sign_in("tok");
        let server = next_end(&mut ends).await;
        assert_eq!(server.token, "tok");
        wait_connected(&dash, true).await;

        server.push(
            "agent:event",
            json!({
                "taskId": "t1",
                "agent": "coder",
                "type": "agent:progress",
                "message": "writing tests",
                "timestamp": "2024-01-01T00:00:00Z"
            }),
        );
        let mut changes = dash.events().changes();
        tokio::time::timeout(Duration::from_secs(5), changes.wait_for(|v| *v > 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dash.events().events_for("t1")[0].message, "writing tests");
    }

    #[tokio::test]
    async fn test_sign_out_detaches_then_destroys() {
        let session = Arc::new(Session::new(Some("tok".into())));
        let (dash, mut ends) = dashboard(&session);
        let _server = next_end(&mut ends).await;
        wait_connected(&dash, true).await;
        let conn = dash.connection().unwrap();
        assert_eq!(conn.listener_count(), 1);

        session.sign_out();
        wait_connected(&dash, false).await;
        assert!(!conn.is_live());
        assert_eq!(conn.listener_count(), 0);
        assert!(dash.connection().is_none());
    }

    #[tokio::test]
    async fn test_token_refresh_replaces_connection() {
        let session = Arc::new(Session::new(Some("old".into())));
        let (dash, mut ends) = dashboard(&session);
        let _first = next_end(&mut ends).await;
        wait_connected(&dash, true).await;
        let old = dash.connection().unwrap();

        session.sign_in("new");
        let second = next_end(&mut ends).await;
        assert_eq!(second.token, "new");
        assert!(!old.is_live());
        let current = dash.connection().unwrap();
        assert_ne!(current.id(), old.id());
        assert_eq!(current.listener_count(), 1);
    }
}
