use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use super::SyncContext;
use crate::events::EventStore;
use crate::models::AgentEvent;
use crate::realtime::Channel;

/// Live event feed for one task.
///
/// Holds the task's push channel while signed in (re-joined on token change)
/// and reads from the shared [`EventStore`], which the dashboard feeds from
/// `agent:event` pushes. Dropping the handle leaves the channel.
pub struct TaskEvents {
    task_id: String,
    store: Arc<EventStore>,
    _guard: DropGuard,
}

impl TaskEvents {
    pub fn spawn(ctx: &SyncContext, store: Arc<EventStore>, task_id: &str) -> Self {
        let cancel = CancellationToken::new();
        tokio::spawn(follow_session(
            ctx.clone(),
            Channel::Task(task_id.to_string()),
            cancel.clone(),
        ));
        Self {
            task_id: task_id.to_string(),
            store,
            _guard: cancel.drop_guard(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Current events, oldest first.
    pub fn events(&self) -> Vec<AgentEvent> {
        self.store.events_for(&self.task_id)
    }

    /// Store change notifications.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.store.changes()
    }
}

async fn follow_session(ctx: SyncContext, channel: Channel, cancel: CancellationToken) {
    let mut session = ctx.session.clone();
    loop {
        let token = session.borrow_and_update().clone();
        let subscription = token
            .as_deref()
            .map(|t| ctx.connections.get_connection(t).subscription(channel.clone()));
        debug!(task_id = channel.id(), subscribed = subscription.is_some(), "Task event scope");

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = session.changed() => {
                if changed.is_err() {
                    // Session gone; hold the current scope until dropped.
                    cancel.cancelled().await;
                    break;
                }
            }
        }
        drop(subscription);
    }
}
