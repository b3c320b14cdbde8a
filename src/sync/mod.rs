//! Resource Synchronization Hooks.
//!
//! Each hook is a [`Resource`] that polls one REST resource, caches it under
//! a key derived from the resource identity and query, and revalidates as
//! soon as a relevant push notification arrives.
//!
//! | hook                        | key                  | interval          | push            |
//! |-----------------------------|----------------------|-------------------|-----------------|
//! | [`task_resource`]           | `task-<id>`          | 10 s              | `task:update`   |
//! | [`task_list_resource`]      | `tasks[?query]`      | 15 s              | `task:update`   |
//! | [`AgentStatusResource`]     | `agent-status`       | 10 s / 3 s merging| `agent:status`  |
//! | [`deployment_resource`]     | `deployment-status`  | 60 s, no auth     | none            |
//! | [`TaskEvents`]              | event store          | n/a               | `agent:event`   |

mod agents;
mod cache;
mod deployment;
mod resource;
mod task;
mod task_events;
mod tasks;

use std::sync::Arc;

use tokio::sync::watch;

pub use agents::{AgentStatusResource, agent_status_interval, merge_in_progress, reviewer_merge_state};
pub use cache::{FetchResult, RequestCache};
pub use deployment::deployment_resource;
pub use resource::{PushAction, RefreshInterval, Resource, ResourceSpec, ResourceState};
pub use task::task_resource;
pub use task_events::TaskEvents;
pub use tasks::task_list_resource;

use crate::api::ApiClient;
use crate::config::PollingSection;
use crate::realtime::ConnectionManager;

/// Shared collaborators for every hook in one session.
#[derive(Clone)]
pub struct SyncContext {
    pub api: Arc<ApiClient>,
    pub cache: Arc<RequestCache>,
    pub connections: Arc<ConnectionManager>,
    pub session: watch::Receiver<Option<String>>,
    pub polling: PollingSection,
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc::UnboundedReceiver;

    use super::{RequestCache, SyncContext};
    use crate::api::ApiClient;
    use crate::auth::{Session, StaticToken};
    use crate::config::PollingSection;
    use crate::realtime::testing::{FakeConnector, ServerEnd};
    use crate::realtime::{ConnectionManager, RetryPolicy};

    /// Context whose api client points nowhere; tests supply their own fetchers.
    pub(crate) fn context(session: &Session) -> (SyncContext, UnboundedReceiver<ServerEnd>) {
        let (connector, ends) = FakeConnector::new();
        let api = ApiClient::new(
            "http://127.0.0.1:9",
            Arc::new(StaticToken::new(None)),
            Duration::from_secs(1),
        )
        .unwrap();
        let ctx = SyncContext {
            api: Arc::new(api),
            cache: Arc::new(RequestCache::new()),
            connections: Arc::new(ConnectionManager::new(connector, RetryPolicy::default())),
            session: session.subscribe(),
            polling: PollingSection::default(),
        };
        (ctx, ends)
    }
}
