use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::trace;

use crate::models::AgentEvent;
use crate::realtime::{Connection, Listener, ServerEvent};

/// Maximum number of events retained per task.
pub const MAX_EVENTS_PER_TASK: usize = 500;

/// Per-task bounded log of agent events.
///
/// Each task's log is independent and ordered oldest first. Once a log
/// exceeds its cap the oldest events are evicted. Events are not
/// de-duplicated.
pub struct EventStore {
    cap: usize,
    logs: Mutex<HashMap<String, VecDeque<AgentEvent>>>,
    version: watch::Sender<u64>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    pub fn new() -> Self {
        Self::with_capacity(MAX_EVENTS_PER_TASK)
    }

    /// A store with a custom per-task cap. A cap of zero is treated as one.
    pub fn with_capacity(cap: usize) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            cap: cap.max(1),
            logs: Mutex::new(HashMap::new()),
            version,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    fn logs(&self) -> MutexGuard<'_, HashMap<String, VecDeque<AgentEvent>>> {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    pub fn add_event(&self, event: AgentEvent) {
        {
            let mut logs = self.logs();
            let log = logs.entry(event.task_id.clone()).or_default();
            log.push_back(event);
            while log.len() > self.cap {
                log.pop_front();
            }
        }
        self.bump();
    }

    pub fn clear_task(&self, task_id: &str) {
        let removed = self.logs().remove(task_id).is_some();
        if removed {
            self.bump();
        }
    }

    pub fn clear_all(&self) {
        let had_any = {
            let mut logs = self.logs();
            let had_any = !logs.is_empty();
            logs.clear();
            had_any
        };
        if had_any {
            self.bump();
        }
    }

    /// Snapshot of a task's log, oldest first. Empty when the task is unknown.
    pub fn events_for(&self, task_id: &str) -> Vec<AgentEvent> {
        self.logs()
            .get(task_id)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len_for(&self, task_id: &str) -> usize {
        self.logs().get(task_id).map_or(0, VecDeque::len)
    }

    pub fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.logs().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Change notifications. The value is a counter bumped on every mutation.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Feed `agent:event` pushes from `conn` into the store until the
    /// returned listener is dropped.
    pub fn attach(self: &Arc<Self>, conn: &Connection) -> Listener {
        let store = Arc::downgrade(self);
        conn.on(move |event| {
            if let ServerEvent::AgentEvent(agent_event) = event {
                if let Some(store) = store.upgrade() {
                    trace!(task_id = %agent_event.task_id, "Storing agent event");
                    store.add_event(agent_event.clone());
                }
            }
        })
    }
}
