//! Event Store: bounded per-task agent event logs fed by realtime pushes.

mod store;

pub use store::{EventStore, MAX_EVENTS_PER_TASK};
