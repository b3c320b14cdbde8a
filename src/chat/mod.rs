//! Chat Streaming Engine.
//!
//! A turn appends the user message and an empty assistant placeholder, then
//! streams `POST /chat` as server-sent events into the placeholder:
//!
//! | event        | effect                                       |
//! |--------------|----------------------------------------------|
//! | `delta`      | append `text` to the assistant content        |
//! | `tool_use`   | append (or complete) a tool call              |
//! | `message_id` | rename the placeholder to the server id       |
//! | `error`      | append `\n\nError: <error>`                   |
//!
//! Push notifications (`chat:new`, `chat:update`, `chat:delete`,
//! `chat:message`) merge into the same [`ChatStore`] by id.

mod engine;
mod message;
mod sse;
mod store;

pub use engine::{ChatEngine, TurnOutcome};
pub use message::{ChatMessage, ChatRequest, ChatTurn, Role, ToolCall, ToolStatus};
pub use sse::{SseDecoder, StreamFrame};
pub use store::{ChatState, ChatStore};
