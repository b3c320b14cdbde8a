use tokio::sync::watch;

use super::message::{ChatMessage, ChatTurn, ToolCall};

/// Observable conversation state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    pub messages: Vec<ChatMessage>,
    pub is_streaming: bool,
}

/// Ordered message list shared by the streaming turn and push merges.
///
/// Every mutation is keyed by message id; operations on an unknown id are
/// no-ops.
pub struct ChatStore {
    state: watch::Sender<ChatState>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ChatState::default());
        Self { state }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ChatState {
        self.state.borrow().clone()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.borrow().messages.clone()
    }

    pub fn message(&self, id: &str) -> Option<ChatMessage> {
        self.state.borrow().messages.iter().find(|m| m.id == id).cloned()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.borrow().is_streaming
    }

    pub fn len(&self) -> usize {
        self.state.borrow().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upstream history: every current message plus `next`, as role/content pairs.
    pub fn history_with(&self, next: &ChatMessage) -> Vec<ChatTurn> {
        let state = self.state.borrow();
        state
            .messages
            .iter()
            .chain(std::iter::once(next))
            .map(ChatMessage::turn)
            .collect()
    }

    pub fn set_messages(&self, messages: Vec<ChatMessage>) {
        self.state.send_modify(|s| s.messages = messages);
    }

    /// Append unless a message with the same id is already present.
    pub fn add(&self, message: ChatMessage) -> bool {
        self.state.send_if_modified(|s| {
            if s.messages.iter().any(|m| m.id == message.id) {
                return false;
            }
            s.messages.push(message);
            true
        })
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut ChatMessage)) -> bool {
        self.state.send_if_modified(|s| match s.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                f(message);
                true
            }
            None => false,
        })
    }

    pub fn append(&self, id: &str, text: &str) -> bool {
        self.modify(id, |m| m.content.push_str(text))
    }

    pub fn set_content(&self, id: &str, content: &str) -> bool {
        self.modify(id, |m| m.content = content.to_string())
    }

    /// Record a tool call. A call whose id is already known is completed in
    /// place instead of appended.
    pub fn add_tool_call(&self, id: &str, call: ToolCall) -> bool {
        self.modify(id, |m| {
            match m.tool_calls.iter_mut().find(|existing| existing.id == call.id) {
                Some(existing) => existing.complete(call.result),
                None => m.tool_calls.push(call),
            }
        })
    }

    /// Replace a message's id in place, keeping its position.
    ///
    /// If another entry already carries `new_id` (a push echo that beat the
    /// rename), that entry is dropped so the list holds one message per id.
    pub fn rename(&self, old_id: &str, new_id: &str) -> bool {
        if old_id == new_id {
            return false;
        }
        self.state.send_if_modified(|s| {
            let Some(pos) = s.messages.iter().position(|m| m.id == old_id) else {
                return false;
            };
            s.messages[pos].id = new_id.to_string();
            let mut index = 0;
            s.messages.retain(|m| {
                let keep = index == pos || m.id != new_id;
                index += 1;
                keep
            });
            true
        })
    }

    pub fn finish_streaming(&self, id: &str) -> bool {
        self.modify(id, |m| m.is_streaming = false)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.state.send_if_modified(|s| {
            let before = s.messages.len();
            s.messages.retain(|m| m.id != id);
            s.messages.len() != before
        })
    }

    pub fn clear(&self) {
        self.state.send_modify(|s| s.messages.clear());
    }

    pub fn set_streaming(&self, streaming: bool) {
        self.state.send_if_modified(|s| {
            let changed = s.is_streaming != streaming;
            s.is_streaming = streaming;
            changed
        });
    }
}
