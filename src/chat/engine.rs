use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::message::{ChatMessage, ChatRequest};
use super::sse::{SseDecoder, StreamFrame};
use super::store::ChatStore;
use crate::api::{ApiClient, error_body};
use crate::errors::{ApiError, ChatError};
use crate::realtime::{Connection, Listener, ServerEvent};

/// How a streaming turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
    /// The endpoint answered non-2xx; the body was rendered into the bubble.
    Rejected { status: u16 },
    /// The request or body read failed; the message was rendered into the bubble.
    Failed { message: String },
}

/// Drives streamed chat turns against `POST /chat` and keeps the shared
/// [`ChatStore`] consistent with push notifications.
pub struct ChatEngine {
    api: Arc<ApiClient>,
    store: Arc<ChatStore>,
    inflight: Mutex<Option<(u64, CancellationToken)>>,
    next_turn: AtomicU64,
}

impl ChatEngine {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self::with_store(api, Arc::new(ChatStore::new()))
    }

    pub fn with_store(api: Arc<ApiClient>, store: Arc<ChatStore>) -> Self {
        Self {
            api,
            store,
            inflight: Mutex::new(None),
            next_turn: AtomicU64::new(1),
        }
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    /// Send one user turn and stream the assistant's reply into the store.
    ///
    /// The user message and an empty assistant placeholder are appended before
    /// any network I/O. Every failure is rendered into the placeholder rather
    /// than returned; the streaming flag is always cleared on return.
    pub async fn send(&self, text: &str) -> TurnOutcome {
        let user = ChatMessage::user(text);
        let placeholder = ChatMessage::placeholder();
        let request = ChatRequest {
            messages: self.store.history_with(&user),
        };

        let mut assistant_id = placeholder.id.clone();
        self.store.add(user);
        self.store.add(placeholder);
        self.store.set_streaming(true);

        let turn = self.next_turn.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *self.inflight() = Some((turn, cancel.clone()));

        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.stream_turn(&request, &mut assistant_id) => Some(result),
        };

        let outcome = match result {
            None => {
                debug!(message_id = %assistant_id, "Chat turn cancelled");
                TurnOutcome::Cancelled
            }
            Some(Ok(())) => TurnOutcome::Completed,
            Some(Err(ChatError::Api(ApiError::Http { status, body }))) => {
                warn!(status, "Chat endpoint rejected turn");
                self.store
                    .set_content(&assistant_id, &format!("Error: {} — {}", status, body));
                TurnOutcome::Rejected { status }
            }
            Some(Err(e)) => {
                let message = network_message(&e);
                warn!(error = %message, "Chat turn failed");
                self.store
                    .set_content(&assistant_id, &format!("Error: {}", message));
                TurnOutcome::Failed { message }
            }
        };

        self.store.finish_streaming(&assistant_id);
        self.store.set_streaming(false);
        let mut inflight = self.inflight();
        if inflight.as_ref().is_some_and(|(current, _)| *current == turn) {
            *inflight = None;
        }
        outcome
    }

    async fn stream_turn(
        &self,
        request: &ChatRequest,
        assistant_id: &mut String,
    ) -> Result<(), ChatError> {
        let resp = self.api.open_chat_stream(request).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = error_body(resp).await;
            return Err(ApiError::Http {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let mut decoder = SseDecoder::new();
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(ChatError::Stream)?;
            for frame in decoder.feed(&chunk) {
                self.apply_frame(frame, assistant_id);
            }
        }
        for frame in decoder.finish() {
            self.apply_frame(frame, assistant_id);
        }
        Ok(())
    }

    fn apply_frame(&self, frame: StreamFrame, assistant_id: &mut String) {
        match frame {
            StreamFrame::Delta { text } => {
                self.store.append(assistant_id, &text);
            }
            StreamFrame::ToolUse(call) => {
                self.store.add_tool_call(assistant_id, call);
            }
            StreamFrame::MessageId { id } => {
                if self.store.rename(assistant_id, &id) {
                    *assistant_id = id;
                }
            }
            StreamFrame::Error { error } => {
                let notice = format!("\n\nError: {}", error.as_deref().unwrap_or("unknown"));
                self.store.append(assistant_id, &notice);
            }
        }
    }

    /// Abort the in-flight turn, if any. Safe to call in any state.
    pub fn stop(&self) {
        if let Some((_, token)) = self.inflight().take() {
            token.cancel();
        }
    }

    /// Abort any in-flight turn and empty the conversation.
    pub fn clear(&self) {
        self.stop();
        self.store.clear();
        self.store.set_streaming(false);
    }

    pub fn is_streaming(&self) -> bool {
        self.store.is_streaming()
    }

    /// Replace the conversation with the persisted history. On failure the
    /// current list is left untouched.
    pub async fn fetch_messages(&self) -> Result<usize, ChatError> {
        match self.api.chat_messages().await {
            Ok(messages) => {
                let count = messages.len();
                self.store.set_messages(messages);
                info!(count, "Loaded chat history");
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, "Failed to load chat history");
                Err(e.into())
            }
        }
    }

    /// Merge one push notification into the conversation by id.
    pub fn apply_push(&self, event: &ServerEvent) {
        apply_push(&self.store, event);
    }

    /// Merge chat pushes from `conn` until the returned listener is dropped.
    pub fn attach(&self, conn: &Connection) -> Listener {
        let store = Arc::downgrade(&self.store);
        conn.on(move |event| {
            if let Some(store) = store.upgrade() {
                apply_push(&store, event);
            }
        })
    }

    fn inflight(&self) -> MutexGuard<'_, Option<(u64, CancellationToken)>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn apply_push(store: &ChatStore, event: &ServerEvent) {
    match event {
        ServerEvent::ChatNew(message) => {
            store.add(message.clone());
        }
        ServerEvent::ChatMessage(payload) => {
            if let Some(message) = payload.to_chat_message() {
                store.add(message);
            }
        }
        ServerEvent::ChatUpdate {
            message_id,
            content,
        } => {
            store.set_content(message_id, content);
        }
        ServerEvent::ChatDelete { message_id } => {
            store.remove(message_id);
        }
        _ => {}
    }
}

fn network_message(err: &ChatError) -> String {
    match err {
        ChatError::Api(ApiError::Transport(e)) | ChatError::Stream(e) => e.to_string(),
        other => other.to_string(),
    }
}
