//! Realtime wire format.
//!
//! Every frame in either direction is a JSON text message
//! `{"event": "<name>", "data": <payload>}`. Inbound frames decode into the
//! closed [`ServerEvent`] sum type; names this client does not know land in
//! [`ServerEvent::Unknown`] instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{ChatMessage, Role};
use crate::errors::RealtimeError;
use crate::models::AgentEvent;

/// A logical push channel scoped to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Task(String),
    Agent(String),
    Conversation(String),
}

impl Channel {
    pub fn id(&self) -> &str {
        match self {
            Channel::Task(id) | Channel::Agent(id) | Channel::Conversation(id) => id,
        }
    }

    pub fn join_event(&self) -> &'static str {
        match self {
            Channel::Task(_) => "task:subscribe",
            Channel::Agent(_) => "agent:subscribe",
            Channel::Conversation(_) => "chat:join",
        }
    }

    pub fn leave_event(&self) -> &'static str {
        match self {
            Channel::Task(_) => "task:unsubscribe",
            Channel::Agent(_) => "agent:unsubscribe",
            Channel::Conversation(_) => "chat:leave",
        }
    }

    pub fn join_frame(&self) -> String {
        Frame::new(self.join_event(), Value::String(self.id().to_string())).to_json()
    }

    pub fn leave_frame(&self) -> String {
        Frame::new(self.leave_event(), Value::String(self.id().to_string())).to_json()
    }
}

/// Envelope shared by both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn to_json(&self) -> String {
        // A Frame holds only a String and a Value; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ── Push payloads ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdatePayload {
    pub task_id: String,
    pub status: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusPayload {
    pub agent_id: String,
    pub status: String,
    #[serde(default)]
    pub current_task_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, Value>>,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub message_id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub created_at: String,
}

impl ChatMessagePayload {
    /// Conversation entry for this payload, or `None` for roles the
    /// conversation view does not carry (e.g. `system`).
    pub fn to_chat_message(&self) -> Option<ChatMessage> {
        let role = match self.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => return None,
        };
        let timestamp = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map(|t| t.timestamp_millis())
            .unwrap_or_else(|_| chrono::Utc::now().timestamp_millis());
        Some(ChatMessage {
            id: self.message_id.clone(),
            role,
            content: self.content.clone(),
            tool_calls: Vec::new(),
            timestamp,
            is_streaming: false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventNewPayload {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
struct ChatNewData {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatPatchData {
    message_id: String,
    #[serde(default)]
    content: Option<String>,
}

/// Server-pushed notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    TaskUpdate(TaskUpdatePayload),
    AgentStatus(AgentStatusPayload),
    ChatMessage(ChatMessagePayload),
    ChatNew(ChatMessage),
    ChatUpdate { message_id: String, content: String },
    ChatDelete { message_id: String },
    EventNew(EventNewPayload),
    AgentEvent(AgentEvent),
    Unknown { event: String },
}

impl ServerEvent {
    /// Decode one inbound text frame.
    ///
    /// A known event whose payload does not match its schema is a
    /// [`RealtimeError::Protocol`]; an unknown event name is not an error.
    pub fn decode(text: &str) -> Result<Self, RealtimeError> {
        let frame: Frame =
            serde_json::from_str(text).map_err(|e| RealtimeError::Protocol(e.to_string()))?;
        let data = frame.data;
        let bad = |e: serde_json::Error| RealtimeError::Protocol(format!("{}: {}", frame.event, e));

        let event = match frame.event.as_str() {
            "task:update" => ServerEvent::TaskUpdate(serde_json::from_value(data).map_err(bad)?),
            "agent:status" => {
                ServerEvent::AgentStatus(serde_json::from_value(data).map_err(bad)?)
            }
            "chat:message" => {
                ServerEvent::ChatMessage(serde_json::from_value(data).map_err(bad)?)
            }
            "chat:new" => {
                let payload: ChatNewData = serde_json::from_value(data).map_err(bad)?;
                ServerEvent::ChatNew(payload.message)
            }
            "chat:update" => {
                let payload: ChatPatchData = serde_json::from_value(data).map_err(bad)?;
                ServerEvent::ChatUpdate {
                    message_id: payload.message_id,
                    content: payload.content.unwrap_or_default(),
                }
            }
            "chat:delete" => {
                let payload: ChatPatchData = serde_json::from_value(data).map_err(bad)?;
                ServerEvent::ChatDelete {
                    message_id: payload.message_id,
                }
            }
            "event:new" => ServerEvent::EventNew(serde_json::from_value(data).map_err(bad)?),
            "agent:event" => ServerEvent::AgentEvent(serde_json::from_value(data).map_err(bad)?),
            _ => ServerEvent::Unknown { event: frame.event },
        };
        Ok(event)
    }

    pub fn name(&self) -> &str {
        match self {
            ServerEvent::TaskUpdate(_) => "task:update",
            ServerEvent::AgentStatus(_) => "agent:status",
            ServerEvent::ChatMessage(_) => "chat:message",
            ServerEvent::ChatNew(_) => "chat:new",
            ServerEvent::ChatUpdate { .. } => "chat:update",
            ServerEvent::ChatDelete { .. } => "chat:delete",
            ServerEvent::EventNew(_) => "event:new",
            ServerEvent::AgentEvent(_) => "agent:event",
            ServerEvent::Unknown { event } => event,
        }
    }
}
