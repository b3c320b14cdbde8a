use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    #[default]
    Pending,
    Complete,
}

/// One tool invocation reported inside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ToolCallWire")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ToolCall {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            arguments: Value::Null,
            status: ToolStatus::Pending,
            result: None,
        }
    }

    /// Move to `Complete`, keeping an earlier result when `result` is `None`.
    pub fn complete(&mut self, result: Option<Value>) {
        self.status = ToolStatus::Complete;
        if result.is_some() {
            self.result = result;
        }
    }
}

/// Tool calls arrive either as a bare tool name or as a full object.
#[derive(Deserialize)]
#[serde(untagged)]
enum ToolCallWire {
    Name(String),
    Full {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        arguments: Option<Value>,
        #[serde(default)]
        input: Option<Value>,
        #[serde(default)]
        status: Option<ToolStatus>,
        #[serde(default)]
        result: Option<Value>,
    },
}

impl From<ToolCallWire> for ToolCall {
    fn from(wire: ToolCallWire) -> Self {
        match wire {
            // A bare name reports a use that already happened.
            ToolCallWire::Name(name) => {
                let mut call = ToolCall::pending(name);
                call.status = ToolStatus::Complete;
                call
            }
            ToolCallWire::Full {
                id,
                name,
                arguments,
                input,
                status,
                result,
            } => ToolCall {
                id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                name,
                arguments: arguments.or(input).unwrap_or(Value::Null),
                status: status.unwrap_or_default(),
                result,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing)]
    pub is_streaming: bool,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            is_streaming: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Empty assistant message that a streaming turn fills in.
    pub fn placeholder() -> Self {
        Self {
            is_streaming: true,
            ..Self::new(Role::Assistant, "")
        }
    }

    pub fn turn(&self) -> ChatTurn {
        ChatTurn {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// The role and content pair sent upstream. Tool calls are not echoed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatTurn>,
}
