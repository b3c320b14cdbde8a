use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Tasks ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Planning,
    Coding,
    Reviewing,
    Debugging,
    Done,
    Failed,
    Escalated,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Coding => "coding",
            Self::Reviewing => "reviewing",
            Self::Debugging => "debugging",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Escalated => "escalated",
        }
    }

    /// No further agent work will happen for this task.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Escalated)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "planning" => Ok(Self::Planning),
            "coding" => Ok(Self::Coding),
            "reviewing" => Ok(Self::Reviewing),
            "debugging" => Ok(Self::Debugging),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "escalated" => Ok(Self::Escalated),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileChange {
    pub path: String,
    pub action: FileAction,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlannerOutput {
    pub summary: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileChange>,
    pub branch_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub repo_full_name: String,
    pub issue_body: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub planner_output: Option<PlannerOutput>,
    #[serde(default)]
    pub pr_number: Option<i64>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub fix_attempts: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// Body of `POST /tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub repo_full_name: String,
    pub issue_body: String,
}

/// Body of `PATCH /tasks/:id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_body: Option<String>,
}

/// Filter and pagination options for the task list.
///
/// The cache key and the request query are both derived from the same
/// ordered field list, so identical options always hit the same cache slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub repo: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl TaskQuery {
    /// Query pairs in a fixed order; unset options are omitted.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(page) = self.page {
            pairs.push(("page", page.to_string()));
        }
        if let Some(ref repo) = self.repo {
            pairs.push(("repo", repo.clone()));
        }
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        pairs
    }

    pub fn path(&self) -> &'static str {
        "/tasks"
    }

    pub fn cache_key(&self) -> String {
        let pairs = self.query_pairs();
        if pairs.is_empty() {
            return "tasks".to_string();
        }
        let query: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("tasks?{}", query.join("&"))
    }
}

// ── Agents ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentName {
    Planner,
    Coder,
    Reviewer,
}

impl AgentName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Coder => "coder",
            Self::Reviewer => "reviewer",
        }
    }
}

impl FromStr for AgentName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planner" => Ok(Self::Planner),
            "coder" => Ok(Self::Coder),
            "reviewer" => Ok(Self::Reviewer),
            _ => Err(format!("Invalid agent name: {}", s)),
        }
    }
}

/// Merge lifecycle reported by the reviewer's `actionState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeActionState {
    Merging,
    Merged,
    MergeFailed,
}

impl MergeActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merging => "merging",
            Self::Merged => "merged",
            Self::MergeFailed => "merge_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "merging" => Some(Self::Merging),
            "merged" => Some(Self::Merged),
            "merge_failed" => Some(Self::MergeFailed),
            _ => None,
        }
    }
}

/// One row of `GET /agents/status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub name: AgentName,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub waiting: u32,
    #[serde(default)]
    pub active: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub merge_status: Option<String>,
    #[serde(default)]
    pub awaiting_merge: Option<bool>,
    #[serde(default)]
    pub action_state: Option<String>,
}

impl AgentStatus {
    pub fn is_reviewer(&self) -> bool {
        self.agent_type.as_deref() == Some("review") || self.name == AgentName::Reviewer
    }

    pub fn merge_action_state(&self) -> Option<MergeActionState> {
        self.action_state.as_deref().and_then(MergeActionState::parse)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ── Agent events ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentEventType {
    Started,
    Progress,
    Completed,
    Failed,
    TaskStatusChanged,
    Other(String),
}

impl From<String> for AgentEventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "agent:started" => Self::Started,
            "agent:progress" => Self::Progress,
            "agent:completed" => Self::Completed,
            "agent:failed" => Self::Failed,
            "task:status_changed" => Self::TaskStatusChanged,
            _ => Self::Other(s),
        }
    }
}

impl From<AgentEventType> for String {
    fn from(t: AgentEventType) -> Self {
        match t {
            AgentEventType::Started => "agent:started".to_string(),
            AgentEventType::Progress => "agent:progress".to_string(),
            AgentEventType::Completed => "agent:completed".to_string(),
            AgentEventType::Failed => "agent:failed".to_string(),
            AgentEventType::TaskStatusChanged => "task:status_changed".to_string(),
            AgentEventType::Other(s) => s,
        }
    }
}

/// Progress report from one agent about one task. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    pub task_id: String,
    pub agent: AgentName,
    #[serde(rename = "type")]
    pub event_type: AgentEventType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Map<String, serde_json::Value>>,
    pub timestamp: String,
}

// ── Merge ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeBranchRequest {
    pub branch_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeBranchResult {
    pub merged: bool,
    pub message: String,
    #[serde(default)]
    pub pull_request_url: Option<String>,
}

// ── Deployment ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Ok,
    Error,
    Building,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DeploymentStatus {
    #[serde(default)]
    pub vercel: ServiceStatus,
    #[serde(default)]
    pub railway: ServiceStatus,
}
