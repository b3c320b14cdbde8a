//! Bearer-authenticated REST client for the dashboard backend.
//!
//! The token is requested from the [`TokenProvider`] on every call, never
//! captured at construction time.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::auth::TokenProvider;
use crate::chat::ChatRequest;
use crate::chat::ChatMessage;
use crate::errors::ApiError;
use crate::models::{
    Agent, AgentStatus, DeploymentStatus, MergeBranchRequest, MergeBranchResult, NewTask, Task,
    TaskPatch, TaskQuery,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url = base_url.into();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ApiError::InvalidUrl { url: base_url });
        }
        // No client-wide timeout: it would also cap streamed chat bodies.
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Whether the provider currently has a token.
    pub async fn has_token(&self) -> bool {
        self.tokens.token().await.is_some()
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.http.request(method, self.url(path));
        match self.tokens.token().await {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Send and map non-2xx responses to [`ApiError::Http`] with the body verbatim.
    async fn execute(&self, req: RequestBuilder) -> Result<Response, ApiError> {
        let resp = req.timeout(self.request_timeout).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = error_body(resp).await;
            return Err(ApiError::Http { status, body });
        }
        Ok(resp)
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let req = self.request(Method::GET, path).await.query(query);
        Self::decode(self.execute(req).await?).await
    }

    /// Untyped GET, used by the request cache.
    pub async fn get_value(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, ApiError> {
        self.get(path, query).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let req = self.request(Method::POST, path).await.json(body);
        Self::decode(self.execute(req).await?).await
    }

    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let req = self.request(Method::PATCH, path).await.json(body);
        Self::decode(self.execute(req).await?).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let req = self.request(Method::DELETE, path).await;
        self.execute(req).await?;
        Ok(())
    }

    // ── Typed endpoints ──────────────────────────────────────────────

    pub async fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>, ApiError> {
        self.get(query.path(), &query.query_pairs()).await
    }

    pub async fn get_task(&self, id: &str) -> Result<Task, ApiError> {
        self.get(&format!("/tasks/{}", id), &[]).await
    }

    pub async fn create_task(&self, task: &NewTask) -> Result<Task, ApiError> {
        self.post("/tasks", task).await
    }

    pub async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task, ApiError> {
        self.patch(&format!("/tasks/{}", id), patch).await
    }

    pub async fn delete_task(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/tasks/{}", id)).await
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>, ApiError> {
        self.get("/agents", &[]).await
    }

    pub async fn get_agent(&self, id: &str) -> Result<Agent, ApiError> {
        self.get(&format!("/agents/{}", id), &[]).await
    }

    pub async fn agent_status(&self) -> Result<Vec<AgentStatus>, ApiError> {
        self.get("/agents/status", &[]).await
    }

    pub async fn merge_branch(
        &self,
        task_id: &str,
        branch_name: &str,
    ) -> Result<MergeBranchResult, ApiError> {
        let body = MergeBranchRequest {
            branch_name: branch_name.to_string(),
        };
        self.post(&format!("/tasks/{}/merge", task_id), &body).await
    }

    pub async fn deployment_status(&self) -> Result<DeploymentStatus, ApiError> {
        self.get("/api/deployment-status", &[]).await
    }

    pub async fn chat_messages(&self) -> Result<Vec<ChatMessage>, ApiError> {
        self.get("/chat/messages", &[]).await
    }

    /// Open a streamed chat turn.
    ///
    /// The raw response is returned whatever its status: the streaming engine
    /// renders non-2xx bodies itself. Only transport failures are errors.
    pub async fn open_chat_stream(&self, body: &ChatRequest) -> Result<Response, ApiError> {
        let req = self
            .request(Method::POST, "/chat")
            .await
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(body);
        Ok(req.send().await?)
    }
}

/// Body of a failed response, or the read error when the body is unreadable.
pub(crate) async fn error_body(resp: Response) -> String {
    match resp.text().await {
        Ok(body) => body,
        Err(e) => format!("<unreadable body: {}>", e),
    }
}
