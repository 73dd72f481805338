//! HTTP client for the inspection REST API.
//!
//! [`RemoteApi`] is the seam the offline components talk through;
//! [`HttpApiClient`] is the `reqwest` implementation. Tests swap in fakes.

use std::sync::Arc;
use std::time::Duration;

use firespec_core::{InspectionId, ProjectId};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::connectivity::{OfflineError, ReachabilityProbe};
use crate::types::{WriteOperation, WriteRequest};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const PROJECT_RESOURCE: &str = "project";
pub const INSPECTION_RESOURCE: &str = "inspection";

pub fn projects_path() -> String {
    "projects".to_string()
}

pub fn project_path(project_id: ProjectId) -> String {
    format!("projects/{project_id}")
}

pub fn inspections_path(project_id: ProjectId) -> String {
    format!("projects/{project_id}/inspections")
}

pub fn inspection_path(project_id: ProjectId, inspection_id: InspectionId) -> String {
    format!("projects/{project_id}/inspections/{inspection_id}")
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("client is offline")]
    Offline,
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("API error ({status}): {}", .message.as_deref().unwrap_or("no message"))]
    Status { status: u16, message: Option<String> },
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<OfflineError> for ApiError {
    fn from(_: OfflineError) -> Self {
        ApiError::Offline
    }
}

impl ApiError {
    /// The server was never reached; the request may be retried later.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ApiError::Offline | ApiError::Network(_) | ApiError::Timeout)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Status { status, message } => match status {
                400 | 422 => message
                    .clone()
                    .unwrap_or_else(|| "Invalid input. Please check your data.".to_string()),
                401 => "Unauthorized. Please log in again.".to_string(),
                403 => "You do not have permission to perform this action.".to_string(),
                404 => "Requested resource not found.".to_string(),
                500 => "Internal server error. Please try again later.".to_string(),
                _ => "Unexpected error. Please try again.".to_string(),
            },
            ApiError::Offline | ApiError::Network(_) | ApiError::Timeout => {
                "Unable to reach the server. Please check your connection.".to_string()
            }
            ApiError::Parse(_) => "Unexpected error occurred.".to_string(),
        }
    }
}

/// Operations the offline layer needs from the server.
#[async_trait::async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<Value>, ApiError>;

    async fn list_inspections(&self, project_id: ProjectId) -> Result<Vec<Value>, ApiError>;

    async fn get_inspection(
        &self,
        project_id: ProjectId,
        inspection_id: InspectionId,
    ) -> Result<Value, ApiError>;

    /// Most recent inspection of a project, used to prefill a new one.
    async fn latest_inspection(&self, project_id: ProjectId) -> Result<Option<Value>, ApiError>;

    async fn change_log(
        &self,
        project_id: ProjectId,
        inspection_id: InspectionId,
    ) -> Result<Vec<Value>, ApiError>;

    /// Send a mutation; returns the unwrapped response body.
    async fn execute(&self, request: &WriteRequest) -> Result<Value, ApiError>;
}

/// Obtains a fresh bearer token after the server answered 401.
#[async_trait::async_trait]
pub trait TokenRefresher: Send + Sync {
    /// `None` when the session cannot be renewed.
    async fn refresh(&self, current: Option<&str>) -> Option<String>;
}

/// `reqwest`-backed [`RemoteApi`].
pub struct HttpApiClient {
    base_url: String,
    client: reqwest::Client,
    token: RwLock<Option<String>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl HttpApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            token: RwLock::new(None),
            refresher: None,
        })
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
            ..self
        }
    }

    pub fn with_refresher(self, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            refresher: Some(refresher),
            ..self
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let token = self.token().await;
        let response = self.send_once(&method, path, body, token.as_deref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(refresher) = &self.refresher {
                match refresher.refresh(token.as_deref()).await {
                    Some(fresh) => {
                        tracing::debug!(%path, "token refreshed; retrying request");
                        *self.token.write().await = Some(fresh.clone());
                        let retried = self.send_once(&method, path, body, Some(&fresh)).await?;
                        return unwrap_response(retried).await;
                    }
                    None => tracing::warn!(%path, "token refresh failed"),
                }
            }
        }

        unwrap_response(response).await
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut req = self.client.request(method.clone(), self.url(path));

        if let Some(token) = token {
            req = req.bearer_auth(token);
        }

        // A cached GET would mask an unreachable server.
        if *method == Method::GET {
            req = req.header("Cache-Control", "no-cache").header("Pragma", "no-cache");
        }

        if let Some(body) = body {
            req = req.json(body);
        }

        req.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::Network(e.to_string())
            }
        })
    }

    async fn get_list(&self, path: &str) -> Result<Vec<Value>, ApiError> {
        match self.request(Method::GET, path, None).await? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(ApiError::Parse(format!(
                "expected a list from {path}, got {}",
                json_kind(&other)
            ))),
        }
    }
}

/// Check status, then peel the `{ "data": ... }` envelope.
async fn unwrap_response(response: reqwest::Response) -> Result<Value, ApiError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ApiError::Network(e.to_string()))?;

    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            message: error_message(&text),
        });
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    let body: Value = serde_json::from_str(&text).map_err(|e| ApiError::Parse(e.to_string()))?;
    Ok(unwrap_envelope(body))
}

pub(crate) fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn error_message(text: &str) -> Option<String> {
    let body: Value = serde_json::from_str(text).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn method_for(operation: WriteOperation) -> Method {
    match operation {
        WriteOperation::Create => Method::POST,
        WriteOperation::Update => Method::PUT,
        WriteOperation::Delete => Method::DELETE,
    }
}

#[async_trait::async_trait]
impl RemoteApi for HttpApiClient {
    async fn list_projects(&self) -> Result<Vec<Value>, ApiError> {
        self.get_list(&projects_path()).await
    }

    async fn list_inspections(&self, project_id: ProjectId) -> Result<Vec<Value>, ApiError> {
        self.get_list(&inspections_path(project_id)).await
    }

    async fn get_inspection(
        &self,
        project_id: ProjectId,
        inspection_id: InspectionId,
    ) -> Result<Value, ApiError> {
        self.request(Method::GET, &inspection_path(project_id, inspection_id), None)
            .await
    }

    async fn latest_inspection(&self, project_id: ProjectId) -> Result<Option<Value>, ApiError> {
        let path = format!("{}/latest", inspections_path(project_id));
        match self.request(Method::GET, &path, None).await {
            Ok(Value::Null) => Ok(None),
            Ok(inspection) => Ok(Some(inspection)),
            Err(ApiError::Status { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn change_log(
        &self,
        project_id: ProjectId,
        inspection_id: InspectionId,
    ) -> Result<Vec<Value>, ApiError> {
        let path = format!("{}/logs", inspection_path(project_id, inspection_id));
        self.get_list(&path).await
    }

    async fn execute(&self, request: &WriteRequest) -> Result<Value, ApiError> {
        let body = match request.operation {
            WriteOperation::Delete => None,
            _ => Some(&request.payload),
        };
        self.request(method_for(request.operation), &request.resource_path, body)
            .await
    }
}

#[async_trait::async_trait]
impl ReachabilityProbe for HttpApiClient {
    /// Any HTTP answer counts as reachable, whatever its status.
    async fn is_reachable(&self) -> bool {
        self.send_once(&Method::GET, "", None, None).await.is_ok()
    }
}
