//! HTTP client for the manager API.

use async_trait::async_trait;
use fleet_core::agent::{AgentStatus, ResourceSample};
use fleet_core::api::{
    API_KEY_HEADER, CompleteTaskRequest, HeartbeatRequest, RegisterRequest, RegisterResponse,
    TaskList,
};
use fleet_core::ids::AgentId;
use fleet_core::ports::ManagerApi;
use fleet_core::task::Task;
use fleet_core::{Error, Result};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

pub struct ManagerClient {
    client: Client,
    base_url: String,
    api_key: RwLock<Option<String>>,
}

impl ManagerClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fleet-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: RwLock::new(api_key),
        })
    }

    /// Swap the key used for subsequent requests.
    pub fn set_api_key(&self, key: String) {
        let mut guard = self.api_key.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(key);
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api/v1{}", self.base_url, path);
        let mut req = self.client.request(method, &url);

        let key = self.api_key.read().unwrap_or_else(|e| e.into_inner());
        if let Some(key) = key.as_deref() {
            req = req.header(API_KEY_HEADER, key);
        }

        req
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let res = req.send().await.map_err(|e| Error::Network(e.to_string()))?;
        match res.status() {
            s if s.is_success() => Ok(res),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Unauthorized),
            status => {
                let message = res.text().await.unwrap_or_default();
                Err(Error::Manager {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    /// `send` with a 404 reported as `missing` instead of a manager error.
    async fn send_for(
        &self,
        req: RequestBuilder,
        missing: impl FnOnce() -> Error,
    ) -> Result<Response> {
        match self.send(req).await {
            Err(Error::Manager { status: 404, .. }) => Err(missing()),
            other => other,
        }
    }

    async fn json<T: DeserializeOwned>(res: Response) -> Result<T> {
        res.json()
            .await
            .map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[async_trait]
impl ManagerApi for ManagerClient {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse> {
        let res = self
            .send(self.request(Method::POST, "/agents/register").json(request))
            .await?;
        Self::json(res).await
    }

    async fn heartbeat(&self, agent_id: AgentId, resources: &ResourceSample) -> Result<()> {
        let body = HeartbeatRequest {
            agent_id,
            status: AgentStatus::Online,
            resources: resources.clone(),
        };
        self.send_for(
            self.request(Method::POST, "/agents/heartbeat").json(&body),
            || Error::AgentNotFound(agent_id.to_string()),
        )
        .await?;
        debug!(agent_id = %agent_id, "Heartbeat sent");
        Ok(())
    }

    async fn pending_tasks(&self, agent_id: AgentId) -> Result<Vec<Task>> {
        let res = self
            .send(
                self.request(Method::GET, "/tasks")
                    .query(&[("agentId", agent_id.to_string()), ("status", "PENDING".to_string())]),
            )
            .await?;
        let list: TaskList = Self::json(res).await?;
        Ok(list.tasks)
    }

    async fn complete_task(&self, request: &CompleteTaskRequest) -> Result<()> {
        let path = format!("/tasks/{}/complete", request.task_id);
        self.send_for(self.request(Method::POST, &path).json(request), || {
            Error::TaskNotFound(request.task_id.to_string())
        })
        .await?;
        Ok(())
    }
}
