//! Tool and sub-agent registries
//!
//! Plain resource collections on the backend. Failures are returned to the
//! caller and never touch conversation state.

use medassist_config::BackendConfig;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::http::build_client;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Backend origin not configured")]
    NotConfigured,

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },
}

fn default_true() -> bool {
    true
}

/// A tool the agent may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments
    #[serde(default)]
    pub parameters: Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A configured sub-agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Names of the tools this agent may use
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

pub struct RegistryClient {
    client: Client,
    config: BackendConfig,
}

impl RegistryClient {
    pub fn new(config: BackendConfig) -> Self {
        Self::with_client(build_client(&config), config)
    }

    pub fn with_client(client: Client, config: BackendConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, collection: &str, suffix: &str) -> Result<String, RegistryError> {
        let origin = self.config.origin().ok_or(RegistryError::NotConfigured)?;
        Ok(format!("{}{}{}", origin, collection, suffix))
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, RegistryError> {
        let response = request
            .timeout(self.config.request_timeout())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RegistryError> {
        Ok(self.send(request).await?.json().await?)
    }

    // Tools

    pub async fn list_tools(&self) -> Result<Vec<Tool>, RegistryError> {
        let url = self.url(&self.config.tools_path, "")?;
        debug!(url = %url, "Listing tools");
        self.send_json(self.client.get(&url)).await
    }

    pub async fn create_tool(&self, tool: &Tool) -> Result<Tool, RegistryError> {
        let url = self.url(&self.config.tools_path, "")?;
        self.send_json(self.client.post(&url).json(tool)).await
    }

    pub async fn update_tool(&self, id: i64, tool: &Tool) -> Result<Tool, RegistryError> {
        let url = self.url(&self.config.tools_path, &format!("/{}", id))?;
        self.send_json(self.client.put(&url).json(tool)).await
    }

    pub async fn delete_tool(&self, id: i64) -> Result<(), RegistryError> {
        let url = self.url(&self.config.tools_path, &format!("/{}", id))?;
        self.send(self.client.delete(&url)).await?;
        Ok(())
    }

    // Sub-agents

    pub async fn list_agents(&self) -> Result<Vec<SubAgent>, RegistryError> {
        let url = self.url(&self.config.agents_path, "")?;
        debug!(url = %url, "Listing agents");
        self.send_json(self.client.get(&url)).await
    }

    pub async fn create_agent(&self, agent: &SubAgent) -> Result<SubAgent, RegistryError> {
        let url = self.url(&self.config.agents_path, "")?;
        self.send_json(self.client.post(&url).json(agent)).await
    }

    pub async fn update_agent(&self, id: i64, agent: &SubAgent) -> Result<SubAgent, RegistryError> {
        let url = self.url(&self.config.agents_path, &format!("/{}", id))?;
        self.send_json(self.client.put(&url).json(agent)).await
    }

    pub async fn delete_agent(&self, id: i64) -> Result<(), RegistryError> {
        let url = self.url(&self.config.agents_path, &format!("/{}", id))?;
        self.send(self.client.delete(&url)).await?;
        Ok(())
    }

    /// Duplicate an agent; returns the copy
    pub async fn clone_agent(&self, id: i64) -> Result<SubAgent, RegistryError> {
        let url = self.url(&self.config.agents_path, &format!("/{}/clone", id))?;
        self.send_json(self.client.post(&url)).await
    }

    /// Flip an agent's enabled flag; returns the updated agent
    pub async fn toggle_agent(&self, id: i64) -> Result<SubAgent, RegistryError> {
        let url = self.url(&self.config.agents_path, &format!("/{}/toggle", id))?;
        self.send_json(self.client.post(&url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry(server: &MockServer) -> RegistryClient {
        RegistryClient::new(BackendConfig {
            origin: Some(server.uri()),
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_backend_hits_connect_timeout() {
        // Non-routable address: the connect either fails fast or times out
        let registry = RegistryClient::new(BackendConfig {
            origin: Some("http://10.255.255.1:9".into()),
            connect_timeout_secs: 2,
            request_timeout_secs: 3600,
            ..Default::default()
        });

        match registry.list_tools().await {
            Err(RegistryError::Request(e)) => assert!(e.is_connect(), "{e:?}"),
            other => panic!("expected a connect error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_tools() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 1, "name": "patient_lookup", "description": "Find a patient"},
                {"id": 2, "name": "imaging_search", "enabled": false}
            ])))
            .mount(&mock_server)
            .await;

        let tools = registry(&mock_server).list_tools().await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "patient_lookup");
        assert!(tools[0].enabled);
        assert!(!tools[1].enabled);
    }

    #[tokio::test]
    async fn test_create_tool_posts_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/tools"))
            .and(body_partial_json(json!({"name": "dose_check"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9, "name": "dose_check"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let tool = Tool {
            id: None,
            name: "dose_check".into(),
            description: String::new(),
            parameters: json!({"type": "object"}),
            enabled: true,
        };
        let created = registry(&mock_server).create_tool(&tool).await.unwrap();
        assert_eq!(created.id, Some(9));
    }

    #[tokio::test]
    async fn test_toggle_and_clone_agent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/agents/3/toggle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 3, "name": "triage", "enabled": false})))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/agents/3/clone"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 4, "name": "triage (copy)"})))
            .mount(&mock_server)
            .await;

        let registry = registry(&mock_server);
        assert!(!registry.toggle_agent(3).await.unwrap().enabled);
        assert_eq!(registry.clone_agent(3).await.unwrap().id, Some(4));
    }

    #[tokio::test]
    async fn test_delete_missing_agent_is_status_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/agents/77"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such agent"))
            .mount(&mock_server)
            .await;

        let err = registry(&mock_server).delete_agent(77).await.unwrap_err();
        match err {
            RegistryError::Status { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such agent");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_origin() {
        let registry = RegistryClient::new(BackendConfig::default());
        assert!(matches!(
            registry.list_agents().await,
            Err(RegistryError::NotConfigured)
        ));
    }
}
