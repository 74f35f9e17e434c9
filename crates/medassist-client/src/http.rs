//! HTTP implementation of [`ChatBackend`] using reqwest

use async_trait::async_trait;
use futures::StreamExt;
use medassist_config::BackendConfig;
use medassist_core::{ChatError, ChatResult, SessionId};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};

use crate::backend::{ChatBackend, PersistedMessage, SessionPayload, TurnReply, TurnRequest, TurnResponse};

const EVENT_STREAM: &str = "text/event-stream";
const JSON: &str = "application/json";

/// Client honouring the configured connect timeout
pub(crate) fn build_client(config: &BackendConfig) -> Client {
    Client::builder()
        .connect_timeout(config.connect_timeout())
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build configured HTTP client, using defaults");
            Client::new()
        })
}

pub struct HttpBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            client: build_client(&config),
            config,
        }
    }

    pub fn with_client(client: Client, config: BackendConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn url(&self, path: &str) -> ChatResult<String> {
        let origin = self.config.origin().ok_or_else(|| {
            ChatError::BackendUnavailable("no backend origin configured".to_string())
        })?;
        Ok(format!("{}{}", origin, path))
    }

    fn session_url(&self, id: &SessionId) -> ChatResult<String> {
        let path = self
            .config
            .sessions_path
            .replace("{id}", &urlencoding::encode(&id.to_string()));
        self.url(&path)
    }
}

/// Connection failures mean the backend is unreachable; anything else is a network error
fn map_send_error(e: reqwest::Error) -> ChatError {
    if e.is_connect() {
        ChatError::BackendUnavailable(e.to_string())
    } else if e.is_timeout() {
        ChatError::Network(format!("request timed out: {}", e))
    } else {
        ChatError::Network(e.to_string())
    }
}

fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase())
}

async fn error_body(response: Response) -> String {
    response.text().await.unwrap_or_default()
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn send_turn(&self, request: TurnRequest) -> ChatResult<TurnResponse> {
        let url = self.url(&self.config.chat_path)?;
        let accept = if request.stream { EVENT_STREAM } else { JSON };
        debug!(url = %url, stream = request.stream, session = ?request.session_id, "Sending turn");

        let response = self
            .client
            .post(&url)
            .header(ACCEPT, accept)
            .json(&request)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let content_type = content_type(&response).unwrap_or_default();
        let streaming = if content_type.starts_with(EVENT_STREAM) {
            true
        } else if content_type.starts_with(JSON) {
            false
        } else {
            request.stream
        };

        if streaming {
            let body = response
                .bytes_stream()
                .map(|chunk| {
                    chunk
                        .map(|bytes| bytes.to_vec())
                        .map_err(|e| ChatError::StreamInterrupted(e.to_string()))
                })
                .boxed();
            return Ok(TurnResponse::Streaming(body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ChatError::Network(e.to_string()))?;
        let reply: TurnReply = serde_json::from_slice(&bytes)
            .map_err(|e| ChatError::InvalidResponse(format!("turn reply: {}", e)))?;
        Ok(TurnResponse::Complete(reply))
    }

    async fn fetch_session(&self, id: &SessionId) -> ChatResult<Vec<PersistedMessage>> {
        let url = self.session_url(id)?;
        debug!(url = %url, "Fetching session");

        let response = self
            .client
            .get(&url)
            .timeout(self.config.request_timeout())
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!(session = %id, status = status.as_u16(), "Session could not be loaded");
            return Err(ChatError::SessionNotFound(id.clone()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ChatError::Network(e.to_string()))?;
        let payload: SessionPayload = serde_json::from_slice(&bytes)
            .map_err(|e| ChatError::InvalidResponse(format!("session {}: {}", id, e)))?;
        Ok(payload.into_messages())
    }

    async fn delete_session(&self, id: &SessionId) -> ChatResult<()> {
        let url = self.session_url(id)?;
        debug!(url = %url, "Deleting session");

        let response = self
            .client
            .delete(&url)
            .timeout(self.config.request_timeout())
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(session = %id, "Session already absent on server");
            return Ok(());
        }
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
