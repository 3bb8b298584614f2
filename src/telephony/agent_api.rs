//! HTTP client for the agent's call-origination endpoint

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{error, info};

use super::AgentApi;
use crate::http::HttpClient;

/// Bearer-authenticated POST; `201 Created` means the call was accepted
pub struct HttpAgentApi {
    client: HttpClient,
    url: String,
}

impl HttpAgentApi {
    pub fn new(url: impl Into<String>, auth_token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new()?.bearer_auth(auth_token),
            url: url.into(),
        })
    }
}

#[async_trait]
impl AgentApi for HttpAgentApi {
    async fn originate_call(&self, parameters: &serde_json::Value) -> Result<()> {
        info!("Requesting outbound call from agent API at {}", self.url);
        let resp = self.client.post_json(&self.url, parameters).await?;

        if resp.status_code != 201 {
            error!(
                "Agent API refused outbound call: {} {}",
                resp.status_code, resp.body
            );
            bail!(
                "Failed to create outbound call. Status: {}, Response: {}",
                resp.status_code,
                resp.body
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, http::StatusCode, routing::post, Json, Router};

    async fn mock_agent(status: StatusCode) -> String {
        let router = Router::new().route(
            "/calls",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    == Some("Bearer agent-token");
                if !authorized || body["to"].is_null() {
                    return StatusCode::UNAUTHORIZED;
                }
                status
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}/calls")
    }

    #[tokio::test]
    async fn test_originate_created() {
        let api = HttpAgentApi::new(mock_agent(StatusCode::CREATED).await, "agent-token").unwrap();
        api.originate_call(&serde_json::json!({ "to": "+15550001" }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_originate_requires_201() {
        let api = HttpAgentApi::new(mock_agent(StatusCode::OK).await, "agent-token").unwrap();
        let err = api
            .originate_call(&serde_json::json!({ "to": "+15550001" }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Status: 200"));
    }
}
