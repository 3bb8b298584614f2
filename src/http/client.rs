//! HTTP client for provider and agent REST APIs
//!
//! Thin wrapper over reqwest with a base URL, default headers and
//! credentials, returning buffered [`HttpResponse`] values.

use anyhow::{Context, Result};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, Method,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// HTTP client errors
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Connection refused to {0}")]
    ConnectionRefused(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Clone, Debug)]
enum Credentials {
    Basic { user: String, password: String },
    Bearer(String),
}

/// HTTP client
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Option<String>,
    default_headers: HeaderMap,
    credentials: Option<Credentials>,
    timeout_secs: u64,
}

impl HttpClient {
    /// Create a client with the default 30 second timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(30)
    }

    /// Create client with custom timeout
    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: None,
            default_headers: HeaderMap::new(),
            credentials: None,
            timeout_secs,
        })
    }

    /// Set base URL for requests
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Add default header
    pub fn default_header(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let header_name =
            HeaderName::from_bytes(key.as_ref().as_bytes()).context("Invalid header name")?;
        let header_value = HeaderValue::from_str(value.as_ref()).context("Invalid header value")?;
        self.default_headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Authenticate every request with HTTP basic auth
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::Basic {
            user: user.into(),
            password: password.into(),
        });
        self
    }

    /// Authenticate every request with a bearer token
    pub fn bearer_auth(mut self, token: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::Bearer(token.into()));
        self
    }

    /// Build full URL
    fn build_url(&self, path: &str) -> String {
        match &self.base_url {
            Some(base) => {
                if path.starts_with("http://") || path.starts_with("https://") {
                    path.to_string()
                } else {
                    format!("{}{}", base.trim_end_matches('/'), path)
                }
            }
            None => path.to_string(),
        }
    }

    /// Send HTTP request
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = self.build_url(&request.url);
        debug!("Sending {} request to {}", request.method, url);

        let method =
            Method::from_bytes(request.method.as_bytes()).context("Invalid HTTP method")?;

        let mut req_builder = self.client.request(method, &url);

        for (key, value) in &self.default_headers {
            req_builder = req_builder.header(key, value);
        }

        req_builder = match &self.credentials {
            Some(Credentials::Basic { user, password }) => {
                req_builder.basic_auth(user, Some(password))
            }
            Some(Credentials::Bearer(token)) => req_builder.bearer_auth(token),
            None => req_builder,
        };

        req_builder = match request.body {
            RequestBody::Empty => req_builder,
            RequestBody::Form(fields) => req_builder.form(&fields),
            RequestBody::Json(value) => req_builder.json(&value),
        };

        let start = std::time::Instant::now();

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow::anyhow!(HttpError::Timeout(self.timeout_secs))
            } else if e.is_connect() {
                anyhow::anyhow!(HttpError::ConnectionRefused(url.clone()))
            } else {
                anyhow::anyhow!(HttpError::RequestFailed(e.to_string()))
            }
        })?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        debug!(
            "Response: {} {} in {}ms",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            duration_ms
        );

        Ok(HttpResponse {
            status_code: status.as_u16(),
            body,
            duration_ms,
        })
    }

    /// Convenience method for GET request
    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.send(HttpRequest::get(url)).await
    }

    /// POST an `application/x-www-form-urlencoded` body
    pub async fn post_form(&self, url: &str, fields: Vec<(String, String)>) -> Result<HttpResponse> {
        self.send(HttpRequest::post(url).form(fields)).await
    }

    /// POST a JSON body
    pub async fn post_json(&self, url: &str, body: &impl Serialize) -> Result<HttpResponse> {
        let value = serde_json::to_value(body).context("Failed to serialize request body")?;
        self.send(HttpRequest::post(url).json(value)).await
    }
}

#[derive(Clone, Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
}

/// HTTP request builder
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(fields);
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }
}

/// HTTP response
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: String,
    pub duration_ms: u64,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Fail with [`HttpError::Status`] unless the status is 2xx
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(HttpError::Status {
                status: self.status_code,
                body: self.body,
            })
        }
    }

    /// Parse the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).context("Failed to parse response body as JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Form, http::HeaderMap as AxumHeaders, routing::post, Json, Router};
    use std::collections::HashMap;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_http_request_builder() {
        let req = HttpRequest::post("/calls").form(vec![("To".into(), "+15550100".into())]);

        assert_eq!(req.method, "POST");
        assert_eq!(req.url, "/calls");
        assert!(matches!(req.body, RequestBody::Form(ref f) if f.len() == 1));
    }

    #[test]
    fn test_http_response_status() {
        let resp = HttpResponse {
            status_code: 401,
            body: "denied".to_string(),
            duration_ms: 5,
        };

        assert!(!resp.is_success());
        let err = resp.error_for_status().unwrap_err();
        assert!(matches!(err, HttpError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_post_form_with_basic_auth() {
        let router = Router::new().route(
            "/echo",
            post(
                |headers: AxumHeaders, Form(fields): Form<HashMap<String, String>>| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    Json(serde_json::json!({ "auth": auth, "to": fields.get("To") }))
                },
            ),
        );
        let base = serve(router).await;

        let client = HttpClient::new()
            .unwrap()
            .base_url(base)
            .basic_auth("AC1", "secret");
        let resp = client
            .post_form("/echo", vec![("To".into(), "+15550100".into())])
            .await
            .unwrap();

        let body: serde_json::Value = resp.json().unwrap();
        assert!(body["auth"].as_str().unwrap().starts_with("Basic "));
        assert_eq!(body["to"], "+15550100");
    }

    #[tokio::test]
    async fn test_post_json_with_bearer() {
        let router = Router::new().route(
            "/echo",
            post(
                |headers: AxumHeaders, Json(body): Json<serde_json::Value>| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    Json(serde_json::json!({ "auth": auth, "body": body }))
                },
            ),
        );
        let base = serve(router).await;

        let client = HttpClient::new().unwrap().base_url(base).bearer_auth("tok");
        let resp = client
            .post_json("/echo", &serde_json::json!({ "phone": "+1" }))
            .await
            .unwrap();

        let body: serde_json::Value = resp.json().unwrap();
        assert_eq!(body["auth"], "Bearer tok");
        assert_eq!(body["body"]["phone"], "+1");
    }
}
