//! Public URL provisioning for the gateway
//!
//! The provider must reach the gateway over the internet. A
//! [`TunnelProvisioner`] turns the gateway's local port into a public
//! base URL and tears that exposure down again at the end of a run.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::http::HttpClient;

/// Local inspection API every ngrok agent exposes
pub const NGROK_API_URL: &str = "http://127.0.0.1:4040/api/tunnels";

/// Exposes a local port under a public base URL
#[async_trait]
pub trait TunnelProvisioner: Send {
    /// Expose `local_port`, returning the public base URL without a trailing slash
    async fn start(&mut self, local_port: u16) -> Result<String>;

    async fn stop(&mut self) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// No tunnel; the provider must reach the host directly
pub struct LocalTunnel {
    host: String,
}

impl LocalTunnel {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

#[async_trait]
impl TunnelProvisioner for LocalTunnel {
    async fn start(&mut self, local_port: u16) -> Result<String> {
        Ok(format!("http://{}:{}", self.host, local_port))
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// A tunnel managed outside this process, e.g. a fixed reverse proxy
pub struct StaticTunnel {
    url: String,
}

impl StaticTunnel {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl TunnelProvisioner for StaticTunnel {
    async fn start(&mut self, _local_port: u16) -> Result<String> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            bail!("Static tunnel URL must start with http:// or https://: {}", self.url);
        }
        Ok(self.url.trim_end_matches('/').to_string())
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Spawns `ngrok http <port>` and discovers its public URL
pub struct NgrokTunnel {
    binary: String,
    auth_token: Option<String>,
    api_url: String,
    discovery_attempts: u32,
    discovery_interval: Duration,
    child: Option<Child>,
}

impl NgrokTunnel {
    pub fn new(auth_token: Option<String>) -> Self {
        Self {
            binary: "ngrok".to_string(),
            auth_token,
            api_url: NGROK_API_URL.to_string(),
            discovery_attempts: 20,
            discovery_interval: Duration::from_millis(500),
            child: None,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

#[async_trait]
impl TunnelProvisioner for NgrokTunnel {
    async fn start(&mut self, local_port: u16) -> Result<String> {
        if self.child.is_some() {
            bail!("ngrok tunnel already running");
        }

        let mut command = Command::new(&self.binary);
        command
            .args(["http", &local_port.to_string(), "--log", "stdout"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(token) = &self.auth_token {
            command.env("NGROK_AUTHTOKEN", token);
        }

        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", self.binary))?;
        self.child = Some(child);

        let client = HttpClient::with_timeout(5)?;
        let url = match discover_public_url(
            &client,
            &self.api_url,
            self.discovery_attempts,
            self.discovery_interval,
        )
        .await
        {
            Ok(url) => url,
            Err(e) => {
                self.stop().await?;
                return Err(e);
            }
        };

        info!("ngrok tunnel established: {}", url);
        Ok(url)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            child.kill().await.context("Failed to stop ngrok")?;
            debug!("ngrok process stopped");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ngrok"
    }
}

#[derive(Debug, Deserialize)]
struct TunnelList {
    #[serde(default)]
    tunnels: Vec<TunnelInfo>,
}

#[derive(Debug, Deserialize)]
struct TunnelInfo {
    public_url: String,
}

/// Poll the ngrok API until a tunnel appears; the URL is forced to https
pub async fn discover_public_url(
    client: &HttpClient,
    api_url: &str,
    attempts: u32,
    interval: Duration,
) -> Result<String> {
    for attempt in 1..=attempts {
        match client.get(api_url).await {
            Ok(resp) if resp.is_success() => {
                let list: TunnelList = resp.json()?;
                let url = list
                    .tunnels
                    .iter()
                    .map(|t| t.public_url.as_str())
                    .find(|u| u.starts_with("https://"))
                    .or_else(|| list.tunnels.first().map(|t| t.public_url.as_str()));
                if let Some(url) = url {
                    return Ok(force_https(url));
                }
                debug!("ngrok API reports no tunnels yet (attempt {})", attempt);
            }
            Ok(resp) => debug!("ngrok API returned {} (attempt {})", resp.status_code, attempt),
            Err(e) => debug!("ngrok API not reachable yet (attempt {}): {}", attempt, e),
        }
        tokio::time::sleep(interval).await;
    }

    warn!("ngrok API at {} never reported a tunnel", api_url);
    bail!("No ngrok tunnel after {} attempts", attempts)
}

fn force_https(url: &str) -> String {
    let url = url.trim_end_matches('/');
    match url.strip_prefix("http://") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};

    #[tokio::test]
    async fn test_local_and_static() {
        let mut local = LocalTunnel::new("127.0.0.1");
        assert_eq!(local.start(8765).await.unwrap(), "http://127.0.0.1:8765");

        let mut fixed = StaticTunnel::new("https://gateway.example.com/");
        assert_eq!(fixed.start(8765).await.unwrap(), "https://gateway.example.com");

        let mut bad = StaticTunnel::new("gateway.example.com");
        assert!(bad.start(8765).await.is_err());
    }

    #[test]
    fn test_force_https() {
        assert_eq!(force_https("http://abc.ngrok.io"), "https://abc.ngrok.io");
        assert_eq!(force_https("https://abc.ngrok.io/"), "https://abc.ngrok.io");
    }

    #[tokio::test]
    async fn test_discover_public_url() {
        let router = Router::new().route(
            "/api/tunnels",
            get(|| async {
                Json(serde_json::json!({
                    "tunnels": [{ "public_url": "http://abc.ngrok-free.app", "proto": "http" }]
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let client = HttpClient::with_timeout(2).unwrap();
        let url = discover_public_url(
            &client,
            &format!("http://{addr}/api/tunnels"),
            3,
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        assert_eq!(url, "https://abc.ngrok-free.app");
    }

    #[tokio::test]
    async fn test_discover_gives_up() {
        let client = HttpClient::with_timeout(1).unwrap();
        let result =
            discover_public_url(&client, "http://127.0.0.1:9/api", 2, Duration::from_millis(5))
                .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ngrok_missing_binary() {
        let mut tunnel = NgrokTunnel::new(None).with_binary("/nonexistent/ngrok-binary");
        assert!(tunnel.start(8765).await.is_err());
        tunnel.stop().await.unwrap();
    }
}
