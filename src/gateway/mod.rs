//! Inbound event gateway
//!
//! HTTP + WebSocket server the telephony provider calls back into. It runs
//! as tasks on the shared runtime, independent of the runner's task, so
//! webhooks are served while a test case is suspended waiting on them.

mod routes;
mod session;
mod stream;
mod tunnel;

pub use routes::{CALLBACK_PATH, CONNECT_PATH, RECORDING_PATH};
pub use session::MediaSessions;
pub use stream::{MediaCall, MediaEvent, OutboundFrame};
pub use tunnel::{LocalTunnel, NgrokTunnel, StaticTunnel, TunnelProvisioner};

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::correlation::{control_channel, ControlSender, CorrelationTable, RecordingLedger};
use crate::engine::{ConversationEngine, ConversationScript};
use crate::error::HarnessError;
use crate::models::CallId;
use routes::GatewayState;

/// Listener settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    /// 0 picks a free port
    pub port: u16,
    /// Bounded wait for the server to release its port on stop
    pub shutdown_grace_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            shutdown_grace_secs: 15,
        }
    }
}

/// State the gateway's handlers share with the runner
#[derive(Clone)]
pub struct GatewayShared {
    pub table: Arc<CorrelationTable>,
    pub recordings: Arc<RecordingLedger>,
    pub sessions: Arc<MediaSessions>,
    pub engine: Arc<dyn ConversationEngine>,
    pub script: Arc<ConversationScript>,
    /// Call ids announced by the connect webhook
    pub new_calls: ControlSender<CallId>,
}

struct RunningGateway {
    local_addr: SocketAddr,
    public_url: String,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Provider-facing server plus its public tunnel
pub struct InboundGateway {
    config: GatewayConfig,
    tunnel: Box<dyn TunnelProvisioner>,
    shared: GatewayShared,
    running: Option<RunningGateway>,
}

impl InboundGateway {
    pub fn new(
        config: GatewayConfig,
        tunnel: Box<dyn TunnelProvisioner>,
        shared: GatewayShared,
    ) -> Self {
        Self {
            config,
            tunnel,
            shared,
            running: None,
        }
    }

    /// Bind, expose and serve. Idempotent: a running gateway returns its URL.
    pub async fn start(&mut self) -> Result<String, HarnessError> {
        if let Some(running) = &self.running {
            return Ok(running.public_url.clone());
        }

        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| {
                HarnessError::SetupFailure(format!(
                    "cannot bind {}:{}: {}",
                    self.config.host, self.config.port, e
                ))
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| HarnessError::SetupFailure(format!("listener has no address: {e}")))?;

        let public_url = self
            .tunnel
            .start(local_addr.port())
            .await
            .map_err(|e| {
                HarnessError::SetupFailure(format!("{} tunnel failed: {:#}", self.tunnel.name(), e))
            })?;

        let (completion_tx, completion_rx) = control_channel();
        let dispatcher = tokio::spawn(routes::dispatch_completions(
            completion_rx,
            Arc::clone(&self.shared.table),
        ));

        let shared = self.shared.clone();
        let app = routes::router(GatewayState {
            public_url: public_url.clone(),
            new_calls: shared.new_calls,
            completions: completion_tx,
            engine: shared.engine,
            script: shared.script,
            sessions: shared.sessions,
            recordings: shared.recordings,
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!("Gateway server error: {}", e);
            }
        });

        info!(
            "Gateway listening on {} (public URL {})",
            local_addr, public_url
        );

        self.running = Some(RunningGateway {
            local_addr,
            public_url: public_url.clone(),
            shutdown: shutdown_tx,
            server,
            dispatcher,
        });
        Ok(public_url)
    }

    /// Shut down the server and tunnel. Never fails; slow shutdowns are logged.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let aborted = self.shared.sessions.abort_all();
        if aborted > 0 {
            warn!("Aborted {} media session(s) still running at shutdown", aborted);
        }

        let _ = running.shutdown.send(());
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let mut server = running.server;
        if tokio::time::timeout(grace, &mut server).await.is_err() {
            warn!(
                "Gateway did not shut down within {}s; aborting open connections",
                grace.as_secs()
            );
            server.abort();
        }
        running.dispatcher.abort();

        if let Err(e) = self.tunnel.stop().await {
            warn!("Failed to stop {} tunnel: {:#}", self.tunnel.name(), e);
        }
        info!("Gateway on {} stopped", running.local_addr);
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}
