//! Telephony provider and agent-under-test API seams

mod agent_api;
mod twilio;

pub use agent_api::HttpAgentApi;
pub use twilio::{TwilioCredentials, TwilioProvider};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::CallId;

/// Outbound call placed by the provider on the tester's behalf
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaceCallRequest {
    /// Number to dial (the agent under test)
    pub to: String,
    /// Webhook answering the call with connect instructions
    pub voice_url: String,
    /// Webhook receiving call status callbacks
    pub status_callback_url: String,
    /// Provider-enforced maximum call length
    pub time_limit_secs: u64,
    /// Record the call and report the recording here; `None` disables recording
    pub recording_callback_url: Option<String>,
}

/// Phone calls through an external provider
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    /// Start an outbound call; the call id is known as soon as this returns
    async fn place_call(&self, request: &PlaceCallRequest) -> Result<CallId>;

    /// Point the tester's number at the gateway for inbound calls
    async fn configure_number(&self, voice_url: &str, status_callback_url: &str) -> Result<()>;

    /// Record a call already in progress, reporting the recording to `callback_url`
    async fn start_recording(&self, call_id: &CallId, callback_url: &str) -> Result<()>;

    /// End a call that may still be live
    async fn hang_up(&self, call_id: &CallId) -> Result<()>;
}

/// API of the voice agent under test
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// Ask the agent to call the tester's number
    async fn originate_call(&self, parameters: &serde_json::Value) -> Result<()>;
}
