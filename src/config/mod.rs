//! Configuration module
//!
//! Application settings, loaded from a config file and layered with
//! environment overrides, plus the test suite format.

mod env;
mod file;
mod suite;

pub use env::{print_env_help, EnvConfig};
pub use suite::{SuiteTestCase, TestSuite};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::evaluator::OPENAI_API_URL;
use crate::gateway::GatewayConfig;
use crate::models::CallDirection;

const MASK: &str = "********";

/// Application configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub tunnel: TunnelConfig,
    pub telephony: TelephonyConfig,
    pub agent: AgentConfig,
    pub engine: EngineConfig,
    pub evaluator: EvaluatorConfig,
    pub run: RunSettings,
}

/// How the gateway is exposed to the provider
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelKind {
    /// No tunnel; the provider must reach the listener directly
    #[default]
    Local,
    /// A tunnel or proxy managed outside this tool
    Static,
    /// An ngrok child process
    Ngrok,
}

impl TunnelKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "local" | "none" => Some(TunnelKind::Local),
            "static" => Some(TunnelKind::Static),
            "ngrok" => Some(TunnelKind::Ngrok),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub kind: TunnelKind,
    /// Public base URL for the static tunnel
    pub url: Option<String>,
    /// Host used in the local tunnel's URL
    pub local_host: String,
    pub ngrok_auth_token: Option<String>,
    pub ngrok_binary: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            kind: TunnelKind::Local,
            url: None,
            local_host: "127.0.0.1".to_string(),
            ngrok_auth_token: None,
            ngrok_binary: "ngrok".to_string(),
        }
    }
}

/// Twilio account used to place and receive calls
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TelephonyConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// The tester's own number
    pub phone_number: String,
    /// Needed to repoint the number's webhooks for agent-initiated calls
    pub phone_number_sid: Option<String>,
    /// Override for the provider REST endpoint
    pub api_url: Option<String>,
    /// Ask the provider to record every call
    pub record_calls: bool,
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            phone_number: String::new(),
            phone_number_sid: None,
            api_url: None,
            record_calls: true,
        }
    }
}

/// The voice agent under test
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub direction: CallDirection,
    /// Number dialled for tester-initiated calls
    pub phone_number: String,
    /// Endpoint asked to originate agent-initiated calls
    pub api_url: Option<String>,
    pub auth_token: Option<String>,
    /// Request body sent to `api_url`
    pub originate_params: serde_json::Value,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            direction: CallDirection::TesterInitiated,
            phone_number: String::new(),
            api_url: None,
            auth_token: None,
            originate_params: serde_json::Value::Object(Default::default()),
        }
    }
}

/// Conversational engine service
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub url: String,
    pub connect_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8081/session".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

/// Chat-completions endpoint used to score transcripts
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            api_url: OPENAI_API_URL.to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Per-run timing and output
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Maximum length of each call
    pub time_limit_secs: u64,
    pub call_id_timeout_secs: u64,
    pub completion_grace_secs: u64,
    /// How long a call's media session may keep running after the call ends
    pub session_drain_secs: u64,
    /// How long to wait for the provider's recording callback
    pub recording_wait_secs: u64,
    /// Defaults to the data directory's report store
    pub report_dir: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            time_limit_secs: 60,
            call_id_timeout_secs: 60,
            completion_grace_secs: 0,
            session_drain_secs: 10,
            recording_wait_secs: 10,
            report_dir: None,
        }
    }
}

impl AppConfig {
    /// Layer environment overrides on top of file settings
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(port) = env.port {
            self.gateway.port = port;
        }
        if let Some(url) = &env.public_url {
            self.tunnel.kind = TunnelKind::Static;
            self.tunnel.url = Some(url.clone());
        }
        if let Some(token) = &env.ngrok_auth_token {
            self.tunnel.ngrok_auth_token = Some(token.clone());
        }
        if let Some(sid) = &env.twilio_account_sid {
            self.telephony.account_sid = sid.clone();
        }
        if let Some(token) = &env.twilio_auth_token {
            self.telephony.auth_token = token.clone();
        }
        if let Some(number) = &env.twilio_phone_number {
            self.telephony.phone_number = number.clone();
        }
        if let Some(sid) = &env.twilio_phone_number_sid {
            self.telephony.phone_number_sid = Some(sid.clone());
        }
        if let Some(direction) = env.direction.as_deref().and_then(CallDirection::from_str) {
            self.agent.direction = direction;
        }
        if let Some(number) = &env.agent_phone_number {
            self.agent.phone_number = number.clone();
        }
        if let Some(url) = &env.agent_api_url {
            self.agent.api_url = Some(url.clone());
        }
        if let Some(token) = &env.agent_api_token {
            self.agent.auth_token = Some(token.clone());
        }
        if let Some(url) = &env.engine_url {
            self.engine.url = url.clone();
        }
        if let Some(key) = &env.openai_api_key {
            self.evaluator.api_key = key.clone();
        }
        if let Some(secs) = env.time_limit {
            self.run.time_limit_secs = secs;
        }
        if let Some(dir) = &env.report_dir {
            self.run.report_dir = Some(PathBuf::from(dir));
        }
    }

    /// Check that everything a run needs is present
    pub fn check_ready(&self) -> Result<()> {
        let telephony = &self.telephony;
        if telephony.account_sid.is_empty() || telephony.auth_token.is_empty() {
            bail!("Twilio credentials are missing (TWILIO_ACCOUNT_SID / TWILIO_AUTH_TOKEN)");
        }
        if telephony.phone_number.is_empty() {
            bail!("Twilio phone number is missing (TWILIO_PHONE_NUMBER)");
        }
        if self.evaluator.api_key.is_empty() {
            bail!("Evaluator API key is missing (OPENAI_API_KEY)");
        }

        match self.agent.direction {
            CallDirection::TesterInitiated => {
                if self.agent.phone_number.is_empty() {
                    bail!("agent.phone_number is required for tester-initiated calls");
                }
            }
            CallDirection::AgentInitiated => {
                if self.agent.api_url.is_none() {
                    bail!("agent.api_url is required for agent-initiated calls (VOICE_AGENT_API)");
                }
                if telephony.phone_number_sid.is_none() {
                    bail!("Twilio phone number SID is required for agent-initiated calls");
                }
            }
        }

        if self.tunnel.kind == TunnelKind::Ngrok && self.tunnel.ngrok_auth_token.is_none() {
            bail!("ngrok tunnel needs an auth token (NGROK_AUTH_TOKEN)");
        }
        Ok(())
    }

    /// Copy with every secret masked, for display
    pub fn redacted(&self) -> Self {
        let mask = |s: &str| if s.is_empty() { String::new() } else { MASK.to_string() };
        let mut config = self.clone();
        config.telephony.auth_token = mask(&config.telephony.auth_token);
        config.evaluator.api_key = mask(&config.evaluator.api_key);
        config.agent.auth_token = config.agent.auth_token.as_deref().map(mask);
        config.tunnel.ngrok_auth_token = config.tunnel.ngrok_auth_token.as_deref().map(mask);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> AppConfig {
        let mut config = AppConfig::default();
        config.telephony.account_sid = "AC123".to_string();
        config.telephony.auth_token = "secret".to_string();
        config.telephony.phone_number = "+15550001".to_string();
        config.agent.phone_number = "+15550100".to_string();
        config.evaluator.api_key = "sk-test".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.run.time_limit_secs, 60);
        assert_eq!(config.run.completion_grace_secs, 0);
        assert_eq!(config.run.session_drain_secs, 10);
        assert!(config.telephony.record_calls);
        assert_eq!(config.tunnel.kind, TunnelKind::Local);
        assert_eq!(config.evaluator.model, "gpt-4o-mini");
    }

    #[test]
    fn test_apply_env() {
        let mut config = AppConfig::default();
        let env = EnvConfig {
            public_url: Some("https://gateway.example.com".to_string()),
            twilio_account_sid: Some("AC999".to_string()),
            direction: Some("agent-initiated".to_string()),
            time_limit: Some(30),
            ..Default::default()
        };
        config.apply_env(&env);

        assert_eq!(config.tunnel.kind, TunnelKind::Static);
        assert_eq!(config.tunnel.url.as_deref(), Some("https://gateway.example.com"));
        assert_eq!(config.telephony.account_sid, "AC999");
        assert_eq!(config.agent.direction, CallDirection::AgentInitiated);
        assert_eq!(config.run.time_limit_secs, 30);
    }

    #[test]
    fn test_check_ready() {
        assert!(ready().check_ready().is_ok());
        assert!(AppConfig::default().check_ready().is_err());

        let mut agent_initiated = ready();
        agent_initiated.agent.direction = CallDirection::AgentInitiated;
        assert!(agent_initiated.check_ready().is_err());
        agent_initiated.agent.api_url = Some("https://agent.example.com/calls".to_string());
        agent_initiated.telephony.phone_number_sid = Some("PN1".to_string());
        assert!(agent_initiated.check_ready().is_ok());
    }

    #[test]
    fn test_redacted() {
        let config = ready().redacted();
        assert_eq!(config.telephony.auth_token, MASK);
        assert_eq!(config.evaluator.api_key, MASK);
        assert_eq!(config.telephony.account_sid, "AC123");
        assert!(config.agent.auth_token.is_none());
    }

    #[test]
    fn test_tunnel_kind_from_str() {
        assert_eq!(TunnelKind::from_str("NGROK"), Some(TunnelKind::Ngrok));
        assert_eq!(TunnelKind::from_str("none"), Some(TunnelKind::Local));
        assert!(TunnelKind::from_str("ssh").is_none());
    }
}
