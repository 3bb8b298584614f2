//! Environment variable configuration
//!
//! `CALL_PROBE_*` overrides plus the names provider SDKs conventionally read.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "CALL_PROBE";

/// Settings picked up from the environment
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// CALL_PROBE_CONFIG
    pub config_file: Option<String>,
    /// CALL_PROBE_SUITE
    pub suite: Option<String>,
    /// CALL_PROBE_PORT
    pub port: Option<u16>,
    /// CALL_PROBE_PUBLIC_URL; implies a static tunnel
    pub public_url: Option<String>,
    /// CALL_PROBE_DIRECTION
    pub direction: Option<String>,
    /// CALL_PROBE_AGENT_NUMBER
    pub agent_phone_number: Option<String>,
    /// CALL_PROBE_ENGINE_URL
    pub engine_url: Option<String>,
    /// CALL_PROBE_TIME_LIMIT
    pub time_limit: Option<u64>,
    /// CALL_PROBE_REPORT_DIR
    pub report_dir: Option<String>,
    /// CALL_PROBE_VERBOSE
    pub verbose: Option<bool>,
    /// CALL_PROBE_FORMAT
    pub format: Option<String>,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_phone_number: Option<String>,
    pub twilio_phone_number_sid: Option<String>,
    pub ngrok_auth_token: Option<String>,
    pub openai_api_key: Option<String>,
    /// VOICE_AGENT_API
    pub agent_api_url: Option<String>,
    /// VOICE_AGENT_API_AUTH_TOKEN
    pub agent_api_token: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            config_file: get_env("CONFIG"),
            suite: get_env("SUITE"),
            port: get_env_parse("PORT"),
            public_url: get_env("PUBLIC_URL"),
            direction: get_env("DIRECTION"),
            agent_phone_number: get_env("AGENT_NUMBER"),
            engine_url: get_env("ENGINE_URL"),
            time_limit: get_env_parse("TIME_LIMIT"),
            report_dir: get_env("REPORT_DIR"),
            verbose: get_env_bool("VERBOSE"),
            format: get_env("FORMAT"),
            twilio_account_sid: get_plain("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: get_plain("TWILIO_AUTH_TOKEN"),
            twilio_phone_number: get_plain("TWILIO_PHONE_NUMBER"),
            twilio_phone_number_sid: get_plain("TWILIO_PHONE_NUMBER_SID"),
            ngrok_auth_token: get_plain("NGROK_AUTH_TOKEN"),
            openai_api_key: get_plain("OPENAI_API_KEY"),
            agent_api_url: get_plain("VOICE_AGENT_API"),
            agent_api_token: get_plain("VOICE_AGENT_API_AUTH_TOKEN"),
        }
    }

    /// Print the non-secret part of the environment configuration
    pub fn print_summary(&self) {
        let set = |v: &Option<String>| if v.is_some() { "set" } else { "unset" };
        println!("Environment Configuration:");
        println!("  {}_CONFIG:        {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_SUITE:         {:?}", ENV_PREFIX, self.suite);
        println!("  {}_PORT:          {:?}", ENV_PREFIX, self.port);
        println!("  {}_PUBLIC_URL:    {:?}", ENV_PREFIX, self.public_url);
        println!("  {}_DIRECTION:     {:?}", ENV_PREFIX, self.direction);
        println!("  {}_AGENT_NUMBER:  {:?}", ENV_PREFIX, self.agent_phone_number);
        println!("  {}_ENGINE_URL:    {:?}", ENV_PREFIX, self.engine_url);
        println!("  {}_TIME_LIMIT:    {:?}", ENV_PREFIX, self.time_limit);
        println!("  {}_REPORT_DIR:    {:?}", ENV_PREFIX, self.report_dir);
        println!("  {}_FORMAT:        {:?}", ENV_PREFIX, self.format);
        println!("  TWILIO_ACCOUNT_SID:        {:?}", self.twilio_account_sid);
        println!("  TWILIO_AUTH_TOKEN:         {}", set(&self.twilio_auth_token));
        println!("  TWILIO_PHONE_NUMBER:       {:?}", self.twilio_phone_number);
        println!("  TWILIO_PHONE_NUMBER_SID:   {:?}", self.twilio_phone_number_sid);
        println!("  NGROK_AUTH_TOKEN:          {}", set(&self.ngrok_auth_token));
        println!("  OPENAI_API_KEY:            {}", set(&self.openai_api_key));
        println!("  VOICE_AGENT_API:           {:?}", self.agent_api_url);
        println!("  VOICE_AGENT_API_AUTH_TOKEN: {}", set(&self.agent_api_token));
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    get_plain(&format!("{ENV_PREFIX}_{name}"))
}

/// Unprefixed variable; empty values count as unset
fn get_plain(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables in tests
#[cfg(test)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

#[cfg(test)]
impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    /// Set a `CALL_PROBE_` variable
    pub fn prefixed(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    pub fn plain(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((name.to_string(), value.into()));
        self
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        for (key, value) in self.vars {
            env::set_var(key, value);
        }

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
#[cfg(test)]
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all recognised environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_CONFIG        Path to configuration file");
    println!("  {ENV_PREFIX}_SUITE         Path to test suite file");
    println!("  {ENV_PREFIX}_PORT          Gateway listen port");
    println!("  {ENV_PREFIX}_PUBLIC_URL    Public base URL of an existing tunnel");
    println!("  {ENV_PREFIX}_DIRECTION     tester-initiated or agent-initiated");
    println!("  {ENV_PREFIX}_AGENT_NUMBER  Phone number of the agent under test");
    println!("  {ENV_PREFIX}_ENGINE_URL    WebSocket URL of the conversational engine");
    println!("  {ENV_PREFIX}_TIME_LIMIT    Maximum call length in seconds");
    println!("  {ENV_PREFIX}_REPORT_DIR    Directory for saved reports");
    println!("  {ENV_PREFIX}_VERBOSE       Enable debug logging (true/false)");
    println!("  {ENV_PREFIX}_FORMAT        Output format (table, json, csv, summary)");
    println!();
    println!("  TWILIO_ACCOUNT_SID         Twilio account SID");
    println!("  TWILIO_AUTH_TOKEN          Twilio auth token");
    println!("  TWILIO_PHONE_NUMBER        Tester phone number");
    println!("  TWILIO_PHONE_NUMBER_SID    SID of the tester phone number");
    println!("  NGROK_AUTH_TOKEN           ngrok auth token");
    println!("  OPENAI_API_KEY             Evaluator API key");
    println!("  VOICE_AGENT_API            Agent endpoint that originates calls");
    println!("  VOICE_AGENT_API_AUTH_TOKEN Bearer token for VOICE_AGENT_API");
    println!("  RUST_LOG                   Log filter, overrides --verbose");
    println!();
    println!("Example:");
    println!("  export TWILIO_ACCOUNT_SID=AC...");
    println!("  export {ENV_PREFIX}_AGENT_NUMBER=+15550100");
    println!("  call-probe run --suite suite.yaml");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.public_url.is_none());
        assert!(config.openai_api_key.is_none());
    }

    #[test]
    fn test_env_builder() {
        let _guard = EnvBuilder::new()
            .prefixed("PUBLIC_URL", "https://gateway.example.com")
            .prefixed("TIME_LIMIT", "45")
            .prefixed("VERBOSE", "yes")
            .plain("VOICE_AGENT_API", "https://agent.example.com/calls")
            .apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.public_url.as_deref(), Some("https://gateway.example.com"));
        assert_eq!(config.time_limit, Some(45));
        assert_eq!(config.verbose, Some(true));
        assert_eq!(
            config.agent_api_url.as_deref(),
            Some("https://agent.example.com/calls")
        );
    }

    #[test]
    fn test_unparsable_and_empty_values_ignored() {
        let _guard = EnvBuilder::new()
            .prefixed("PORT", "not-a-port")
            .plain("TWILIO_PHONE_NUMBER_SID", "")
            .apply_scoped();

        let config = EnvConfig::load();
        assert!(config.port.is_none());
        assert!(config.twilio_phone_number_sid.is_none());
    }
}
