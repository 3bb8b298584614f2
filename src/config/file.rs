//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{AppConfig, TunnelKind};
use crate::models::CallDirection;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./call-probe.yaml",
    "./call-probe.yml",
    "./.call-probe.yaml",
    "~/.config/call-probe/config.yaml",
    "~/.call-probe.yaml",
];

impl AppConfig {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load from the first standard location, or defaults
    pub fn load_default() -> Result<Self> {
        match Self::find() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Structural checks; credentials are checked later by `check_ready`
    pub fn validate(&self) -> Result<()> {
        if self.run.time_limit_secs == 0 {
            bail!("run.time_limit_secs must be greater than 0");
        }
        if self.run.call_id_timeout_secs == 0 {
            bail!("run.call_id_timeout_secs must be greater than 0");
        }
        if self.tunnel.kind == TunnelKind::Static && self.tunnel.url.is_none() {
            bail!("tunnel.url is required for a static tunnel");
        }
        if !self.agent.originate_params.is_object() {
            bail!("agent.originate_params must be a JSON object");
        }
        if !self.engine.url.starts_with("ws://") && !self.engine.url.starts_with("wss://") {
            bail!("engine.url must be a ws:// or wss:// URL: {}", self.engine.url);
        }
        Ok(())
    }

    /// Example configuration written by `config init`
    pub fn example() -> Self {
        let mut config = Self::default();
        config.tunnel.kind = TunnelKind::Ngrok;
        config.telephony.account_sid = "ACxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx".to_string();
        config.telephony.phone_number = "+15550001111".to_string();
        config.agent.direction = CallDirection::TesterInitiated;
        config.agent.phone_number = "+15550002222".to_string();
        config.agent.originate_params = serde_json::json!({
            "to_number": "+15550001111",
        });
        config.run.time_limit_secs = 120;
        config
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_example_is_valid() {
        AppConfig::example().validate().unwrap();
    }

    #[test]
    fn test_config_save_load_yaml_and_json() {
        let dir = tempdir().unwrap();
        for name in ["config.yaml", "nested/config.json"] {
            let path = dir.path().join(name);
            AppConfig::example().save(&path).unwrap();

            let loaded = AppConfig::load(&path).unwrap();
            assert_eq!(loaded.tunnel.kind, TunnelKind::Ngrok);
            assert_eq!(loaded.agent.phone_number, "+15550002222");
            assert_eq!(loaded.run.time_limit_secs, 120);
        }
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("call-probe.yaml");
        std::fs::write(&path, "agent:\n  direction: agent_initiated\nrun:\n  time_limit_secs: 30\n")
            .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.agent.direction, CallDirection::AgentInitiated);
        assert_eq!(config.run.time_limit_secs, 30);
        assert_eq!(config.run.call_id_timeout_secs, 60);
        assert_eq!(config.gateway.port, 8765);
    }

    #[test]
    fn test_validate_config() {
        let mut config = AppConfig::default();
        config.tunnel.kind = TunnelKind::Static;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.run.time_limit_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.engine.url = "http://engine".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_path() {
        let path = expand_path("./call-probe.yaml");
        assert_eq!(path, PathBuf::from("./call-probe.yaml"));
    }
}
