//! Configuration management
//!
//! Handles loading, validation, and merging of configuration from:
//! - TOML files
//! - CLI arguments

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

pub mod types;

pub use types::{
    AccessConfig, CapabilitiesConfig, ClassConfig, EnvVar, EnvironmentConfig, GuardConfig,
    LaunchMode, LoginClassConfig, NetworkConfig, RuleConfig, SessionConfig, StartupsPolicy,
};

use crate::daemon::StartupsLimit;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lamco-login/frontend.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrontendConfig {
    /// Listener and admission configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Host-based access control
    #[serde(default)]
    pub access: AccessConfig,
    /// Session environment construction
    #[serde(default)]
    pub environment: EnvironmentConfig,
    /// Login-class policy sources
    #[serde(default)]
    pub login_class: LoginClassConfig,
    /// Capability overrides
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
    /// Startup guard
    #[serde(default)]
    pub guard: GuardConfig,
    /// Session launching
    #[serde(default)]
    pub session: SessionConfig,
}

impl FrontendConfig {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {}", path))
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.network.listen_addresses.is_empty() {
            anyhow::bail!("No listen address configured");
        }

        for addr in &self.network.listen_addresses {
            addr.parse::<SocketAddr>()
                .with_context(|| format!("Invalid listen address: {}", addr))?;
        }

        self.startups_limit()?;

        if self.network.max_connections == 0 {
            anyhow::bail!("max_connections must be at least 1");
        }

        if self.network.tick_interval_ms == 0 {
            anyhow::bail!("tick_interval_ms must be greater than 0");
        }

        if self.environment.mail_dir.is_empty() {
            anyhow::bail!("environment.mail_dir must not be empty");
        }

        if self.environment.default_path.is_empty() {
            anyhow::bail!("environment.default_path must not be empty");
        }

        for pattern in &self.environment.accept_env {
            if pattern.is_empty() || pattern.contains('=') {
                anyhow::bail!("Invalid accept_env pattern: {:?}", pattern);
            }
        }

        for rule in &self.access.rules {
            crate::access::PatternList::parse(&rule.pattern)
                .with_context(|| format!("Invalid access rule pattern: {}", rule.pattern))?;
        }

        for (name, class) in &self.login_class.classes {
            if let Some(var) = class.setenv.iter().find(|v| !crate::session::is_valid_name(&v.name)) {
                anyhow::bail!("Invalid variable name {:?} in login class {}", var.name, name);
            }
        }

        if let Some(path) = &self.login_class.login_conf {
            if !path.exists() {
                tracing::warn!("Login class database not found: {:?}", path);
            }
        }

        Ok(())
    }

    /// Parsed `max_startups` limit
    pub fn startups_limit(&self) -> Result<StartupsLimit> {
        self.network
            .max_startups
            .parse::<StartupsLimit>()
            .with_context(|| format!("Invalid max_startups: {}", self.network.max_startups))
    }

    /// Parsed listen addresses
    pub fn listen_addresses(&self) -> Result<Vec<SocketAddr>> {
        self.network
            .listen_addresses
            .iter()
            .map(|a| {
                a.parse::<SocketAddr>()
                    .with_context(|| format!("Invalid listen address: {}", a))
            })
            .collect()
    }

    /// Authentication deadline, `None` when disabled
    pub fn login_grace_time(&self) -> Option<Duration> {
        match self.network.login_grace_time_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Override config with CLI arguments
    pub fn with_overrides(mut self, listen: Vec<String>) -> Self {
        if !listen.is_empty() {
            self.network.listen_addresses = listen;
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::RuleAction;

    #[test]
    fn test_default_config() {
        let config = FrontendConfig::default();
        assert_eq!(config.network.listen_addresses, vec!["0.0.0.0:22"]);
        assert_eq!(config.network.max_startups, "10:30:100");
        assert_eq!(config.environment.mail_dir, "/var/mail");
        assert_eq!(config.access.default_policy, RuleAction::Allow);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let config = FrontendConfig::parse(
            r#"
            [network]
            listen_addresses = ["127.0.0.1:2222", "[::1]:2222"]
            max_startups = "5:50:20"
            startups_policy = "delay"
            login_grace_time_secs = 0

            [access]
            default_policy = "allow"
            rules = [
                { pattern = "10.0.0.0/8", action = "allow" },
                { pattern = "ALL", action = "deny" },
            ]

            [environment]
            accept_env = ["LANG", "LC_*"]

            [login_class.classes.staff]
            setenv = [{ name = "BLOCKSIZE", value = "K" }]
            path = "/usr/local/bin ~/bin"

            [session]
            launch_mode = "exec"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addresses().unwrap().len(), 2);
        assert_eq!(config.network.startups_policy, StartupsPolicy::Delay);
        assert_eq!(config.login_grace_time(), None);
        assert_eq!(config.access.rules.len(), 2);
        assert_eq!(config.access.rules[1].action, RuleAction::Deny);
        assert_eq!(config.session.launch_mode, LaunchMode::Exec);
        assert_eq!(config.login_class.classes["staff"].setenv[0].name, "BLOCKSIZE");
    }

    #[test]
    fn test_config_validation_invalid_address() {
        let mut config = FrontendConfig::default();
        config.network.listen_addresses = vec!["invalid".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_startups() {
        let mut config = FrontendConfig::default();
        config.network.max_startups = "10:30".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_rule() {
        let mut config = FrontendConfig::default();
        config.access.rules.push(RuleConfig {
            pattern: "10.0.0.0/99".to_string(),
            action: RuleAction::Deny,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_overrides() {
        let config = FrontendConfig::default().with_overrides(vec!["127.0.0.1:2022".to_string()]);
        assert_eq!(config.network.listen_addresses, vec!["127.0.0.1:2022"]);

        let config = FrontendConfig::default().with_overrides(Vec::new());
        assert_eq!(config.network.listen_addresses, vec!["0.0.0.0:22"]);
    }

    #[test]
    fn test_config_serialization() {
        let config = FrontendConfig::default();
        let toml = toml::to_string(&config).unwrap();
        assert!(toml.contains("max_startups"));
        assert!(toml.contains("mail_dir"));
    }
}
