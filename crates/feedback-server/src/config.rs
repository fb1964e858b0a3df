use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use feedback_protocol::paths;
use libfeedback::{PublicAddress, RegistryConfig, ServiceConfig};

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Host used in generated session URLs and, unless `listen` is set, for binding.
    pub host: String,
    pub port: u16,
    pub use_https: bool,
    pub require_token: bool,
    pub cleanup_interval_secs: u64,
    pub default_timeout_secs: u64,
    /// Bind address when it differs from the public `host:port`.
    pub listen: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8766,
            use_https: false,
            require_token: true,
            cleanup_interval_secs: 60,
            default_timeout_secs: 600,
            listen: None,
        }
    }
}

impl BrokerConfig {
    /// File (explicit path, else the default location if present), then the
    /// process environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Self::config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn config_path() -> PathBuf {
        paths::config_path()
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MCP_HTTP_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("MCP_HTTP_PORT") {
            self.port = parse_number("MCP_HTTP_PORT", &port)?;
        }
        if let Some(value) = lookup("MCP_USE_HTTPS") {
            self.use_https = is_truthy(&value);
        }
        if let Some(value) = lookup("MCP_REQUIRE_TOKEN") {
            self.require_token = is_truthy(&value);
        }
        if let Some(secs) = lookup("MCP_CLEANUP_INTERVAL") {
            self.cleanup_interval_secs = parse_number("MCP_CLEANUP_INTERVAL", &secs)?;
        }
        if let Some(secs) = lookup("MCP_SESSION_TIMEOUT") {
            self.default_timeout_secs = parse_number("MCP_SESSION_TIMEOUT", &secs)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.trim().is_empty() {
            bail!("host must not be empty");
        }
        if self.cleanup_interval_secs == 0 {
            bail!("cleanup_interval_secs must be positive");
        }
        if self.default_timeout_secs == 0 {
            bail!("default_timeout_secs must be positive");
        }
        Ok(())
    }

    /// Address the listener binds to.
    pub fn bind_address(&self) -> String {
        match &self.listen {
            Some(listen) => listen.clone(),
            None if self.host.contains(':') && !self.host.starts_with('[') => {
                format!("[{}]:{}", self.host, self.port)
            }
            None => format!("{}:{}", self.host, self.port),
        }
    }

    pub fn to_service_config(&self) -> ServiceConfig {
        ServiceConfig {
            registry: RegistryConfig {
                cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
            },
            address: PublicAddress {
                host: self.host.clone(),
                port: self.port,
                use_https: self.use_https,
            },
            require_token: self.require_token,
            default_timeout: Duration::from_secs(self.default_timeout_secs),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_number<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid {key} value: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.bind_address(), "localhost:8766");
        assert!(config.require_token);
        config.validate().unwrap();

        let service = config.to_service_config();
        assert_eq!(service.default_timeout, Duration::from_secs(600));
        assert_eq!(service.registry.cleanup_interval, Duration::from_secs(60));
        assert_eq!(service.address.base_url(), "http://localhost:8766");
    }

    #[test]
    fn env_overrides() {
        let mut config = BrokerConfig::default();
        config
            .apply_env(env(&[
                ("MCP_HTTP_HOST", "feedback.example.com"),
                ("MCP_HTTP_PORT", "443"),
                ("MCP_USE_HTTPS", "Yes"),
                ("MCP_REQUIRE_TOKEN", "false"),
                ("MCP_CLEANUP_INTERVAL", "15"),
                ("MCP_SESSION_TIMEOUT", "90"),
            ]))
            .unwrap();

        assert_eq!(config.host, "feedback.example.com");
        assert!(config.use_https);
        assert!(!config.require_token);
        assert_eq!(config.cleanup_interval_secs, 15);
        assert_eq!(config.default_timeout_secs, 90);
        assert_eq!(
            config.to_service_config().address.base_url(),
            "https://feedback.example.com"
        );
    }

    #[test]
    fn unrecognized_flag_values_are_false() {
        let mut config = BrokerConfig::default();
        config
            .apply_env(env(&[("MCP_USE_HTTPS", "on"), ("MCP_REQUIRE_TOKEN", "0")]))
            .unwrap();
        assert!(!config.use_https);
        assert!(!config.require_token);
    }

    #[test]
    fn bad_numbers_are_errors() {
        let mut config = BrokerConfig::default();
        let err = config
            .apply_env(env(&[("MCP_HTTP_PORT", "eighty")]))
            .unwrap_err();
        assert!(err.to_string().contains("MCP_HTTP_PORT"));

        assert!(
            config
                .apply_env(env(&[("MCP_SESSION_TIMEOUT", "-1")]))
                .is_err()
        );
    }

    #[test]
    fn validate_rejects_zero_intervals() {
        let config = BrokerConfig {
            cleanup_interval_secs: 0,
            ..BrokerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = BrokerConfig {
            default_timeout_secs: 0,
            ..BrokerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_fills_missing_keys_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = 9000\nrequire_token = false\n").unwrap();

        let config = BrokerConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert!(!config.require_token);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.default_timeout_secs, 600);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BrokerConfig::from_file(&dir.path().join("nope.toml")).is_err());
    }

    #[test]
    fn ipv6_and_listen_override() {
        let config = BrokerConfig {
            host: "::1".to_string(),
            ..BrokerConfig::default()
        };
        assert_eq!(config.bind_address(), "[::1]:8766");

        let config = BrokerConfig {
            listen: Some("0.0.0.0:9000".to_string()),
            ..BrokerConfig::default()
        };
        assert_eq!(config.bind_address(), "0.0.0.0:9000");
    }
}
