//! Configuration management for Gatekeeper.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! environment variables prefixed with `GATEKEEPER_` using `__` between
//! nested keys (e.g. `GATEKEEPER_SERVER__LISTEN_ADDR=127.0.0.1:8443`).
//! Inline PEM material in `SERVER_CRT` / `SERVER_KEY` enables TLS.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{EvictionPolicy, Rule, RuleSet};

/// Environment variable holding an inline PEM certificate chain.
pub const SERVER_CRT_ENV: &str = "SERVER_CRT";
/// Environment variable holding an inline PEM private key.
pub const SERVER_KEY_ENV: &str = "SERVER_KEY";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP(S) listener binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// TLS material; plain HTTP when absent
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            tls: None,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 4000))
}

/// Certificate chain and private key, inline or on disk.
///
/// Inline PEM takes precedence over a path for the same item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub cert_pem: Option<String>,
    #[serde(default)]
    pub key_pem: Option<String>,
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Inline PEM material from `SERVER_CRT` / `SERVER_KEY`, if both are set.
    pub fn from_env() -> Option<Self> {
        let cert_pem = std::env::var(SERVER_CRT_ENV).ok().filter(|v| !v.is_empty())?;
        let key_pem = std::env::var(SERVER_KEY_ENV).ok().filter(|v| !v.is_empty())?;
        Some(Self {
            cert_pem: Some(cert_pem),
            key_pem: Some(key_pem),
            ..Self::default()
        })
    }

    /// Read the certificate chain PEM.
    pub fn read_cert_pem(&self) -> Result<String> {
        Self::read_pem("certificate", self.cert_pem.as_deref(), self.cert_path.as_deref())
    }

    /// Read the private key PEM.
    pub fn read_key_pem(&self) -> Result<String> {
        Self::read_pem("private key", self.key_pem.as_deref(), self.key_path.as_deref())
    }

    fn read_pem(what: &str, inline: Option<&str>, path: Option<&Path>) -> Result<String> {
        if let Some(pem) = inline {
            return Ok(pem.to_string());
        }
        match path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                GatekeeperError::Tls(format!(
                    "Failed to read {} from {}: {}",
                    what,
                    path.display(),
                    e
                ))
            }),
            None => Err(GatekeeperError::Tls(format!("No {} configured", what))),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Ordered rules; the first rule matching a resource key wins
    #[serde(default = "default_rules")]
    pub rules: Vec<Rule>,

    /// Sweep interval and staleness thresholds
    #[serde(default)]
    pub eviction: EvictionPolicy,
}

impl RateLimitingConfig {
    /// Build the rule table for a registry.
    pub fn rule_set(&self) -> RuleSet {
        RuleSet::new(self.rules.clone())
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            eviction: EvictionPolicy::default(),
        }
    }
}

fn default_rules() -> Vec<Rule> {
    vec![Rule::new("/", 60, 10)]
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatekeeperConfig {
    /// Load layered configuration: defaults, optional YAML file, environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            debug!(path = %path.display(), "Reading configuration file");
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Yaml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("GATEKEEPER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: GatekeeperConfig = builder.build()?.try_deserialize()?;

        if let Some(tls) = TlsConfig::from_env() {
            debug!("Using TLS material from environment");
            config.server.tls = Some(tls);
        }

        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| GatekeeperError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatekeeperConfig::default();

        assert_eq!(config.server.listen_addr, SocketAddr::from(([0, 0, 0, 0], 4000)));
        assert!(config.server.tls.is_none());
        assert_eq!(config.rate_limiting.rules, vec![Rule::new("/", 60, 10)]);
        assert_eq!(config.rate_limiting.eviction, EvictionPolicy::default());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
server:
  listen_addr: 127.0.0.1:8443
"#;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.listen_addr, SocketAddr::from(([127, 0, 0, 1], 8443)));
        // Untouched sections keep their defaults
        assert_eq!(config.rate_limiting.rules.len(), 1);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_yaml_full() {
        let yaml = r#"
server:
  listen_addr: 0.0.0.0:4443
  tls:
    cert_path: /etc/gatekeeper/cert.pem
    key_path: /etc/gatekeeper/key.pem
rate_limiting:
  rules:
    - key: /
      window_seconds: 60
      max_requests: 10
    - key: /login
      window_seconds: 300
      max_requests: 5
  eviction:
    sweep_interval_secs: 30
    locked_ttl_secs: 1800
    idle_ttl_secs: 120
logging:
  level: debug
  json: true
"#;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();

        let tls = config.server.tls.as_ref().unwrap();
        assert_eq!(tls.cert_path, Some(PathBuf::from("/etc/gatekeeper/cert.pem")));
        assert!(tls.cert_pem.is_none());

        let rules = config.rate_limiting.rule_set();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.resolve("/login").max_requests, 5);

        assert_eq!(config.rate_limiting.eviction.sweep_interval_secs, 30);
        assert_eq!(config.rate_limiting.eviction.locked_ttl_secs, 1800);
        assert_eq!(config.rate_limiting.eviction.idle_ttl_secs, 120);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_from_yaml_invalid() {
        let result = GatekeeperConfig::from_yaml("server:\n  listen_addr: not-an-address\n");
        assert!(matches!(result, Err(GatekeeperError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "gatekeeper-config-test-{}.yaml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "rate_limiting:\n  rules:\n    - key: /api\n      window_seconds: 10\n      max_requests: 2\n",
        )
        .unwrap();

        let config = GatekeeperConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.rate_limiting.rules, vec![Rule::new("/api", 10, 2)]);
        assert_eq!(config.rate_limiting.eviction, EvictionPolicy::default());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let path = Path::new("/nonexistent/gatekeeper.yaml");
        let result = GatekeeperConfig::load(Some(path));
        assert!(matches!(result, Err(GatekeeperError::Config(_))));
    }

    #[test]
    fn test_tls_inline_pem_preferred() {
        let tls = TlsConfig {
            cert_pem: Some("CERT".to_string()),
            key_pem: None,
            cert_path: Some(PathBuf::from("/nonexistent/cert.pem")),
            key_path: None,
        };

        assert_eq!(tls.read_cert_pem().unwrap(), "CERT");
        assert!(matches!(tls.read_key_pem(), Err(GatekeeperError::Tls(_))));
    }

    #[test]
    fn test_tls_missing_file() {
        let tls = TlsConfig {
            cert_path: Some(PathBuf::from("/nonexistent/cert.pem")),
            ..TlsConfig::default()
        };
        assert!(matches!(tls.read_cert_pem(), Err(GatekeeperError::Tls(_))));
    }
}
