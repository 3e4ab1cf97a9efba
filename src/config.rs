//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::LimiterConfig;

/// Prefix for environment variable overrides, e.g.
/// `TURNSTILE__RATE_LIMITING__MAX_REQUESTS=20`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Length of a counting window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests admitted per client within one window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// How often expired counters are swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_window_secs() -> u64 {
    LimiterConfig::default().window_ms / 1000
}

fn default_max_requests() -> u64 {
    LimiterConfig::default().max_requests
}

fn default_sweep_interval() -> u64 {
    LimiterConfig::default().sweep_interval.as_secs()
}

impl RateLimitingConfig {
    /// Convert to the limiter's construction parameters.
    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            window_ms: self.window_secs.saturating_mul(1000),
            max_requests: self.max_requests,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

impl TurnstileConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `TURNSTILE__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(path).format(::config::FileFormat::Yaml));
        }

        let config: TurnstileConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the limiter cannot run with.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        if rl.window_secs == 0 {
            return Err(TurnstileError::Config("window_secs must be positive".to_string()));
        }
        if rl.max_requests == 0 {
            return Err(TurnstileError::Config("max_requests must be positive".to_string()));
        }
        if rl.sweep_interval_secs == 0 {
            return Err(TurnstileError::Config(
                "sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();
        assert_eq!(config.server.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.rate_limiting.window_secs, 60);
        assert_eq!(config.rate_limiting.max_requests, 100);
        assert_eq!(config.rate_limiting.sweep_interval_secs, 300);
    }

    #[test]
    fn test_defaults_round_trip_to_limiter_defaults() {
        assert_eq!(RateLimitingConfig::default().limiter_config(), LimiterConfig::default());
    }

    #[test]
    fn test_limiter_config_converts_seconds() {
        let limiter = RateLimitingConfig::default().limiter_config();
        assert_eq!(limiter.window_ms, 60_000);
        assert_eq!(limiter.max_requests, 100);
        assert_eq!(limiter.sweep_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
rate_limiting:
  max_requests: 5
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.rate_limiting.max_requests, 5);
        assert_eq!(config.rate_limiting.window_secs, 60);
        assert_eq!(config.server.bind_addr.port(), 8080);
    }

    #[test]
    fn test_from_yaml_rejects_zero_window() {
        let yaml = r#"
rate_limiting:
  window_secs: 0
"#;
        let err = TurnstileConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TurnstileError::Config(_)));
    }

    #[test]
    fn test_from_yaml_rejects_zero_max() {
        let yaml = "rate_limiting:\n  max_requests: 0\n";
        assert!(TurnstileConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_from_yaml_invalid() {
        assert!(TurnstileConfig::from_yaml("server: [not, a, map]").is_err());
    }

    #[test]
    fn test_load_file_with_env_override() {
        let path = std::env::temp_dir().join(format!("turnstile-test-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "server:\n  bind_addr: \"0.0.0.0:9000\"\nrate_limiting:\n  window_secs: 10\n  max_requests: 7\n",
        )
        .unwrap();

        std::env::set_var("TURNSTILE__RATE_LIMITING__MAX_REQUESTS", "20");
        let config = TurnstileConfig::load(Some(&path));
        std::env::remove_var("TURNSTILE__RATE_LIMITING__MAX_REQUESTS");
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.server.bind_addr.port(), 9000);
        assert_eq!(config.rate_limiting.window_secs, 10);
        assert_eq!(config.rate_limiting.max_requests, 20);
    }
}
