//! Pool Configuration
//!
//! Loads a pool definition from TOML with environment variable overrides.
//!
//! # Configuration Priority
//!
//! Configuration values are resolved in the following order (highest priority first):
//! 1. CLI arguments (applied by the binary)
//! 2. Environment variables (`MODELPOOL_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Configuration File Location
//!
//! The default configuration file is `$XDG_CONFIG_HOME/modelpool/pool.toml`
//! (or `~/.config/modelpool/pool.toml` if `XDG_CONFIG_HOME` is not set).
//!
//! # Example Configuration
//!
//! ```toml
//! [pool]
//! name = "chat-default"
//! strategy = "sequential"
//!
//! [health]
//! degraded_after_failures = 2
//! unavailable_after_failures = 5
//! healthy_after_successes = 2
//! recovery_timeout_secs = 30
//! latency_ema_alpha = 0.3
//!
//! [race]
//! stream_racing = false
//!
//! [http]
//! request_timeout_secs = 120
//!
//! [[endpoints]]
//! endpoint_id = "ep-1"
//! model_id = "gpt-4o-mini"
//! platform_id = "openai"
//! api_url = "https://api.openai.com/v1"
//! priority = 1
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::endpoint::Endpoint;
use crate::health::HealthConfig;
use crate::strategy::{helper, StrategyKind, StrategyOptions};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Where the effective configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[pool]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolToml {
    /// Pool name used in logs
    pub name: Option<String>,
    /// Strategy selecting endpoints
    pub strategy: Option<StrategyKind>,
    /// Seed for weighted-random selection
    pub rng_seed: Option<u64>,
}

/// `[health]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthToml {
    /// Consecutive failures before degraded
    pub degraded_after_failures: Option<u32>,
    /// Consecutive failures before unavailable
    pub unavailable_after_failures: Option<u32>,
    /// Consecutive successes before healthy
    pub healthy_after_successes: Option<u32>,
    /// Seconds before an unavailable endpoint is tried again (0 = never)
    pub recovery_timeout_secs: Option<u64>,
    /// Latency EMA weight
    pub latency_ema_alpha: Option<f64>,
}

/// `[race]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceToml {
    /// Race streams by first output
    pub stream_racing: Option<bool>,
}

/// `[http]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpToml {
    /// Per-request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Root of the TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfigToml {
    /// Pool settings
    pub pool: PoolToml,
    /// Health thresholds
    pub health: HealthToml,
    /// Race settings
    pub race: RaceToml,
    /// HTTP dispatcher settings
    pub http: HttpToml,
    /// Endpoint directory
    pub endpoints: Vec<Endpoint>,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Effective pool configuration
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Pool name used in logs
    pub name: String,

    /// Strategy selecting endpoints
    pub strategy: StrategyKind,

    /// Health thresholds
    pub health: HealthConfig,

    /// Race streams by first output
    pub stream_racing: bool,

    /// Seed for weighted-random selection
    pub rng_seed: Option<u64>,

    /// Per-request timeout of the HTTP dispatcher
    pub request_timeout: Duration,

    /// Endpoint directory
    pub endpoints: Vec<Endpoint>,

    source: ConfigSource,
    config_file_path: Option<PathBuf>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            strategy: StrategyKind::default(),
            health: HealthConfig::default(),
            stream_racing: false,
            rng_seed: None,
            request_timeout: Duration::from_secs(120),
            endpoints: Vec::new(),
            source: ConfigSource::Default,
            config_file_path: None,
        }
    }
}

impl PoolConfig {
    /// Where the effective configuration came from
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// File the configuration was loaded from
    #[must_use]
    pub fn config_file_path(&self) -> Option<&PathBuf> {
        self.config_file_path.as_ref()
    }

    /// Options for building the strategy registry
    #[must_use]
    pub fn strategy_options(&self) -> StrategyOptions {
        StrategyOptions {
            stream_racing: self.stream_racing,
            rng_seed: self.rng_seed,
        }
    }

    /// Check thresholds and the endpoint directory
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let health = &self.health;
        if health.degraded_after_failures == 0 {
            return Err(ConfigError::ValidationError(
                "degraded_after_failures must be at least 1".to_string(),
            ));
        }
        if health.unavailable_after_failures < health.degraded_after_failures {
            return Err(ConfigError::ValidationError(format!(
                "unavailable_after_failures ({}) must not be below degraded_after_failures ({})",
                health.unavailable_after_failures, health.degraded_after_failures
            )));
        }
        if health.healthy_after_successes == 0 {
            return Err(ConfigError::ValidationError(
                "healthy_after_successes must be at least 1".to_string(),
            ));
        }
        if !(health.latency_ema_alpha > 0.0 && health.latency_ema_alpha <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "latency_ema_alpha must be in (0, 1], got {}",
                health.latency_ema_alpha
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }

        helper::validate_directory(&self.endpoints)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if let Some(endpoint) = self.endpoints.iter().find(|e| e.api_url.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "endpoint {} has an empty api_url",
                endpoint.endpoint_id
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/modelpool/pool.toml` or
/// `~/.config/modelpool/pool.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("modelpool").join("pool.toml"))
}

/// Load configuration from the default path and the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed or is invalid.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<PoolConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read, parsed or validated.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<PoolConfig, ConfigError> {
    let mut config = PoolConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: PoolConfigToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                endpoints = config.endpoints.len(),
                "Loaded pool configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    config.validate()?;
    Ok(config)
}

/// Parse a TOML document into a validated configuration (no environment)
///
/// # Errors
///
/// Returns an error if the document cannot be parsed or is invalid.
pub fn parse_config(toml_content: &str) -> Result<PoolConfig, ConfigError> {
    let toml_config: PoolConfigToml = toml::from_str(toml_content)?;
    let mut config = PoolConfig::default();
    apply_toml_config(&mut config, toml_config);
    config.source = ConfigSource::File;
    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut PoolConfig, toml: PoolConfigToml) {
    if let Some(name) = toml.pool.name {
        config.name = name;
    }
    if let Some(strategy) = toml.pool.strategy {
        config.strategy = strategy;
    }
    if toml.pool.rng_seed.is_some() {
        config.rng_seed = toml.pool.rng_seed;
    }

    if let Some(failures) = toml.health.degraded_after_failures {
        config.health.degraded_after_failures = failures;
    }
    if let Some(failures) = toml.health.unavailable_after_failures {
        config.health.unavailable_after_failures = failures;
    }
    if let Some(successes) = toml.health.healthy_after_successes {
        config.health.healthy_after_successes = successes;
    }
    if let Some(secs) = toml.health.recovery_timeout_secs {
        config.health.recovery_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if let Some(alpha) = toml.health.latency_ema_alpha {
        config.health.latency_ema_alpha = alpha;
    }

    if let Some(enabled) = toml.race.stream_racing {
        config.stream_racing = enabled;
    }
    if let Some(secs) = toml.http.request_timeout_secs {
        config.request_timeout = Duration::from_secs(secs);
    }

    config.endpoints = toml.endpoints;
}

/// Apply `MODELPOOL_*` environment variables
fn apply_env_config(config: &mut PoolConfig) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Apply overrides from any key lookup (environment in production)
pub fn apply_overrides(config: &mut PoolConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(strategy) = lookup("MODELPOOL_STRATEGY") {
        match strategy.parse::<StrategyKind>() {
            Ok(kind) => {
                config.strategy = kind;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(value = %strategy, error = %e, "Ignoring MODELPOOL_STRATEGY"),
        }
    }

    if let Some(racing) = lookup("MODELPOOL_STREAM_RACING") {
        match parse_bool(&racing) {
            Some(enabled) => {
                config.stream_racing = enabled;
                config.source = ConfigSource::Env;
            }
            None => tracing::warn!(value = %racing, "Ignoring MODELPOOL_STREAM_RACING"),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL_TOML: &str = r#"
[pool]
name = "chat-default"
strategy = "race"

[health]
degraded_after_failures = 3
unavailable_after_failures = 6
healthy_after_successes = 1
recovery_timeout_secs = 0
latency_ema_alpha = 0.5

[race]
stream_racing = true

[http]
request_timeout_secs = 15

[[endpoints]]
endpoint_id = "ep-1"
model_id = "gpt-4o-mini"
platform_id = "openai"
platform_name = "OpenAI"
api_url = "https://api.openai.com/v1"
priority = 1

[[endpoints]]
endpoint_id = "ep-2"
model_id = "llama3"
platform_id = "local"
api_url = "http://localhost:11434/v1"
"#;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();

        assert_eq!(config.strategy, StrategyKind::Sequential);
        assert_eq!(config.health, HealthConfig::default());
        assert!(!config.stream_racing);
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("modelpool/pool.toml"));
        }
    }

    #[test]
    fn test_parse_full_toml() {
        let config = parse_config(FULL_TOML).unwrap();

        assert_eq!(config.name, "chat-default");
        assert_eq!(config.strategy, StrategyKind::Race);
        assert_eq!(config.health.degraded_after_failures, 3);
        assert_eq!(config.health.recovery_timeout, None);
        assert!(config.stream_racing);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[1].priority, 0);
        assert_eq!(config.endpoints[1].platform_name, "");
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = parse_config("[pool]\nstrategy = \"least_latency\"\n").unwrap();

        assert_eq!(config.strategy, StrategyKind::LeastLatency);
        assert_eq!(config.health.unavailable_after_failures, 5);
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn test_unknown_strategy_is_parse_error() {
        let result = parse_config("[pool]\nstrategy = \"fastest\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validation_errors() {
        let duplicate = r#"
[[endpoints]]
endpoint_id = "a"
model_id = "m"
platform_id = "p"
api_url = "http://x"

[[endpoints]]
endpoint_id = "a"
model_id = "m2"
platform_id = "p"
api_url = "http://y"
"#;
        assert!(matches!(parse_config(duplicate), Err(ConfigError::ValidationError(msg)) if msg.contains("duplicate")));

        let thresholds = "[health]\ndegraded_after_failures = 4\nunavailable_after_failures = 2\n";
        assert!(matches!(parse_config(thresholds), Err(ConfigError::ValidationError(_))));

        let alpha = "[health]\nlatency_ema_alpha = 1.5\n";
        assert!(matches!(parse_config(alpha), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(FULL_TOML.as_bytes()).unwrap();

        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.config_file_path(), Some(&file.path().to_path_buf()));
    }

    #[test]
    fn test_missing_file_graceful() {
        let path = PathBuf::from("/nonexistent/path/pool.toml");
        let config = load_config_from_path(Some(path)).unwrap();

        assert!(config.endpoints.is_empty());
        assert!(config.config_file_path().is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[pool\nname = 3").unwrap();

        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_overrides_apply_over_file() {
        let mut config = parse_config(FULL_TOML).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("MODELPOOL_STRATEGY", "round-robin"),
            ("MODELPOOL_STREAM_RACING", "off"),
        ]);

        apply_overrides(&mut config, |key| env.get(key).map(ToString::to_string));

        assert_eq!(config.strategy, StrategyKind::RoundRobin);
        assert!(!config.stream_racing);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_invalid_overrides_are_ignored() {
        let mut config = parse_config(FULL_TOML).unwrap();

        apply_overrides(&mut config, |key| match key {
            "MODELPOOL_STRATEGY" => Some("fastest".to_string()),
            "MODELPOOL_STREAM_RACING" => Some("maybe".to_string()),
            _ => None,
        });

        assert_eq!(config.strategy, StrategyKind::Race);
        assert!(config.stream_racing);
        assert_eq!(config.source(), ConfigSource::File);
    }

    #[test]
    fn test_config_error_display() {
        let read_err = ConfigError::ReadError {
            path: PathBuf::from("/test/path"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(read_err.to_string().contains("/test/path"));

        let validation_err = ConfigError::ValidationError("invalid value".to_string());
        assert!(validation_err.to_string().contains("invalid value"));
    }
}
