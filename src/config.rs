//! Configuration loader and validator for the sync queue.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::model::EntityType;
use crate::policy::BackoffPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub retries: Retries,
    pub backend: Backend,
}

/// Queue processing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    /// Interval between passes while online.
    pub poll_interval_ms: u64,
    /// Quiet time after reconnecting before the first pass.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// 0 disables the cap.
    #[serde(default)]
    pub max_backoff_seconds: u64,
}

/// Retry ceilings applied to newly created items.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Retries {
    pub default_max_retries: u32,
    pub location_max_retries: u32,
}

/// Backend the HTTP transport talks to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backend {
    pub base_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    pub timeout_ms: u64,
}

fn default_settle_delay_ms() -> u64 {
    1_000
}

fn default_batch_size() -> usize {
    10
}

impl Default for Retries {
    fn default() -> Self {
        Self {
            default_max_retries: EntityType::Delivery.default_max_retries(),
            location_max_retries: EntityType::Location.default_max_retries(),
        }
    }
}

impl Retries {
    pub fn max_retries_for(&self, entity_type: EntityType) -> u32 {
        match entity_type {
            EntityType::Location => self.location_max_retries,
            _ => self.default_max_retries,
        }
    }
}

impl App {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::from_max_seconds(self.max_backoff_seconds)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    parse(&content)
}

/// Parse and validate a YAML document.
pub fn parse(content: &str) -> Result<Config, ConfigError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.batch_size == 0 {
        return Err(ConfigError::Invalid("app.batch_size must be > 0"));
    }

    if cfg.backend.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.base_url must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.backend.base_url).is_err() {
        return Err(ConfigError::Invalid("backend.base_url must be a valid URL"));
    }
    if cfg.backend.timeout_ms == 0 {
        return Err(ConfigError::Invalid("backend.timeout_ms must be > 0"));
    }
    if let Some(token) = &cfg.backend.auth_token {
        if token.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.auth_token must be non-empty when set"));
        }
    }

    Ok(())
}

/// Example configuration document.
pub fn example() -> &'static str {
    r#"app:
  poll_interval_ms: 30000
  settle_delay_ms: 1000
  batch_size: 10
  max_backoff_seconds: 0

retries:
  default_max_retries: 3
  location_max_retries: 5

backend:
  base_url: "https://api.example.com/v1/"
  auth_token: "YOUR_DRIVER_API_TOKEN"
  timeout_ms: 15000
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg = parse(example()).unwrap();
        assert_eq!(cfg.app.batch_size, 10);
        assert_eq!(cfg.app.settle_delay(), Duration::from_secs(1));
        assert_eq!(cfg.app.backoff(), BackoffPolicy::default());
        assert_eq!(cfg.retries.max_retries_for(EntityType::Location), 5);
        assert_eq!(cfg.retries.max_retries_for(EntityType::Payment), 3);
    }

    #[test]
    fn optional_sections_fall_back_to_defaults() {
        let cfg = parse(
            r#"app:
  poll_interval_ms: 500
backend:
  base_url: "http://localhost:8080/"
  timeout_ms: 1000
"#,
        )
        .unwrap();
        assert_eq!(cfg.app.settle_delay_ms, 1_000);
        assert_eq!(cfg.app.batch_size, 10);
        assert_eq!(cfg.app.max_backoff_seconds, 0);
        assert_eq!(cfg.retries, Retries::default());
        assert_eq!(cfg.backend.auth_token, None);
    }

    #[test]
    fn invalid_app_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.poll_interval_ms = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("poll_interval_ms")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.batch_size = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_backend_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.backend.base_url = "not a url".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("base_url")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.backend.timeout_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.backend.auth_token = Some(" ".into());
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.backend.timeout_ms, 15_000);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let td = tempdir().unwrap();
        let err = load(Some(&td.path().join("absent.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
