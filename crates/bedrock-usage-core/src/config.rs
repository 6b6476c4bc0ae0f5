//! Configuration management for bedrock-usage
//!
//! Layers, lowest priority first: built-in defaults, an optional TOML file,
//! then `BEDROCK_USAGE__SECTION__KEY` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "BEDROCK_USAGE";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// AWS client configuration
    pub aws: AwsConfig,

    /// Log group selection
    pub logs: LogsConfig,

    /// Retry policy for transient store faults
    pub retry: RetryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// When `path` is `None` the platform config directory is searched for
    /// `config.toml`; a missing file there is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(default_path) = default_config_path() {
                    builder = builder.add_source(config::File::from(default_path).required(false));
                }
            }
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("logs.log_stream_names")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

/// Location of the per-user config file, if the platform has one
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "bedrock-usage")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// AWS client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Region override; the SDK default chain is used when unset
    pub region: Option<String>,
    /// Named profile from the shared AWS config files
    pub profile: Option<String>,
    /// Custom endpoint (e.g. LocalStack)
    pub endpoint_url: Option<String>,
    /// Timeout applied to each store operation
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: None,
            profile: None,
            endpoint_url: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Log group selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Log group Bedrock writes invocation logs to
    pub log_group_name: String,
    /// Streams to read; empty means every stream in the group
    pub log_stream_names: Vec<String>,
    /// Maximum events per page requested from the store
    pub page_size: Option<i32>,
    /// Window length used when a caller gives no explicit window
    pub default_days: u32,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            log_group_name: "/aws/bedrock".to_string(),
            log_stream_names: vec!["aws/bedrock/modelinvocations".to_string()],
            page_size: None,
            default_days: 7,
        }
    }
}

/// Retry policy for transient store faults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per page, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Upper bound on any single delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Growth factor between delays
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
    /// Directory for a daily rolling log file; stderr only when unset
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_match_bedrock_layout() {
        let config = Config::default();
        assert_eq!(config.logs.log_group_name, "/aws/bedrock");
        assert_eq!(
            config.logs.log_stream_names,
            vec!["aws/bedrock/modelinvocations".to_string()]
        );
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(200));
        assert_eq!(config.aws.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[aws]
region = "eu-west-1"
request_timeout = "10s"

[logs]
log_group_name = "/custom/bedrock"
default_days = 3

[retry]
max_attempts = 5
initial_backoff = "50ms"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.aws.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.aws.request_timeout, Duration::from_secs(10));
        assert_eq!(config.logs.log_group_name, "/custom/bedrock");
        assert_eq!(config.logs.default_days, 3);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(50));
        // untouched sections keep their defaults
        assert_eq!(config.retry.max_backoff, Duration::from_secs(5));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }
}
