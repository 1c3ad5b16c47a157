//! Configuration model and loader.
//!
//! Layered with Figment, later layers override earlier ones:
//! 1. Compiled defaults
//! 2. TOML file (`courier.toml` or an explicit path)
//! 3. `COURIER_*` environment variables
//!
//! An absent or empty `forward.api_url` is valid and disables delivery.

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

/// Wire body shape expected by the sink endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointMode {
    /// `{"table": ..., "rows": [...], "ignore": true, "pk": "id"}`
    #[default]
    Create,
    /// `{"rows": [...], "ignore": true}`
    Insert,
}

/// What happens to a record once the sink accepted it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessPolicy {
    #[default]
    Delete,
    /// Keep the row with a `sent_at` timestamp for audit history.
    MarkSent,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CourierConfig {
    #[serde(default)]
    pub forward: ForwardConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Forwarding settings for one outbox instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardConfig {
    /// Static label attached to every forwarded row.
    #[serde(default)]
    pub instance: Option<String>,

    #[serde(default)]
    pub api_url: Option<String>,

    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default)]
    pub mode: EndpointMode,

    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Delivery cycles admitted per `time_period`.
    #[serde(default = "default_max_rate", alias = "rate_limit")]
    pub max_rate: f64,

    /// Rate-limit window in seconds.
    #[serde(default = "default_time_period")]
    pub time_period: f64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub on_success: SuccessPolicy,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            instance: None,
            api_url: None,
            api_token: None,
            mode: EndpointMode::default(),
            batch_limit: default_batch_limit(),
            max_failures: default_max_failures(),
            max_rate: default_max_rate(),
            time_period: default_time_period(),
            timeout_secs: default_timeout_secs(),
            on_success: SuccessPolicy::default(),
        }
    }
}

impl ForwardConfig {
    /// The sink URL, if delivery is enabled.
    pub fn sink_url(&self) -> Option<&str> {
        self.api_url.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// The bearer token, if one is configured and non-empty.
    pub fn bearer_token(&self) -> Option<&str> {
        self.api_token.as_deref().filter(|s| !s.is_empty())
    }

    pub fn time_window(&self) -> Duration {
        Duration::from_secs_f64(self.time_period)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_limit == 0 {
            return Err(invalid("forward.batch_limit", "must be at least 1"));
        }
        if self.max_failures == 0 {
            return Err(invalid("forward.max_failures", "must be at least 1"));
        }
        if !(self.max_rate.is_finite() && self.max_rate > 0.0) {
            return Err(invalid("forward.max_rate", "must be a positive number"));
        }
        if !(self.time_period.is_finite() && self.time_period > 0.0) {
            return Err(invalid("forward.time_period", "must be a positive number of seconds"));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("forward.timeout_secs", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_batch_limit() -> usize {
    10
}

fn default_max_failures() -> u32 {
    3
}

fn default_max_rate() -> f64 {
    1.0
}

fn default_time_period() -> f64 {
    10.0
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_database_path() -> String {
    "courier.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load `./courier.toml` (if present) with env overrides.
pub fn load_config() -> Result<CourierConfig, ConfigError> {
    extract(
        Figment::new()
            .merge(Serialized::defaults(CourierConfig::default()))
            .merge(Toml::file("courier.toml"))
            .merge(env_provider()),
    )
}

/// Load a specific file with env overrides.
pub fn load_config_from_path(path: &Path) -> Result<CourierConfig, ConfigError> {
    extract(
        Figment::new()
            .merge(Serialized::defaults(CourierConfig::default()))
            .merge(Toml::file(path))
            .merge(env_provider()),
    )
}

/// Load from a TOML string only (no env). Used by tests.
pub fn load_config_from_str(toml_content: &str) -> Result<CourierConfig, ConfigError> {
    extract(
        Figment::new()
            .merge(Serialized::defaults(CourierConfig::default()))
            .merge(Toml::string(toml_content)),
    )
}

fn extract(figment: Figment) -> Result<CourierConfig, ConfigError> {
    let config: CourierConfig = figment.extract()?;
    config.forward.validate()?;
    Ok(config)
}

/// `COURIER_FORWARD_API_URL` -> `forward.api_url`.
///
/// Only the section prefix is mapped to a dot; key names keep their underscores.
/// `COURIER_CONFIG` names the config file itself and is not a setting.
fn env_provider() -> Env {
    Env::prefixed("COURIER_").ignore(&["config"]).map(|key| {
        key.as_str()
            .replacen("forward_", "forward.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("log_", "log.", 1)
            .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = load_config_from_str("").unwrap();
        let fwd = &config.forward;

        assert_eq!(fwd.batch_limit, 10);
        assert_eq!(fwd.max_failures, 3);
        assert_eq!(fwd.max_rate, 1.0);
        assert_eq!(fwd.time_period, 10.0);
        assert_eq!(fwd.mode, EndpointMode::Create);
        assert_eq!(fwd.on_success, SuccessPolicy::Delete);
        assert_eq!(fwd.sink_url(), None);
        assert_eq!(config.storage.database_path, "courier.db");
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn parses_full_forward_section() {
        let config = load_config_from_str(
            r#"
            [forward]
            instance = "prod-1"
            api_url = "https://example.com/data/-/create"
            api_token = "xxx"
            mode = "insert"
            batch_limit = 25
            max_failures = 5
            rate_limit = 5
            time_period = 0.2
            on_success = "mark_sent"
            "#,
        )
        .unwrap();
        let fwd = config.forward;

        assert_eq!(fwd.instance.as_deref(), Some("prod-1"));
        assert_eq!(fwd.sink_url(), Some("https://example.com/data/-/create"));
        assert_eq!(fwd.bearer_token(), Some("xxx"));
        assert_eq!(fwd.mode, EndpointMode::Insert);
        assert_eq!(fwd.batch_limit, 25);
        assert_eq!(fwd.max_failures, 5);
        assert_eq!(fwd.max_rate, 5.0);
        assert_eq!(fwd.time_window(), Duration::from_millis(200));
        assert_eq!(fwd.on_success, SuccessPolicy::MarkSent);
    }

    #[test]
    fn empty_url_and_token_mean_absent() {
        let config = load_config_from_str(
            r#"
            [forward]
            api_url = "  "
            api_token = ""
            "#,
        )
        .unwrap();

        assert_eq!(config.forward.sink_url(), None);
        assert_eq!(config.forward.bearer_token(), None);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = load_config_from_str("[forward]\nbatch_size = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn rejects_zero_batch_limit() {
        let err = load_config_from_str("[forward]\nbatch_limit = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "forward.batch_limit", .. }
        ));
    }

    #[test]
    fn rejects_non_positive_rate() {
        let err = load_config_from_str("[forward]\nmax_rate = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "forward.max_rate", .. }));
    }

    #[test]
    fn env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "courier.toml",
                r#"
                [forward]
                api_url = "https://file.example"
                batch_limit = 4
                "#,
            )?;
            jail.set_env("COURIER_FORWARD_API_URL", "https://env.example");
            jail.set_env("COURIER_STORAGE_DATABASE_PATH", "/tmp/outbox.db");

            let config = load_config().expect("config loads");
            assert_eq!(config.forward.sink_url(), Some("https://env.example"));
            assert_eq!(config.forward.batch_limit, 4);
            assert_eq!(config.storage.database_path, "/tmp/outbox.db");
            Ok(())
        });
    }

    #[test]
    fn config_path_variable_is_not_a_setting() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[forward]\nbatch_limit = 7\n")?;
            jail.set_env("COURIER_CONFIG", "custom.toml");

            let config = load_config().expect("COURIER_CONFIG is ignored");
            assert_eq!(config.forward.batch_limit, ForwardConfig::default().batch_limit);

            let config = load_config_from_path(Path::new("custom.toml")).expect("config loads");
            assert_eq!(config.forward.batch_limit, 7);
            Ok(())
        });
    }
}
