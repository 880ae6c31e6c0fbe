//! Layered configuration for the metrics export pipeline
//!
//! Configuration can be loaded from a TOML file, environment variables, or
//! built with defaults, following `honeylink-config`'s documented
//! priority order (env > file > defaults) and `backend/src/config.rs`'s
//! use of the `config` crate to layer a `File` source under an
//! `Environment` source.
//!
//! # Configuration sources (priority order)
//!
//! 1. **Environment variables**: `METRICS_*` prefixed, `__`-separated for
//!    nested keys (e.g. `METRICS_SCRAPE__LISTEN_ADDRESS`)
//! 2. **Config file**: a TOML file path passed to [`Options::from_file`]
//! 3. **Defaults**: [`Options::default`]

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),

    #[error("failed to parse environment variables: {0}")]
    Env(#[from] envy::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferOptions {
    /// `bufferCapacity` in the spec's configuration surface: item-count
    /// cap, floor-enforced to at least 1000 by [`Options::validate`].
    pub max_items: usize,
    pub max_size_bytes: u64,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self { max_items: 1000, max_size_bytes: 10 * 1024 * 1024 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    pub max_items: usize,
    pub max_bytes: usize,
    pub flush_interval_secs: u64,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { max_items: 500, max_bytes: 1_000_000, flush_interval_secs: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CardinalityOptions {
    pub max_unique_values_per_key: usize,
    /// Kept when non-empty; every other dimension key is dropped.
    pub allow_list: Vec<String>,
    pub deny_patterns: Vec<String>,
    pub drop_empty_dimensions: bool,
    pub max_dimension_value_length: usize,
    /// On cap overflow, drop only the offending dimension rather than the
    /// whole metric.
    pub drop_only_overflowing_key: bool,
    /// Dimensions merged into every snapshot before the rest of the
    /// pipeline runs.
    pub merge_default_dimensions: std::collections::HashMap<String, String>,
}

impl Default for CardinalityOptions {
    fn default() -> Self {
        Self {
            max_unique_values_per_key: 10_000,
            allow_list: Vec::new(),
            deny_patterns: Vec::new(),
            drop_empty_dimensions: false,
            max_dimension_value_length: 250,
            drop_only_overflowing_key: true,
            merge_default_dimensions: std::collections::HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub per_attempt_timeout_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff_ms: 50,
            max_backoff_ms: 2000,
            per_attempt_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxOptions {
    pub enabled: bool,
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
    /// Timestamp precision written to InfluxDB: one of `s`, `ms`, `us`, `ns`.
    pub precision: String,
    pub gzip_enabled: bool,
    /// Payloads at or above this size are gzip-compressed.
    pub min_gzip_size_bytes: usize,
}

impl Default for InfluxOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            org: String::new(),
            bucket: String::new(),
            token: String::new(),
            precision: "ns".to_string(),
            gzip_enabled: true,
            min_gzip_size_bytes: 8 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CloudWatchOptions {
    pub enabled: bool,
    pub namespace: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct JsonLinesOptions {
    pub enabled: bool,
    pub url: String,
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PrometheusOptions {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BackendOptions {
    pub influx: InfluxOptions,
    pub cloudwatch: CloudWatchOptions,
    pub json_lines: JsonLinesOptions,
    pub prometheus: PrometheusOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeOptions {
    pub listen_address: String,
    pub rate_limit_per_second: u32,
    pub rate_limit_burst: u32,
    /// CIDR ranges permitted to scrape; empty means unrestricted.
    pub allowed_cidrs: Vec<String>,
    /// CIDR ranges explicitly denied, checked before `allowed_cidrs`; empty means none denied.
    pub denied_cidrs: Vec<String>,
    /// CIDR ranges of proxies trusted to set `X-Forwarded-For`.
    pub trusted_proxy_cidrs: Vec<String>,
    pub basic_auth_username: Option<String>,
    pub basic_auth_password: Option<String>,
    pub require_mtls_client_cert: bool,
    pub timeout_ms: u64,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:9464".to_string(),
            rate_limit_per_second: 10,
            rate_limit_burst: 20,
            allowed_cidrs: Vec::new(),
            denied_cidrs: Vec::new(),
            trusted_proxy_cidrs: Vec::new(),
            basic_auth_username: None,
            basic_auth_password: None,
            require_mtls_client_cert: false,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    pub level: String,
    pub format: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "compact".to_string() }
    }
}

/// The full configuration surface for the export pipeline, validated
/// once at startup via [`Options::validate`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Options {
    pub buffer: BufferOptions,
    pub batch: BatchOptions,
    pub cardinality: CardinalityOptions,
    pub retry: RetryOptions,
    pub backends: BackendOptions,
    pub scrape: ScrapeOptions,
    pub logging: LoggingOptions,
}

impl Options {
    /// Loads configuration from `path` (TOML), layered under environment
    /// variables prefixed `METRICS_` with `__` as the nesting separator,
    /// falling back to built-in defaults for anything neither source sets.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(config::Environment::with_prefix("METRICS").separator("__"));
        let built = builder.build()?;
        let options: Options = built.try_deserialize()?;
        options.validate()?;
        Ok(options)
    }

    /// Builds configuration from defaults overridden only by environment
    /// variables — useful for tests and container deployments with no
    /// mounted config file.
    pub fn from_env() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::Environment::with_prefix("METRICS").separator("__"));
        let built = builder.build()?;
        let options: Options = built.try_deserialize()?;
        options.validate()?;
        Ok(options)
    }

    /// Fail-fast validation of cross-field invariants that serde alone
    /// can't express.
    pub fn validate(&self) -> Result<()> {
        if self.buffer.max_items < 1000 {
            return Err(ConfigError::Validation(
                "buffer.max_items must be at least 1000".into(),
            ));
        }
        if self.batch.max_items == 0 && self.batch.max_bytes == 0 {
            return Err(ConfigError::Validation(
                "batch.max_items and batch.max_bytes cannot both be zero".into(),
            ));
        }
        if self.cardinality.max_unique_values_per_key == 0 {
            return Err(ConfigError::Validation(
                "cardinality.max_unique_values_per_key must be greater than zero".into(),
            ));
        }
        for pattern in &self.cardinality.deny_patterns {
            regex_syntax_check(pattern)?;
        }
        if self.retry.base_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Validation(
                "retry.base_backoff_ms must be <= retry.max_backoff_ms".into(),
            ));
        }
        if self.scrape.rate_limit_per_second == 0 {
            return Err(ConfigError::Validation(
                "scrape.rate_limit_per_second must be greater than zero".into(),
            ));
        }
        for cidr in self
            .scrape
            .allowed_cidrs
            .iter()
            .chain(&self.scrape.denied_cidrs)
            .chain(&self.scrape.trusted_proxy_cidrs)
        {
            if cidr.parse::<ipnet::IpNet>().is_err() {
                return Err(ConfigError::Validation(format!("invalid CIDR: {cidr}")));
            }
        }
        if self.backends.influx.enabled && self.backends.influx.url.is_empty() {
            return Err(ConfigError::Validation("backends.influx.url is required when enabled".into()));
        }
        if !matches!(self.backends.influx.precision.as_str(), "s" | "ms" | "us" | "ns") {
            return Err(ConfigError::Validation(
                "backends.influx.precision must be one of s, ms, us, ns".into(),
            ));
        }
        if self.backends.cloudwatch.enabled && self.backends.cloudwatch.namespace.is_empty() {
            return Err(ConfigError::Validation(
                "backends.cloudwatch.namespace is required when enabled".into(),
            ));
        }
        if self.backends.json_lines.enabled && self.backends.json_lines.url.is_empty() {
            return Err(ConfigError::Validation(
                "backends.json_lines.url is required when enabled".into(),
            ));
        }
        Ok(())
    }
}

fn regex_syntax_check(pattern: &str) -> Result<()> {
    regex::Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| ConfigError::Validation(format!("invalid deny pattern {pattern:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_pass_validation() {
        assert!(Options::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_batch_limits() {
        let mut opts = Options::default();
        opts.batch.max_items = 0;
        opts.batch.max_bytes = 0;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn rejects_invalid_cidr() {
        let mut opts = Options::default();
        opts.scrape.allowed_cidrs.push("not-a-cidr".to_string());
        assert!(opts.validate().is_err());
    }

    #[test]
    fn rejects_enabled_influx_without_url() {
        let mut opts = Options::default();
        opts.backends.influx.enabled = true;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn loads_toml_file_and_merges_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [scrape]
            listen_address = "127.0.0.1:9999"

            [backends.influx]
            enabled = true
            url = "http://localhost:8086"
            org = "acme"
            bucket = "metrics"
            token = "secret"
            "#
        )
        .unwrap();
        let options = Options::from_file(file.path()).unwrap();
        assert_eq!(options.scrape.listen_address, "127.0.0.1:9999");
        assert!(options.backends.influx.enabled);
        // unspecified sections keep their defaults
        assert_eq!(options.retry.max_retries, RetryOptions::default().max_retries);
    }
}
