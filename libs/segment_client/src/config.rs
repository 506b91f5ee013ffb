//! Client configuration
//!
//! Loaded from an optional TOML file with `SEGMENT_CLIENT__*` environment
//! overrides, e.g. `SEGMENT_CLIENT__BATCH__MAX_BATCH_SIZE=100`. Every field has a
//! default so an empty file (or none at all) yields a usable configuration.

use crate::error::ConfigError;
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://cloud.mgaru.dev";

const ENV_PREFIX: &str = "SEGMENT_CLIENT";

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Scheme and host of the lookup service
    pub base_url: String,

    /// Bearer token sent with every request
    pub token: Option<String>,

    /// Account id attached to scan requests
    pub client_id: Option<u32>,

    /// Deadline for one outbound request, in milliseconds
    pub per_request_deadline_ms: u64,

    pub batch: BatchConfig,

    pub http: HttpConfig,
}

/// Coalescing engine settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Lookups per flush
    pub max_batch_size: usize,

    /// Longest a lookup waits in the queue before being flushed, in milliseconds
    pub max_batch_delay_ms: u64,

    /// Queue length that forces an immediate out-of-cycle flush
    pub queue_capacity: usize,

    /// Outbound requests allowed in flight at once
    pub max_concurrency: usize,
}

/// Connection pool settings for the HTTP transport
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_secs: u64,
    pub connect_timeout_ms: u64,
    pub tcp_nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            client_id: None,
            per_request_deadline_ms: 3_000,
            batch: BatchConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            max_batch_delay_ms: 500,
            queue_capacity: 150,
            max_concurrency: 64,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: 64,
            pool_idle_timeout_secs: 60,
            connect_timeout_ms: 1_000,
            tcp_nodelay: true,
        }
    }
}

impl BatchConfig {
    /// Build a config with the queue sized at three batches
    pub fn new(max_batch_size: usize, max_batch_delay: Duration) -> Self {
        Self {
            max_batch_size,
            max_batch_delay_ms: max_batch_delay.as_millis() as u64,
            queue_capacity: max_batch_size.saturating_mul(3),
            ..Default::default()
        }
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn max_batch_delay(&self) -> Duration {
        Duration::from_millis(self.max_batch_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::invalid("batch.max_batch_size must be greater than 0"));
        }
        if self.max_batch_delay_ms == 0 {
            return Err(ConfigError::invalid(
                "batch.max_batch_delay_ms must be greater than 0",
            ));
        }
        if self.queue_capacity < self.max_batch_size {
            return Err(ConfigError::invalid(format!(
                "batch.queue_capacity ({}) must be at least batch.max_batch_size ({})",
                self.queue_capacity, self.max_batch_size
            )));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::invalid("batch.max_concurrency must be greater than 0"));
        }
        Ok(())
    }
}

impl HttpConfig {
    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl ClientConfig {
    /// Load configuration from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading client configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: ClientConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_client_id(mut self, client_id: u32) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_per_request_deadline(mut self, deadline: Duration) -> Self {
        self.per_request_deadline_ms = deadline.as_millis() as u64;
        self
    }

    pub fn per_request_deadline(&self) -> Duration {
        Duration::from_millis(self.per_request_deadline_ms)
    }

    /// Parsed `base_url`
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::invalid(format!("base_url {:?}: {}", self.base_url, e)))?;
        if url.cannot_be_a_base() {
            return Err(ConfigError::invalid(format!(
                "base_url {:?} cannot be used as a base",
                self.base_url
            )));
        }
        Ok(url)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.per_request_deadline_ms == 0 {
            return Err(ConfigError::invalid(
                "per_request_deadline_ms must be greater than 0",
            ));
        }
        self.batch.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.queue_capacity, 3 * config.batch.max_batch_size);
        assert_eq!(config.per_request_deadline(), Duration::from_secs(3));
    }

    #[test]
    fn test_batch_new_sizes_queue() {
        let batch = BatchConfig::new(20, Duration::from_millis(10));
        assert_eq!(batch.queue_capacity, 60);
        assert_eq!(batch.max_batch_delay(), Duration::from_millis(10));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let zero_batch = BatchConfig {
            max_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(zero_batch.validate(), Err(ConfigError::Invalid(_))));

        let small_queue = BatchConfig::new(10, Duration::from_millis(5)).with_queue_capacity(5);
        assert!(small_queue.validate().is_err());

        let zero_delay = BatchConfig {
            max_batch_delay_ms: 0,
            ..Default::default()
        };
        assert!(zero_delay.validate().is_err());

        let bad_url = ClientConfig::default().with_base_url("not a url");
        assert!(bad_url.validate().is_err());

        let no_deadline = ClientConfig::default().with_per_request_deadline(Duration::ZERO);
        assert!(no_deadline.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
base_url = "http://localhost:9000"
token = "secret"
per_request_deadline_ms = 250

[batch]
max_batch_size = 10
max_batch_delay_ms = 20
queue_capacity = 40
"#
        )
        .unwrap();

        let config = ClientConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.per_request_deadline(), Duration::from_millis(250));
        assert_eq!(config.batch.max_batch_size, 10);
        assert_eq!(config.batch.queue_capacity, 40);
        // untouched sections keep their defaults
        assert_eq!(config.batch.max_concurrency, 64);
        assert_eq!(config.http, HttpConfig::default());
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[batch]\nmax_batch_size = 100\nqueue_capacity = 10").unwrap();

        let result = ClientConfig::load(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
