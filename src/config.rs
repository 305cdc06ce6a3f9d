//! Service configuration, read from `APP_*` environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `APP_ALLOWED_CUSTOMER_TIERS` | required, comma separated |
//! | `APP_S3_BUCKET_NAME`, `APP_S3_REGION` | required |
//! | `APP_S3_ACCESS_KEY`, `APP_S3_SECRET_KEY` | required |
//! | `APP_S3_ENDPOINT` | unset (AWS) |
//! | `APP_BATCH_MAX_BATCH_SIZE_BYTES` | 5 MiB |
//! | `APP_BATCH_MAX_BATCH_DELAY_SECONDS` | 5 |
//! | `APP_SERVER_HOST`, `APP_SERVER_PORT` | `0.0.0.0`, 8080 |

use std::str::FromStr;
use std::time::Duration;

use crate::api::ServerConfig;
use crate::contracts::ConfigError;

pub const DEFAULT_MAX_BATCH_SIZE_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_MAX_BATCH_DELAY_SECS: u64 = 5;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub allowed_customer_tiers: Vec<String>,
    pub s3: S3Config,
    pub batch: BatchConfig,
    pub server: ServerConfig,
}

#[derive(Clone)]
pub struct S3Config {
    pub bucket_name: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Custom endpoint for MinIO/LocalStack; uses path-style addressing.
    pub endpoint: Option<String>,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket_name", &self.bucket_name)
            .field("region", &self.region)
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("connect_timeout", &self.connect_timeout)
            .field("socket_timeout", &self.socket_timeout)
            .finish()
    }
}

/// Flush triggers for the batch accumulator.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Size trigger: flush once a tier's estimated bytes reach this.
    pub max_batch_size_bytes: usize,
    /// Time trigger: scheduler period.
    pub max_batch_delay: Duration,
    /// Upper bound on the final drain at shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size_bytes: DEFAULT_MAX_BATCH_SIZE_BYTES,
            max_batch_delay: Duration::from_secs(DEFAULT_MAX_BATCH_DELAY_SECS),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let allowed_customer_tiers: Vec<String> = required("APP_ALLOWED_CUSTOMER_TIERS")?
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if allowed_customer_tiers.is_empty() {
            return Err(ConfigError::Missing("APP_ALLOWED_CUSTOMER_TIERS"));
        }

        let s3 = S3Config {
            bucket_name: required("APP_S3_BUCKET_NAME")?,
            region: required("APP_S3_REGION")?,
            access_key: required("APP_S3_ACCESS_KEY")?,
            secret_key: required("APP_S3_SECRET_KEY")?,
            endpoint: get("APP_S3_ENDPOINT"),
            connect_timeout: Duration::from_secs(5),
            socket_timeout: Duration::from_secs(5),
        };

        let max_batch_size_bytes = parse_or(
            "APP_BATCH_MAX_BATCH_SIZE_BYTES",
            get("APP_BATCH_MAX_BATCH_SIZE_BYTES"),
            DEFAULT_MAX_BATCH_SIZE_BYTES,
        )?;
        if max_batch_size_bytes == 0 {
            return Err(invalid("APP_BATCH_MAX_BATCH_SIZE_BYTES", "0", "must be positive"));
        }

        let delay_secs: u64 = parse_or(
            "APP_BATCH_MAX_BATCH_DELAY_SECONDS",
            get("APP_BATCH_MAX_BATCH_DELAY_SECONDS"),
            DEFAULT_MAX_BATCH_DELAY_SECS,
        )?;
        if delay_secs == 0 {
            return Err(invalid("APP_BATCH_MAX_BATCH_DELAY_SECONDS", "0", "must be positive"));
        }

        let defaults = ServerConfig::default();
        let server = ServerConfig {
            host: get("APP_SERVER_HOST").unwrap_or(defaults.host),
            port: parse_or("APP_SERVER_PORT", get("APP_SERVER_PORT"), defaults.port)?,
        };

        Ok(Self {
            allowed_customer_tiers,
            s3,
            batch: BatchConfig {
                max_batch_size_bytes,
                max_batch_delay: Duration::from_secs(delay_secs),
                shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            },
            server,
        })
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &value, &e.to_string())),
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
