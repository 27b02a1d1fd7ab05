//! Configuration management for the server.

use chrono::TimeDelta;
use newshelf_engine::{RetryPolicy, DEFAULT_WINDOW_DAYS};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Credentials for the Shopify Admin API.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Custom app access token, sent as `X-Shopify-Access-Token`.
    AccessToken(String),
    /// Private app key and password, sent as HTTP basic auth.
    Basic { api_key: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::AccessToken(_) => f.write_str("AccessToken(<redacted>)"),
            Credentials::Basic { api_key, .. } => f
                .debug_struct("Basic")
                .field("api_key", api_key)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Everything needed to reach one store.
#[derive(Debug, Clone)]
pub struct ShopConfig {
    /// Store handle, as in `{shop_name}.myshopify.com`
    pub shop_name: String,
    /// Admin API version, e.g. `2023-10`
    pub api_version: String,
    pub credentials: Credentials,
    /// Per-request timeout
    pub timeout: Duration,
}

impl ShopConfig {
    /// Root of the versioned Admin REST API.
    pub fn base_url(&self) -> String {
        format!(
            "https://{}.myshopify.com/admin/api/{}",
            self.shop_name, self.api_version
        )
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    pub shop: ShopConfig,
    /// Collection kept in sync
    pub collection_id: String,
    /// Length of the trailing window, read in whole days
    pub window: TimeDelta,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    /// Bearer token required to trigger a cycle over HTTP
    pub trigger_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| var(key).ok_or(ConfigError::Missing(key));

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_or(var("PORT"), "PORT", 3000u16)?;

        let credentials = match var("SHOPIFY_ACCESS_TOKEN") {
            Some(token) => Credentials::AccessToken(token),
            None => Credentials::Basic {
                api_key: required("SHOPIFY_API_KEY")?,
                password: required("SHOPIFY_PASSWORD")?,
            },
        };

        let shop = ShopConfig {
            shop_name: required("SHOPIFY_SHOP_NAME")?,
            api_version: var("SHOPIFY_API_VERSION").unwrap_or_else(|| "2023-10".to_string()),
            credentials,
            timeout: Duration::from_secs(parse_or(
                var("HTTP_TIMEOUT_SECS"),
                "HTTP_TIMEOUT_SECS",
                30u64,
            )?),
        };

        let window_days = parse_or(
            var("SYNC_WINDOW_DAYS"),
            "SYNC_WINDOW_DAYS",
            DEFAULT_WINDOW_DAYS,
        )?;
        let window = TimeDelta::try_days(window_days)
            .filter(|window| *window > TimeDelta::zero())
            .ok_or(ConfigError::Invalid("SYNC_WINDOW_DAYS"))?;

        let retry_max_attempts =
            parse_or(var("RETRY_MAX_ATTEMPTS"), "RETRY_MAX_ATTEMPTS", 5u32)?;
        if retry_max_attempts == 0 {
            return Err(ConfigError::Invalid("RETRY_MAX_ATTEMPTS"));
        }
        let retry_base_delay_ms =
            parse_or(var("RETRY_BASE_DELAY_MS"), "RETRY_BASE_DELAY_MS", 1000u64)?;

        Ok(Self {
            host,
            port,
            shop,
            collection_id: required("COLLECTION_ID")?,
            window,
            retry_max_attempts,
            retry_base_delay: Duration::from_millis(retry_base_delay_ms),
            trigger_token: var("TRIGGER_TOKEN"),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max_attempts, self.retry_base_delay)
    }
}

fn parse_or<T: FromStr>(
    raw: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("Invalid {0} value")]
    Invalid(&'static str),
}
