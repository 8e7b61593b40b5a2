//! Configuration module for environment variable parsing.
//!
//! Every setting has a compiled-in default except the queue endpoint, which
//! must be present for the worker to start.

use std::env;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;
use url::Url;

/// Default sender address used when `MAIL_FROM_ADDRESS` is unset.
pub const DEFAULT_FROM_ADDRESS: &str = "noreply@example.com";

/// Default subject line used when `MAIL_SUBJECT` is unset.
pub const DEFAULT_SUBJECT: &str = "Login to Your Account";

const DEFAULT_QUEUE_NAME: &str = "email_requests";
const DEFAULT_MAIL_API_URL: &str = "http://localhost:8025/v3/messages";

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("queue endpoint not configured (set QUEUE_URL)")]
    MissingQueueUrl,

    #[error("invalid {name}: {source}")]
    InvalidUrl {
        name: &'static str,
        #[source]
        source: url::ParseError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Broker connection URL
    pub queue_url: String,

    /// Name of the queue holding email requests
    pub queue_name: String,

    /// How long a received but unacknowledged delivery stays hidden
    pub visibility_timeout: Duration,

    /// Sender address for outbound mail
    pub from_address: String,

    /// Subject line for outbound mail
    pub subject: String,

    /// Messages endpoint of the HTTP mail provider
    pub mail_api_url: Url,

    /// API key for the mail provider, if it requires one
    pub mail_api_key: Option<String>,

    /// HTTP request timeout in milliseconds
    pub request_timeout_ms: u64,

    /// Port for the health/metrics server
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let queue_url = lookup("QUEUE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingQueueUrl)?;

        let mail_api_url = lookup("MAIL_API_URL").unwrap_or_else(|| DEFAULT_MAIL_API_URL.to_string());
        let mail_api_url = Url::parse(&mail_api_url).map_err(|source| ConfigError::InvalidUrl {
            name: "MAIL_API_URL",
            source,
        })?;

        Ok(Config {
            queue_url,

            queue_name: lookup("QUEUE_NAME").unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string()),

            visibility_timeout: Duration::from_secs(parse_or(
                &lookup,
                "QUEUE_VISIBILITY_TIMEOUT_SECS",
                30,
            )),

            from_address: lookup("MAIL_FROM_ADDRESS")
                .unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string()),

            subject: lookup("MAIL_SUBJECT").unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),

            mail_api_url,

            mail_api_key: lookup("MAIL_API_KEY").filter(|v| !v.is_empty()),

            request_timeout_ms: parse_or(&lookup, "REQUEST_TIMEOUT_MS", 10_000),

            metrics_port: parse_or(&lookup, "METRICS_PORT", 9090),
        })
    }
}

/// Parse a numeric variable, falling back to `default` when absent or invalid.
fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy,
{
    let raw = match lookup(name) {
        Some(v) => v,
        None => return default,
    };

    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid numeric value, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_missing_queue_url_fails() {
        let result = Config::from_lookup(lookup_from(&[]));
        assert!(matches!(result, Err(ConfigError::MissingQueueUrl)));
    }

    #[test]
    fn test_blank_queue_url_fails() {
        let result = Config::from_lookup(lookup_from(&[("QUEUE_URL", "  ")]));
        assert!(matches!(result, Err(ConfigError::MissingQueueUrl)));
    }

    #[test]
    fn test_defaults_applied() {
        let config =
            Config::from_lookup(lookup_from(&[("QUEUE_URL", "amqp://localhost:5672")])).unwrap();

        assert_eq!(config.queue_name, "email_requests");
        assert_eq!(config.from_address, DEFAULT_FROM_ADDRESS);
        assert_eq!(config.subject, DEFAULT_SUBJECT);
        assert_eq!(config.visibility_timeout, Duration::from_secs(30));
        assert_eq!(config.request_timeout_ms, 10_000);
        assert_eq!(config.metrics_port, 9090);
        assert!(config.mail_api_key.is_none());
    }

    #[test]
    fn test_overrides_and_invalid_numbers() {
        let config = Config::from_lookup(lookup_from(&[
            ("QUEUE_URL", "amqp://broker:5672"),
            ("MAIL_FROM_ADDRESS", "auth@acme.test"),
            ("MAIL_SUBJECT", "Welcome back"),
            ("METRICS_PORT", "not-a-port"),
            ("REQUEST_TIMEOUT_MS", "2500"),
        ]))
        .unwrap();

        assert_eq!(config.from_address, "auth@acme.test");
        assert_eq!(config.subject, "Welcome back");
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.request_timeout_ms, 2500);
    }

    #[test]
    fn test_invalid_mail_api_url() {
        let result = Config::from_lookup(lookup_from(&[
            ("QUEUE_URL", "amqp://broker:5672"),
            ("MAIL_API_URL", "not a url"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidUrl { name: "MAIL_API_URL", .. })
        ));
    }
}
