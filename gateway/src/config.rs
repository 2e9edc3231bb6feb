//! Configuration for the gateway.

use std::env;
use std::time::Duration;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Broker addresses (comma-separated).
    pub brokers: String,
    /// Topic this gateway instance receives service replies on.
    ///
    /// Multi-instance deployments should give each instance its own reply
    /// topic so replies are never consumed by the wrong instance.
    pub reply_topic: String,
    /// Bound on one bus round-trip.
    ///
    /// Must exceed the prescription service's validation timeout, since a
    /// creation round-trip contains one.
    pub request_timeout: Duration,
    /// Log level for the tracing subscriber.
    pub log_level: String,
}

impl Config {
    /// Load configuration from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            host: env_or("GATEWAY_HOST", "0.0.0.0"),
            port: parse_or("GATEWAY_PORT", 3000),
            brokers: env_or("BROKERS", "localhost:9092"),
            reply_topic: env_or("GATEWAY_REPLY_TOPIC", rxflow_core::bus::topics::GATEWAY_REPLIES),
            request_timeout: Duration::from_secs(parse_or("GATEWAY_REQUEST_TIMEOUT_SECS", 30)),
            log_level: env_or("LOG_LEVEL", "info"),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
