//! Environment-backed configuration for `link-smoke`.

use std::{env, error::Error, fmt};

use link_core::{ConnectionConfig, NotificationDefaults, ReconnectPolicy};
use link_ws::{DEFAULT_HANDSHAKE_TIMEOUT_MS, RuntimeConfig};

const DEVELOPMENT_ENDPOINT: &str = "ws://localhost:8080/ws";
const PRODUCTION_ENDPOINT: &str = "wss://realtime.shiplink.app/ws";
const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 3_000;
const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_NOTIFICATION_EXPIRY_MS: u64 = link_core::DEFAULT_EXPIRY_MS;

/// Deployment environment; selects the default endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    fn default_endpoint(self) -> &'static str {
        match self {
            Self::Development => DEVELOPMENT_ENDPOINT,
            Self::Production => PRODUCTION_ENDPOINT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    pub environment: Environment,
    /// Realtime endpoint; `SHIPLINK_WS_URL` or the environment default.
    pub endpoint: String,
    pub auth_token: Option<String>,
    pub reconnect_interval_ms: u64,
    pub reconnect_max_attempts: u32,
    /// Default expiry for non-error notices.
    pub notification_expiry_ms: u64,
    pub handshake_timeout_ms: u64,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let environment = match optional_trimmed_env("SHIPLINK_ENV", &mut lookup) {
            None => Environment::default(),
            Some(value) => parse_environment(value)?,
        };
        let endpoint = optional_trimmed_env("SHIPLINK_WS_URL", &mut lookup)
            .unwrap_or_else(|| environment.default_endpoint().to_owned());
        let auth_token = optional_trimmed_env("SHIPLINK_AUTH_TOKEN", &mut lookup);

        let reconnect_interval_ms = parse_u64_with_default(
            "SHIPLINK_RECONNECT_INTERVAL_MS",
            DEFAULT_RECONNECT_INTERVAL_MS,
            &mut lookup,
        )?;
        let reconnect_max_attempts = parse_u32_with_default(
            "SHIPLINK_RECONNECT_MAX_ATTEMPTS",
            DEFAULT_RECONNECT_MAX_ATTEMPTS,
            &mut lookup,
        )?;
        let notification_expiry_ms = parse_u64_with_default(
            "SHIPLINK_NOTIFICATION_EXPIRY_MS",
            DEFAULT_NOTIFICATION_EXPIRY_MS,
            &mut lookup,
        )?;

        let handshake_timeout_ms = parse_u64_with_default(
            "SHIPLINK_HANDSHAKE_TIMEOUT_MS",
            DEFAULT_HANDSHAKE_TIMEOUT_MS,
            &mut lookup,
        )?;

        for (key, value) in [
            ("SHIPLINK_NOTIFICATION_EXPIRY_MS", notification_expiry_ms),
            ("SHIPLINK_HANDSHAKE_TIMEOUT_MS", handshake_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: "0".to_owned(),
                    reason: "must be at least 1".to_owned(),
                });
            }
        }

        Ok(Self {
            environment,
            endpoint,
            auth_token,
            reconnect_interval_ms,
            reconnect_max_attempts,
            notification_expiry_ms,
            handshake_timeout_ms,
        })
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        let mut connection = ConnectionConfig::new(self.endpoint.clone()).with_reconnect(
            ReconnectPolicy::new(self.reconnect_interval_ms, self.reconnect_max_attempts),
        );
        if let Some(token) = &self.auth_token {
            connection = connection.with_auth_token(token.clone());
        }

        RuntimeConfig::new(connection)
            .with_notifications(NotificationDefaults {
                expiry_ms: self.notification_expiry_ms,
            })
            .with_handshake_timeout_ms(self.handshake_timeout_ms)
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn parse_environment(value: String) -> Result<Environment, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "development" | "dev" => Ok(Environment::Development),
        "production" | "prod" => Ok(Environment::Production),
        _ => Err(ConfigError::InvalidValue {
            key: "SHIPLINK_ENV",
            value,
            reason: "expected 'development' or 'production'".to_owned(),
        }),
    }
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_u64_with_default<F>(key: &'static str, default: u64, lookup: &mut F) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value.parse::<u64>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}

fn parse_u32_with_default<F>(key: &'static str, default: u32, lookup: &mut F) -> Result<u32, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value.parse::<u32>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}
