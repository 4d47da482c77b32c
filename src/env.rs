use dotenv::dotenv;
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::rabbitmq::errors::{RabbitMQError, Result};

/// Connection and TLS settings for a single RabbitMQ queue.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RabbitMQConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub virtual_host: String,
    pub queue_name: String,
    /// Heartbeat interval in seconds.
    pub heartbeat: u16,
    /// Upper bound, in seconds, on a publish stalled by a blocked connection.
    pub blocked_connection_timeout: u64,
    pub connect_timeout_seconds: u64,
    pub publisher_confirms: bool,

    pub use_tls: bool,
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub verify_peer: bool,
    pub server_hostname: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5672
}

fn default_credential() -> String {
    "guest".to_string()
}

fn default_virtual_host() -> String {
    "/".to_string()
}

fn default_queue_name() -> String {
    "rabbitmq_poc".to_string()
}

fn default_heartbeat() -> u16 {
    60
}

fn default_blocked_connection_timeout() -> u64 {
    300
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

impl Default for RabbitMQConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_credential(),
            password: default_credential(),
            virtual_host: default_virtual_host(),
            queue_name: default_queue_name(),
            heartbeat: default_heartbeat(),
            blocked_connection_timeout: default_blocked_connection_timeout(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            publisher_confirms: true,
            use_tls: false,
            ca_cert: None,
            client_cert: None,
            client_key: None,
            verify_peer: true,
            server_hostname: None,
        }
    }
}

impl RabbitMQConfig {
    /// Reads `.env` if present, then builds the config from the process environment.
    pub fn load() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string_or = |key: &str, default: fn() -> String| lookup(key).unwrap_or_else(default);
        let flag_or = |key: &str, default: bool| match lookup(key) {
            Some(val) => val.to_lowercase() == "true",
            None => default,
        };
        let non_empty = |key: &str| lookup(key).filter(|val| !val.is_empty());

        let config = RabbitMQConfig {
            host: string_or("RABBITMQ_HOST", default_host),
            port: parse_or(&lookup, "RABBITMQ_PORT", default_port)?,
            username: string_or("RABBITMQ_USERNAME", default_credential),
            password: string_or("RABBITMQ_PASSWORD", default_credential),
            virtual_host: string_or("RABBITMQ_VHOST", default_virtual_host),
            queue_name: string_or("RABBITMQ_QUEUE", default_queue_name),
            heartbeat: parse_or(&lookup, "RABBITMQ_HEARTBEAT", default_heartbeat)?,
            blocked_connection_timeout: parse_or(
                &lookup,
                "RABBITMQ_BLOCKED_CONNECTION_TIMEOUT",
                default_blocked_connection_timeout,
            )?,
            connect_timeout_seconds: parse_or(
                &lookup,
                "RABBITMQ_CONNECT_TIMEOUT_SECONDS",
                default_connect_timeout_seconds,
            )?,
            publisher_confirms: flag_or("RABBITMQ_PUBLISHER_CONFIRMS", true),
            use_tls: flag_or("RABBITMQ_USE_TLS", false),
            ca_cert: non_empty("RABBITMQ_CA_CERT").map(PathBuf::from),
            client_cert: non_empty("RABBITMQ_CLIENT_CERT").map(PathBuf::from),
            client_key: non_empty("RABBITMQ_CLIENT_KEY").map(PathBuf::from),
            verify_peer: flag_or("RABBITMQ_VERIFY_PEER", true),
            server_hostname: non_empty("RABBITMQ_SERVER_HOSTNAME"),
        };

        debug!(use_tls = config.use_tls, "Loaded RabbitMQ configuration");
        Ok(config)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.heartbeat))
    }

    pub fn blocked_timeout(&self) -> Duration {
        Duration::from_secs(self.blocked_connection_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Name the broker certificate is checked against.
    pub fn effective_server_hostname(&self) -> &str {
        self.server_hostname.as_deref().unwrap_or(&self.host)
    }

    pub fn has_client_identity(&self) -> bool {
        self.client_cert.is_some() && self.client_key.is_some()
    }

    /// EXTERNAL auth needs a verified TLS session carrying a client certificate.
    pub fn uses_external_auth(&self) -> bool {
        self.use_tls && self.has_client_identity() && self.verify_peer
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: fn() -> T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(val) => val.trim().parse().map_err(|e| {
            RabbitMQError::ConfigError(format!("{} has invalid value '{}': {}", key, val, e))
        }),
        None => Ok(default()),
    }
}
