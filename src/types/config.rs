//! Configuration types for the relay service.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::policy::{AckPolicy, ReconnectPolicy};
use crate::error::Result;
use crate::{DEFAULT_AUDIT_KEY, DEFAULT_HEALTH_PORT, DEFAULT_RECONNECT_INTERVAL_SECS};

/// Credentials and address of the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerParams {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    /// Virtual host, `/` for the default one
    pub vhost: String,
}

impl Default for BrokerParams {
    fn default() -> Self {
        Self {
            user: "guest".to_string(),
            password: "guest".to_string(),
            host: "localhost".to_string(),
            port: 5672,
            vhost: "/".to_string(),
        }
    }
}

impl BrokerParams {
    /// Create params from the individual connection fields.
    pub fn new(user: &str, password: &str, host: &str, port: u16, vhost: &str) -> Self {
        Self {
            user: user.to_string(),
            password: password.to_string(),
            host: host.to_string(),
            port,
            vhost: vhost.to_string(),
        }
    }

    /// `host:port`, used in log fields. Never includes credentials.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Global service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqConfig {
    /// Broker connection parameters
    pub broker: BrokerParams,

    /// Seconds to wait before reconnecting after all listeners exit
    pub reconnect_interval_secs: u64,

    /// Reconnect attempts before giving up (1 = first failure is fatal)
    pub reconnect_max_attempts: u32,

    /// Backoff multiplier between successive reconnect attempts
    pub reconnect_multiplier: f64,

    /// Upper bound for the reconnect backoff
    pub reconnect_max_interval_secs: u64,

    /// Acknowledgement behaviour for failing handlers
    pub ack_policy: AckPolicy,

    /// Constant tag written into every audit record
    pub audit_key: String,

    /// Port of the health/stats HTTP surface
    pub health_port: u16,

    /// Queues the service binary subscribes to
    pub queues: Vec<String>,
}

impl Default for MqConfig {
    fn default() -> Self {
        Self {
            broker: BrokerParams::default(),
            reconnect_interval_secs: DEFAULT_RECONNECT_INTERVAL_SECS,
            reconnect_max_attempts: 1,
            reconnect_multiplier: 1.0,
            reconnect_max_interval_secs: DEFAULT_RECONNECT_INTERVAL_SECS,
            ack_policy: AckPolicy::default(),
            audit_key: DEFAULT_AUDIT_KEY.to_string(),
            health_port: DEFAULT_HEALTH_PORT,
            queues: Vec::new(),
        }
    }
}

impl MqConfig {
    /// Load configuration from `MQ_*` environment variables.
    ///
    /// Nested keys use a double underscore, e.g. `MQ_BROKER__HOST`.
    /// `MQ_QUEUES` takes a comma separated list.
    pub fn from_env() -> Result<Self> {
        Self::load(Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix("MQ")
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("queues")
            .try_parsing(true)
    }

    fn load(env: config::Environment) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&MqConfig::default())?)
            .add_source(env)
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Reconnect policy described by this configuration.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            interval: Duration::from_secs(self.reconnect_interval_secs),
            max_attempts: self.reconnect_max_attempts.max(1),
            multiplier: self.reconnect_multiplier,
            max_interval: Duration::from_secs(self.reconnect_max_interval_secs),
        }
    }
}
