//! MQ Relay Library
//!
//! Supervised RabbitMQ consumers and producers. A consumer supervisor keeps
//! one listener per registered queue running on a shared connection and
//! rebuilds the connection when it is lost; a producer publishes through a
//! declared direct exchange. Both sides emit structured audit records.

pub mod api;
pub mod audit;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod net;
pub mod types;

pub use audit::{AuditLogger, AuditRecord, AuditSink, Direction};
pub use error::{MqError, Result};
pub use messaging::{ConsumerSupervisor, Producer, RabbitConnector};
pub use types::{AckPolicy, BrokerParams, MqConfig, ReconnectPolicy};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::audit::*;
    pub use crate::error::{MqError, Result};
    pub use crate::messaging::*;
    pub use crate::types::*;
}

/// Seconds between losing the connection and the reconnect attempt
pub const DEFAULT_RECONNECT_INTERVAL_SECS: u64 = 10;

/// Constant tag carried by every audit record
pub const DEFAULT_AUDIT_KEY: &str = "MJ_MD_MQ_LOG";

/// Default port of the health endpoint
pub const DEFAULT_HEALTH_PORT: u16 = 3020;
