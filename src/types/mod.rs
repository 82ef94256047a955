//! Core types for the relay service.

mod config;
mod policy;

pub use config::{BrokerParams, MqConfig};
pub use policy::{AckPolicy, ReconnectPolicy};
