//! # Messaging Module
//!
//! RabbitMQ integration for the relay service.
//!
//! ## Features
//! - Consumer supervisor running one listener per registered queue,
//!   reconnecting when the connection drops
//! - Producer publishing through a declared direct exchange
//! - Broker abstraction so both can run against any channel implementation

pub mod broker;
pub mod consumer;
pub mod producer;
pub mod rabbit_client;

#[cfg(test)]
pub mod memory;

pub use broker::{BrokerChannel, BrokerConnector, Delivery, DeliveryStream};
pub use consumer::{ConsumerSupervisor, Registration, StatsSnapshot, SupervisorStats};
pub use producer::{Producer, Topology};
pub use rabbit_client::{RabbitChannel, RabbitConnector};
