//! Broker abstraction shared by the consumer supervisor and the producer.
//!
//! A `BrokerConnector` knows how to dial the broker with fixed credentials;
//! every call yields a fresh `BrokerChannel`. The supervisor drops a channel
//! wholesale when it dies and asks the connector for a new one.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// A single message handed out by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped tag used to acknowledge this message
    pub delivery_tag: u64,
    /// Raw message body
    pub data: Vec<u8>,
}

/// Stream of deliveries for one consumer. Ends when the broker closes it.
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// An open channel on a broker connection.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Limit unacknowledged deliveries per consumer.
    async fn set_prefetch(&self, count: u16) -> Result<()>;

    /// Start a manual-ack, non-exclusive consumer on `queue`.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream>;

    /// Acknowledge exactly one delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Reject exactly one delivery.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;

    /// Declare a durable queue.
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Declare a durable direct exchange.
    async fn declare_exchange(&self, exchange: &str) -> Result<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Non-mandatory, non-immediate publish.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<()>;

    /// Close the channel and its connection. Errors are logged, not returned.
    async fn close(&self);
}

/// Dials the broker with a fixed set of credentials.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>>;

    /// Human readable address for log fields.
    fn address(&self) -> String;
}
