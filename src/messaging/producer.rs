//! Producer publishing plain-text messages through a declared direct exchange.

use std::sync::Arc;

use tracing::{info, instrument};

use super::broker::{BrokerChannel, BrokerConnector};
use super::rabbit_client::RabbitConnector;
use crate::audit::{AuditLogger, Direction};
use crate::error::{MqError, Result};
use crate::types::BrokerParams;

/// Content type attached to every published message
pub const CONTENT_TYPE: &str = "text/plain";

/// Queue, exchange and routing key a producer publishes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

/// Publishes to a single declared queue/exchange pair.
pub struct Producer {
    channel: Arc<dyn BrokerChannel>,
    topology: Option<Topology>,
    audit: AuditLogger,
}

impl Producer {
    /// Connect to RabbitMQ. No topology is declared yet.
    pub async fn new(params: BrokerParams) -> Result<Self> {
        Self::with_connector(&RabbitConnector::new(params)).await
    }

    pub async fn with_connector(connector: &dyn BrokerConnector) -> Result<Self> {
        let channel = connector.connect().await?;
        info!(addr = %connector.address(), "Producer connected");

        Ok(Self {
            channel,
            topology: None,
            audit: AuditLogger::default(),
        })
    }

    pub fn with_audit_logger(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// Declared topology, if `declare` has succeeded.
    pub fn topology(&self) -> Option<&Topology> {
        self.topology.as_ref()
    }

    pub fn is_declared(&self) -> bool {
        self.topology.is_some()
    }

    /// Ensure the durable queue and direct exchange exist and bind them.
    ///
    /// Returns the first failing step. Safe to call repeatedly.
    #[instrument(skip(self))]
    pub async fn declare(&mut self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.channel.declare_queue(queue).await?;
        self.channel.declare_exchange(exchange).await?;
        self.channel.bind_queue(queue, exchange, routing_key).await?;

        self.topology = Some(Topology {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        });
        info!("Topology declared");
        Ok(())
    }

    /// Publish `message` through the declared exchange. No retries.
    pub async fn publish(&self, message: &str) -> Result<()> {
        let topology = self.topology.as_ref().ok_or(MqError::NotDeclared)?;

        self.channel
            .publish(
                &topology.exchange,
                &topology.routing_key,
                message.as_bytes(),
                CONTENT_TYPE,
            )
            .await?;

        self.audit
            .record(Direction::Outbound, message, &topology.queue);
        Ok(())
    }

    /// Release the connection.
    pub async fn close(self) {
        self.channel.close().await;
    }
}
