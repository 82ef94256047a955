//! RabbitMQ client backed by lapin.
//!
//! Provides the AMQP implementation of `BrokerConnector` / `BrokerChannel`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::*, types::FieldTable, uri::AMQPUri, BasicProperties, Channel, Connection,
    ConnectionProperties, ExchangeKind,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::broker::{BrokerChannel, BrokerConnector, Delivery, DeliveryStream};
use crate::error::{MqError, Result};
use crate::types::BrokerParams;

/// Heartbeat negotiated with the broker, in seconds
pub const HEARTBEAT_SECS: u16 = 10;

/// Dials RabbitMQ with fixed credentials.
#[derive(Debug, Clone)]
pub struct RabbitConnector {
    params: BrokerParams,
}

impl RabbitConnector {
    pub fn new(params: BrokerParams) -> Self {
        Self { params }
    }

    fn uri(&self) -> AMQPUri {
        let mut uri = AMQPUri::default();
        uri.authority.userinfo.username = self.params.user.clone();
        uri.authority.userinfo.password = self.params.password.clone();
        uri.authority.host = self.params.host.clone();
        uri.authority.port = self.params.port;
        uri.vhost = self.params.vhost.clone();
        uri.query.heartbeat = Some(HEARTBEAT_SECS);
        uri
    }
}

#[async_trait]
impl BrokerConnector for RabbitConnector {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>> {
        let connection = Connection::connect_uri(self.uri(), ConnectionProperties::default())
            .await
            .map_err(|e| MqError::Connection(format!("{}: {}", self.address(), e)))?;
        let channel = connection.create_channel().await?;

        info!(
            addr = %self.address(),
            vhost = %self.params.vhost,
            channel = channel.id(),
            "RabbitMQ channel opened"
        );

        Ok(Arc::new(RabbitChannel {
            connection,
            channel,
        }))
    }

    fn address(&self) -> String {
        self.params.address()
    }
}

/// One connection with a single channel on it.
pub struct RabbitChannel {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for RabbitChannel {
    async fn set_prefetch(&self, count: u16) -> Result<()> {
        self.channel
            .basic_qos(count, BasicQosOptions { global: false })
            .await
            .map_err(|e| MqError::operation("basic_qos", e))
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream> {
        let tag = format!("{}-{}", queue, Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions {
                    no_ack: false,
                    exclusive: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MqError::operation("basic_consume", e))?;

        debug!(queue = %queue, consumer_tag = %tag, "Consumer registered");

        let stream = consumer.map(|delivery| {
            delivery
                .map(|d| Delivery {
                    delivery_tag: d.delivery_tag,
                    data: d.data,
                })
                .map_err(|e| MqError::operation("deliver", e))
        });

        Ok(stream.boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|e| MqError::operation("basic_ack", e))
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|e| MqError::operation("basic_nack", e))
    }

    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(|e| MqError::operation("queue_declare", e))
    }

    async fn declare_exchange(&self, exchange: &str) -> Result<()> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MqError::operation("exchange_declare", e))
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MqError::operation("queue_bind", e))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<()> {
        let properties = BasicProperties::default().with_content_type(content_type.into());

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                body,
                properties,
            )
            .await
            .map(|_| ())
            .map_err(|e| MqError::operation("basic_publish", e))
    }

    async fn close(&self) {
        if let Err(e) = self.channel.close(200, "OK").await {
            warn!(error = %e, "Failed to close channel");
        }
        if let Err(e) = self.connection.close(200, "OK").await {
            warn!(error = %e, "Failed to close connection");
        }
    }
}
