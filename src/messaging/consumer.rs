//! Consumer supervisor.
//!
//! Owns one broker channel, runs one listener task per registration on it and
//! rebuilds the channel when every listener has exited. Listeners only exit
//! when their delivery stream ends (or cannot be opened), so "all listeners
//! gone" is the signal that the connection is dead.

use std::convert::Infallible;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use super::broker::{BrokerChannel, BrokerConnector, Delivery};
use super::rabbit_client::RabbitConnector;
use crate::audit::{AuditLogger, Direction};
use crate::error::{MqError, Result};
use crate::types::{AckPolicy, BrokerParams, ReconnectPolicy};

/// Result code recorded when a handler panics
pub const HANDLER_PANIC_CODE: i32 = -1;

/// Type-erased message handler. Returns `0` on success.
pub type Handler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, i32> + Send + Sync>;

/// A queue subscription and the handler bound to it.
#[derive(Clone)]
pub struct Registration {
    pub queue: String,
    /// Skip audit records for this subscription
    pub suppress_logging: bool,
    handler: Handler,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("queue", &self.queue)
            .field("suppress_logging", &self.suppress_logging)
            .finish_non_exhaustive()
    }
}

/// Live counters for a supervisor.
#[derive(Debug, Default)]
pub struct SupervisorStats {
    connected: AtomicBool,
    active_listeners: AtomicUsize,
    generation: AtomicU64,
    reconnects: AtomicU64,
    messages_handled: AtomicU64,
    handler_failures: AtomicU64,
}

/// Point-in-time copy of `SupervisorStats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub connected: bool,
    pub active_listeners: usize,
    pub generation: u64,
    pub reconnects: u64,
    pub messages_handled: u64,
    pub handler_failures: u64,
}

impl SupervisorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connected: self.connected.load(Ordering::SeqCst),
            active_listeners: self.active_listeners.load(Ordering::SeqCst),
            generation: self.generation.load(Ordering::SeqCst),
            reconnects: self.reconnects.load(Ordering::SeqCst),
            messages_handled: self.messages_handled.load(Ordering::SeqCst),
            handler_failures: self.handler_failures.load(Ordering::SeqCst),
        }
    }

    pub fn active_listeners(&self) -> usize {
        self.active_listeners.load(Ordering::SeqCst)
    }

    fn record_message(&self, code: i32) {
        self.messages_handled.fetch_add(1, Ordering::SeqCst);
        if code != 0 {
            self.handler_failures.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Supervises one listener per registration on a shared channel.
pub struct ConsumerSupervisor {
    connector: Arc<dyn BrokerConnector>,
    channel: Option<Arc<dyn BrokerChannel>>,
    registrations: Vec<Registration>,
    reconnect: ReconnectPolicy,
    ack_policy: AckPolicy,
    audit: AuditLogger,
    stats: Arc<SupervisorStats>,
}

impl ConsumerSupervisor {
    /// Connect to RabbitMQ with the given credentials.
    pub async fn new(params: BrokerParams) -> Result<Self> {
        Self::with_connector(Arc::new(RabbitConnector::new(params))).await
    }

    /// Connect through an arbitrary connector. Fails if the first
    /// connection cannot be established.
    pub async fn with_connector(connector: Arc<dyn BrokerConnector>) -> Result<Self> {
        let channel = connector.connect().await?;
        let stats = Arc::new(SupervisorStats::default());
        stats.connected.store(true, Ordering::SeqCst);

        info!(addr = %connector.address(), "Consumer supervisor connected");

        Ok(Self {
            connector,
            channel: Some(channel),
            registrations: Vec::new(),
            reconnect: ReconnectPolicy::default(),
            ack_policy: AckPolicy::default(),
            audit: AuditLogger::default(),
            stats,
        })
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_ack_policy(mut self, policy: AckPolicy) -> Self {
        self.ack_policy = policy;
        self
    }

    pub fn with_audit_logger(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// Subscribe `handler` to `queue`. Only possible before `start`.
    pub fn register_receiver<F, Fut>(&mut self, queue: &str, suppress_logging: bool, handler: F)
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |body| handler(body).boxed());
        self.registrations.push(Registration {
            queue: queue.to_string(),
            suppress_logging,
            handler,
        });
        debug!(queue = %queue, suppress_logging, "Receiver registered");
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    /// Shared handle on the live counters.
    pub fn stats(&self) -> Arc<SupervisorStats> {
        Arc::clone(&self.stats)
    }

    /// Run listeners forever, reconnecting whenever they all exit.
    ///
    /// Only returns when the reconnect policy is exhausted.
    pub async fn start(mut self) -> Result<Infallible> {
        info!(
            registrations = self.registrations.len(),
            ack_policy = ?self.ack_policy,
            "Starting consumer supervisor"
        );

        loop {
            self.run().await;
            self.reconnect().await?;
        }
    }

    /// Fan out listeners on the current channel and wait for all of them.
    async fn run(&mut self) {
        let Some(channel) = self.channel.take() else {
            warn!(addr = %self.connector.address(), "No live broker channel, skipping run");
            return;
        };

        let generation = self.stats.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if self.registrations.is_empty() {
            warn!(generation, "No receivers registered");
        }

        let mut listeners = JoinSet::new();
        for registration in &self.registrations {
            let listener = Listener {
                channel: Arc::clone(&channel),
                registration: registration.clone(),
                ack_policy: self.ack_policy,
                audit: self.audit.clone(),
                stats: Arc::clone(&self.stats),
            };
            self.stats.active_listeners.fetch_add(1, Ordering::SeqCst);
            listeners.spawn(listener.run());
        }

        info!(generation, listeners = listeners.len(), "Listeners running");

        while let Some(joined) = listeners.join_next().await {
            self.stats.active_listeners.fetch_sub(1, Ordering::SeqCst);
            if let Err(e) = joined {
                error!(error = %e, "Listener task aborted");
            }
        }

        warn!(generation, "All listeners exited, discarding connection");
        self.stats.connected.store(false, Ordering::SeqCst);
        channel.close().await;
    }

    /// Wait out the backoff and dial a fresh channel.
    async fn reconnect(&mut self) -> Result<()> {
        let mut last_error = None;

        for attempt in 0..self.reconnect.max_attempts {
            let delay = self.reconnect.delay_for(attempt);
            warn!(
                addr = %self.connector.address(),
                attempt = attempt + 1,
                delay_secs = delay.as_secs_f64(),
                "Connection lost, reconnecting"
            );
            tokio::time::sleep(delay).await;

            match self.connector.connect().await {
                Ok(channel) => {
                    self.channel = Some(channel);
                    self.stats.connected.store(true, Ordering::SeqCst);
                    self.stats.reconnects.fetch_add(1, Ordering::SeqCst);
                    info!(attempt = attempt + 1, "Reconnected to broker");
                    return Ok(());
                }
                Err(e) => {
                    error!(attempt = attempt + 1, error = %e, "Reconnect failed");
                    last_error = Some(e);
                }
            }
        }

        Err(MqError::ReconnectExhausted {
            attempts: self.reconnect.max_attempts,
            source: Box::new(
                last_error.unwrap_or_else(|| MqError::Connection("no reconnect attempted".into())),
            ),
        })
    }
}

/// One registration consuming on a shared channel.
struct Listener {
    channel: Arc<dyn BrokerChannel>,
    registration: Registration,
    ack_policy: AckPolicy,
    audit: AuditLogger,
    stats: Arc<SupervisorStats>,
}

impl Listener {
    #[instrument(skip(self), fields(queue = %self.registration.queue))]
    async fn run(self) {
        if let Err(e) = self.channel.set_prefetch(1).await {
            warn!(error = %e, "Failed to set prefetch");
        }

        let mut deliveries = match self.channel.consume(&self.registration.queue).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "Failed to open consumption stream");
                return;
            }
        };

        info!("Started consuming");

        while let Some(delivery) = deliveries.next().await {
            match delivery {
                Ok(delivery) => self.handle(delivery).await,
                Err(e) => error!(error = %e, "Consumer error"),
            }
        }

        warn!("Delivery stream closed");
    }

    async fn handle(&self, delivery: Delivery) {
        let handler = Arc::clone(&self.registration.handler);
        let body = delivery.data;
        let payload = body.clone();

        let code = match AssertUnwindSafe(async move { (*handler)(payload).await })
            .catch_unwind()
            .await
        {
            Ok(code) => code,
            Err(_) => {
                error!(delivery_tag = delivery.delivery_tag, "Handler panicked");
                HANDLER_PANIC_CODE
            }
        };
        self.stats.record_message(code);

        if code != 0 {
            warn!(delivery_tag = delivery.delivery_tag, code, "Handler reported failure");
        }

        let settled = if self.ack_policy.should_ack(code) {
            self.channel.ack(delivery.delivery_tag).await
        } else {
            self.channel.nack(delivery.delivery_tag, true).await
        };
        if let Err(e) = settled {
            warn!(delivery_tag = delivery.delivery_tag, error = %e, "Failed to settle delivery");
        }

        if !self.registration.suppress_logging {
            let msg = String::from_utf8_lossy(&body);
            self.audit
                .record(Direction::Inbound, &msg, &self.registration.queue);
        }
    }
}
