//! In-memory broker used by the unit tests.
//!
//! Models just enough broker behaviour to observe the supervisor: queues,
//! direct bindings, per-consumer prefetch, acks/nacks and connection loss.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Notify;

use super::broker::{BrokerChannel, BrokerConnector, Delivery, DeliveryStream};
use crate::error::{MqError, Result};

/// Something the broker observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Connected(usize),
    Prefetch(u16),
    Consume(String),
    Delivered { queue: String, tag: u64 },
    Acked(u64),
    Nacked { tag: u64, requeue: bool },
    QueueDeclared(String),
    ExchangeDeclared(String),
    Bound { queue: String, exchange: String, key: String },
    Published { exchange: String, key: String, body: String, content_type: String },
    Closed(usize),
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    bindings: HashMap<(String, String), String>,
    in_flight: HashMap<u64, (String, Vec<u8>)>,
    settled: HashSet<u64>,
    next_tag: u64,
    events: Vec<BrokerEvent>,
    failing_connects: usize,
    failing_operations: HashSet<&'static str>,
    failing_queues: HashSet<String>,
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
    connections: AtomicUsize,
    channels: Mutex<Vec<Arc<MemoryChannel>>>,
}

/// Test broker; cloning shares the same state.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState {
                    next_tag: 1,
                    ..Default::default()
                }),
                notify: Notify::new(),
                connections: AtomicUsize::new(0),
                channels: Mutex::new(Vec::new()),
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut BrokerState) -> T) -> T {
        let result = f(&mut self.shared.state.lock().unwrap());
        self.shared.notify.notify_waiters();
        result
    }

    /// Enqueue a message directly on `queue`.
    pub fn push(&self, queue: &str, body: &str) {
        self.with_state(|s| {
            s.queues
                .entry(queue.to_string())
                .or_default()
                .push_back(body.as_bytes().to_vec())
        });
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.with_state(|s| s.failing_connects = n);
    }

    /// Make every call of the named channel operation fail.
    pub fn fail_operation(&self, operation: &'static str) {
        self.with_state(|s| {
            s.failing_operations.insert(operation);
        });
    }

    /// Make consuming from `queue` fail.
    pub fn fail_consume_on(&self, queue: &str) {
        self.with_state(|s| {
            s.failing_queues.insert(queue.to_string());
        });
    }

    /// Kill every open channel, closing their delivery streams.
    pub fn drop_connections(&self) {
        let channels = std::mem::take(&mut *self.shared.channels.lock().unwrap());
        for channel in channels {
            channel.alive.store(false, Ordering::SeqCst);
        }
        self.shared.notify.notify_waiters();
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<BrokerEvent> {
        self.shared.state.lock().unwrap().events.clone()
    }

    pub fn pending(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map_or(0, |q| q.len())
    }

    pub fn acked(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BrokerEvent::Acked(tag) => Some(tag),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>> {
        let refused = self.with_state(|s| {
            if s.failing_connects > 0 {
                s.failing_connects -= 1;
                true
            } else {
                false
            }
        });
        if refused {
            return Err(MqError::Connection("connection refused".to_string()));
        }

        let id = self.shared.connections.fetch_add(1, Ordering::SeqCst) + 1;
        self.with_state(|s| s.events.push(BrokerEvent::Connected(id)));

        let channel = Arc::new(MemoryChannel {
            id,
            broker: self.clone(),
            alive: AtomicBool::new(true),
        });
        self.shared.channels.lock().unwrap().push(channel.clone());
        Ok(Arc::new(channel))
    }

    fn address(&self) -> String {
        "memory:0".to_string()
    }
}

pub struct MemoryChannel {
    id: usize,
    broker: MemoryBroker,
    alive: AtomicBool,
}

impl MemoryChannel {
    fn check(&self, operation: &'static str) -> Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(MqError::operation(operation, "channel closed"));
        }
        let failing = self
            .broker
            .shared
            .state
            .lock()
            .unwrap()
            .failing_operations
            .contains(operation);
        if failing {
            return Err(MqError::operation(operation, "injected failure"));
        }
        Ok(())
    }

    fn record(&self, event: BrokerEvent) {
        self.broker.with_state(|s| s.events.push(event));
    }

    /// Next delivery for a consumer whose previous delivery was `last`.
    /// `None` while prefetch or an empty queue blocks, `Some(None)` once dead.
    fn try_next(&self, queue: &str, last: Option<u64>) -> Option<Option<Delivery>> {
        if !self.alive.load(Ordering::SeqCst) {
            return Some(None);
        }
        let mut state = self.broker.shared.state.lock().unwrap();
        if let Some(tag) = last {
            if !state.settled.contains(&tag) {
                return None;
            }
        }
        let data = state.queues.get_mut(queue)?.pop_front()?;
        let tag = state.next_tag;
        state.next_tag += 1;
        state.in_flight.insert(tag, (queue.to_string(), data.clone()));
        state.events.push(BrokerEvent::Delivered {
            queue: queue.to_string(),
            tag,
        });
        Some(Some(Delivery {
            delivery_tag: tag,
            data,
        }))
    }
}

#[async_trait]
impl BrokerChannel for Arc<MemoryChannel> {
    async fn set_prefetch(&self, count: u16) -> Result<()> {
        self.check("basic_qos")?;
        self.record(BrokerEvent::Prefetch(count));
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream> {
        self.check("basic_consume")?;
        let refused = self
            .broker
            .shared
            .state
            .lock()
            .unwrap()
            .failing_queues
            .contains(queue);
        if refused {
            return Err(MqError::operation("basic_consume", "NOT_FOUND"));
        }
        self.record(BrokerEvent::Consume(queue.to_string()));

        let channel = Arc::clone(self);
        let queue = queue.to_string();
        let stream = futures::stream::unfold(None, move |last: Option<u64>| {
            let channel = channel.clone();
            let queue = queue.clone();
            async move {
                loop {
                    let notified = channel.broker.shared.notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    match channel.try_next(&queue, last) {
                        Some(Some(delivery)) => {
                            let tag = delivery.delivery_tag;
                            return Some((Ok(delivery), Some(tag)));
                        }
                        Some(None) => return None,
                        None => notified.await,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.check("basic_ack")?;
        self.broker.with_state(|s| {
            s.in_flight.remove(&delivery_tag);
            s.settled.insert(delivery_tag);
            s.events.push(BrokerEvent::Acked(delivery_tag));
        });
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.check("basic_nack")?;
        self.broker.with_state(|s| {
            if let Some((queue, data)) = s.in_flight.remove(&delivery_tag) {
                if requeue {
                    s.queues.entry(queue).or_default().push_back(data);
                }
            }
            s.settled.insert(delivery_tag);
            s.events.push(BrokerEvent::Nacked {
                tag: delivery_tag,
                requeue,
            });
        });
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.check("queue_declare")?;
        self.broker.with_state(|s| {
            s.queues.entry(queue.to_string()).or_default();
            s.events.push(BrokerEvent::QueueDeclared(queue.to_string()));
        });
        Ok(())
    }

    async fn declare_exchange(&self, exchange: &str) -> Result<()> {
        self.check("exchange_declare")?;
        self.record(BrokerEvent::ExchangeDeclared(exchange.to_string()));
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.check("queue_bind")?;
        self.broker.with_state(|s| {
            s.bindings.insert(
                (exchange.to_string(), routing_key.to_string()),
                queue.to_string(),
            );
            s.events.push(BrokerEvent::Bound {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                key: routing_key.to_string(),
            });
        });
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<()> {
        self.check("basic_publish")?;
        self.broker.with_state(|s| {
            let target = s
                .bindings
                .get(&(exchange.to_string(), routing_key.to_string()))
                .cloned();
            if let Some(queue) = target {
                s.queues.entry(queue).or_default().push_back(body.to_vec());
            }
            s.events.push(BrokerEvent::Published {
                exchange: exchange.to_string(),
                key: routing_key.to_string(),
                body: String::from_utf8_lossy(body).into_owned(),
                content_type: content_type.to_string(),
            });
        });
        Ok(())
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.record(BrokerEvent::Closed(self.id));
    }
}
