//! Broker abstraction
//!
//! Modelled on AMQP: a [`Broker`] hands out connections, a connection opens
//! channels, and a channel declares queues, publishes and consumes. Queues are
//! durable and messages persistent; a consumer must ack or nack every
//! [`Delivery`] it receives.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{BrokerError, BrokerResult};

#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> BrokerResult<Arc<dyn BrokerConnection>>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> BrokerResult<Arc<dyn Channel>>;

    /// Resolves once the connection is gone, with the reason it closed.
    async fn closed(&self) -> BrokerError;

    fn is_open(&self) -> bool;

    async fn close(&self);
}

#[async_trait]
pub trait Channel: Send + Sync {
    /// Declare a durable queue. Declaring an existing queue is a no-op.
    async fn assert_queue(&self, queue: &str) -> BrokerResult<()>;

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> BrokerResult<()>;

    /// Start consuming `queue` with at most `prefetch` unacked deliveries.
    async fn consume(&self, queue: &str, prefetch: u16) -> BrokerResult<Consumer>;
}

#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> BrokerResult<()>;
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> BrokerResult<()>;
}

pub struct Delivery {
    pub payload: Vec<u8>,
    pub delivery_tag: u64,
    pub redelivered: bool,
    /// How many times this message has been handed to a consumer, this time included.
    pub delivery_count: u32,
    acker: Arc<dyn Acker>,
}

impl Delivery {
    pub fn new(
        payload: Vec<u8>,
        delivery_tag: u64,
        delivery_count: u32,
        acker: Arc<dyn Acker>,
    ) -> Self {
        Self {
            payload,
            delivery_tag,
            redelivered: delivery_count > 1,
            delivery_count,
            acker,
        }
    }

    /// Remove the message from its queue for good.
    pub async fn ack(&self) -> BrokerResult<()> {
        self.acker.ack(self.delivery_tag).await
    }

    /// Reject the message; with `requeue` it returns to the head of its queue.
    pub async fn nack(&self, requeue: bool) -> BrokerResult<()> {
        self.acker.nack(self.delivery_tag, requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("delivery_count", &self.delivery_count)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Stream of deliveries for one consumer. Ends when the channel closes.
pub struct Consumer {
    queue: String,
    rx: mpsc::Receiver<Delivery>,
}

impl Consumer {
    pub fn new(queue: impl Into<String>, rx: mpsc::Receiver<Delivery>) -> Self {
        Self {
            queue: queue.into(),
            rx,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}
