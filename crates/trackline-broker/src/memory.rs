//! In-process broker with durable queues.
//!
//! Queue contents outlive connections: when a connection goes away, every
//! message it had in flight returns to the head of its queue, in delivery
//! order, and is marked redelivered. `shutdown`, `restore` and `force_close`
//! simulate broker outages.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::error::{BrokerError, BrokerResult};
use crate::traits::{Acker, Broker, BrokerConnection, Channel, Consumer, Delivery};

/// Buffer of a consumer without a prefetch limit.
const UNBOUNDED_CONSUMER_BUFFER: usize = 64;

#[derive(Debug, Clone)]
enum CloseReason {
    Lost(String),
    Forced { code: u16, reason: String },
}

impl CloseReason {
    fn into_error(self) -> BrokerError {
        match self {
            CloseReason::Lost(reason) => BrokerError::ConnectionLost(reason),
            CloseReason::Forced { code, reason } => BrokerError::ConnectionClosed { code, reason },
        }
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    delivery_count: u32,
}

struct ConsumerSlot {
    queue: String,
    prefetch: usize,
    in_flight: usize,
    connection_id: u64,
}

struct Unacked {
    queue: String,
    message: StoredMessage,
    consumer_id: u64,
    connection_id: u64,
}

enum Step {
    Deliver(Delivery),
    Wait,
    Stop,
}

struct State {
    online: bool,
    queues: HashMap<String, VecDeque<StoredMessage>>,
    /// `None` while open, the close reason afterwards.
    connections: HashMap<u64, Option<CloseReason>>,
    consumers: HashMap<u64, ConsumerSlot>,
    unacked: BTreeMap<u64, Unacked>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn is_open(&self, connection_id: u64) -> bool {
        matches!(self.connections.get(&connection_id), Some(None))
    }

    fn close_connection(&mut self, connection_id: u64, reason: CloseReason) {
        let Some(slot) = self.connections.get_mut(&connection_id) else {
            return;
        };
        if slot.is_some() {
            return;
        }
        *slot = Some(reason);

        let tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.connection_id == connection_id)
            .map(|(tag, _)| *tag)
            .collect();
        for tag in tags.into_iter().rev() {
            if let Some(unacked) = self.unacked.remove(&tag) {
                self.queues
                    .entry(unacked.queue)
                    .or_default()
                    .push_front(unacked.message);
            }
        }

        self.consumers
            .retain(|_, consumer| consumer.connection_id != connection_id);
    }

    fn close_all(&mut self, reason: CloseReason) {
        let open: Vec<u64> = self
            .connections
            .iter()
            .filter(|(_, r)| r.is_none())
            .map(|(id, _)| *id)
            .collect();
        for id in open {
            self.close_connection(id, reason.clone());
        }
    }
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wake(&self) {
        self.notify.notify_waiters();
    }

    fn next_step(&self, consumer_id: u64, acker: &Arc<dyn Acker>) -> Step {
        let mut state = self.lock();

        let (queue, connection_id) = match state.consumers.get(&consumer_id) {
            None => return Step::Stop,
            Some(slot) if slot.in_flight >= slot.prefetch => return Step::Wait,
            Some(slot) => (slot.queue.clone(), slot.connection_id),
        };

        let Some(mut message) = state.queues.get_mut(&queue).and_then(|q| q.pop_front()) else {
            return Step::Wait;
        };
        message.delivery_count += 1;

        let tag = state.next_id();
        if let Some(slot) = state.consumers.get_mut(&consumer_id) {
            slot.in_flight += 1;
        }
        state.unacked.insert(
            tag,
            Unacked {
                queue,
                message: message.clone(),
                consumer_id,
                connection_id,
            },
        );

        Step::Deliver(Delivery::new(
            message.payload,
            tag,
            message.delivery_count,
            acker.clone(),
        ))
    }

    fn settle(&self, delivery_tag: u64, requeue: bool) -> BrokerResult<()> {
        {
            let mut state = self.lock();
            let unacked = state
                .unacked
                .remove(&delivery_tag)
                .ok_or(BrokerError::UnknownDelivery(delivery_tag))?;

            if let Some(consumer) = state.consumers.get_mut(&unacked.consumer_id) {
                consumer.in_flight = consumer.in_flight.saturating_sub(1);
            }
            if requeue {
                state
                    .queues
                    .entry(unacked.queue)
                    .or_default()
                    .push_front(unacked.message);
            }
        }
        self.wake();
        Ok(())
    }

    fn remove_consumer(&self, consumer_id: u64) {
        self.lock().consumers.remove(&consumer_id);
    }
}

/// Durable in-process broker.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    online: true,
                    queues: HashMap::new(),
                    connections: HashMap::new(),
                    consumers: HashMap::new(),
                    unacked: BTreeMap::new(),
                    next_id: 0,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Take the broker down: open connections drop and new ones are refused.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.lock();
            state.online = false;
            state.close_all(CloseReason::Lost("broker shut down".to_string()));
        }
        tracing::warn!("Memory broker shut down");
        self.inner.wake();
    }

    pub fn restore(&self) {
        self.inner.lock().online = true;
        tracing::info!("Memory broker restored");
        self.inner.wake();
    }

    /// Close every open connection with a protocol reply code, leaving the broker up.
    pub fn force_close(&self, code: u16, reason: &str) {
        self.inner.lock().close_all(CloseReason::Forced {
            code,
            reason: reason.to_string(),
        });
        self.inner.wake();
    }

    pub fn is_online(&self) -> bool {
        self.inner.lock().online
    }

    /// Messages waiting in `queue`, not counting unacked deliveries.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.inner.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn unacked_count(&self) -> usize {
        self.inner.lock().unacked.len()
    }

    /// Payloads waiting in `queue`, head first.
    pub fn peek_messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .queues
            .get(queue)
            .map(|q| q.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> BrokerResult<Arc<dyn BrokerConnection>> {
        let mut state = self.inner.lock();
        if !state.online {
            return Err(BrokerError::ConnectionRefused(
                "broker is not accepting connections".to_string(),
            ));
        }
        let id = state.next_id();
        state.connections.insert(id, None);
        tracing::debug!(connection_id = id, "Memory broker connection opened");

        Ok(Arc::new(MemoryConnection {
            inner: self.inner.clone(),
            id,
        }))
    }
}

struct MemoryConnection {
    inner: Arc<Inner>,
    id: u64,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn create_channel(&self) -> BrokerResult<Arc<dyn Channel>> {
        if !self.inner.lock().is_open(self.id) {
            return Err(BrokerError::NotConnected);
        }
        Ok(Arc::new(MemoryChannel {
            inner: self.inner.clone(),
            connection_id: self.id,
        }))
    }

    async fn closed(&self) -> BrokerError {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let reason = self.inner.lock().connections.get(&self.id).cloned();
            match reason {
                Some(Some(reason)) => return reason.into_error(),
                Some(None) => {}
                None => return BrokerError::NotConnected,
            }

            notified.await;
        }
    }

    fn is_open(&self) -> bool {
        self.inner.lock().is_open(self.id)
    }

    async fn close(&self) {
        self.inner
            .lock()
            .close_connection(self.id, CloseReason::Lost("closed by client".to_string()));
        self.inner.wake();
    }
}

struct MemoryChannel {
    inner: Arc<Inner>,
    connection_id: u64,
}

impl MemoryChannel {
    fn ensure_open(&self, state: &State) -> BrokerResult<()> {
        if state.is_open(self.connection_id) {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed)
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn assert_queue(&self, queue: &str) -> BrokerResult<()> {
        let mut state = self.inner.lock();
        self.ensure_open(&state)?;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> BrokerResult<()> {
        {
            let mut state = self.inner.lock();
            self.ensure_open(&state)?;
            let messages = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
            messages.push_back(StoredMessage {
                payload,
                delivery_count: 0,
            });
        }
        self.inner.wake();
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> BrokerResult<Consumer> {
        let consumer_id = {
            let mut state = self.inner.lock();
            self.ensure_open(&state)?;
            if !state.queues.contains_key(queue) {
                return Err(BrokerError::QueueNotFound(queue.to_string()));
            }
            let id = state.next_id();
            state.consumers.insert(
                id,
                ConsumerSlot {
                    queue: queue.to_string(),
                    prefetch: if prefetch == 0 {
                        usize::MAX
                    } else {
                        prefetch as usize
                    },
                    in_flight: 0,
                    connection_id: self.connection_id,
                },
            );
            id
        };

        let capacity = if prefetch == 0 {
            UNBOUNDED_CONSUMER_BUFFER
        } else {
            prefetch as usize
        };
        let (tx, rx) = mpsc::channel(capacity);
        let acker: Arc<dyn Acker> = Arc::new(MemoryAcker {
            inner: self.inner.clone(),
        });
        tokio::spawn(dispatch(self.inner.clone(), consumer_id, tx, acker));

        tracing::debug!(queue = %queue, prefetch, consumer_id, "Consumer registered");
        Ok(Consumer::new(queue, rx))
    }
}

async fn dispatch(
    inner: Arc<Inner>,
    consumer_id: u64,
    tx: mpsc::Sender<Delivery>,
    acker: Arc<dyn Acker>,
) {
    loop {
        let notified = inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match inner.next_step(consumer_id, &acker) {
            Step::Deliver(delivery) => {
                if let Err(mpsc::error::SendError(delivery)) = tx.send(delivery).await {
                    // Consumer went away before seeing it
                    let _ = inner.settle(delivery.delivery_tag, true);
                    break;
                }
            }
            Step::Wait => {
                tokio::select! {
                    _ = &mut notified => {}
                    _ = tx.closed() => break,
                }
            }
            Step::Stop => break,
        }
    }

    inner.remove_consumer(consumer_id);
}

struct MemoryAcker {
    inner: Arc<Inner>,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self, delivery_tag: u64) -> BrokerResult<()> {
        self.inner.settle(delivery_tag, false)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> BrokerResult<()> {
        self.inner.settle(delivery_tag, requeue)
    }
}
