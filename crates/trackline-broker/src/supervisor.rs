//! Connection supervisor.
//!
//! Owns the broker connection. After every successful connect it gives the
//! publisher a new channel (flushing its buffer), then starts every registered
//! consumer on a channel of its own. A publisher channel that fails while the
//! connection stays up is replaced on the same connection. When the connection
//! drops it waits a fixed delay and starts over; fatal protocol errors end the loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{BrokerError, BrokerResult};
use crate::publisher::Publisher;
use crate::traits::{Broker, BrokerConnection, Channel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Stopped => "stopped",
        }
    }
}

/// Something that consumes from the broker and must be rebuilt on every connection.
#[async_trait]
pub trait ConsumerFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Declare queues and begin consuming on `channel`.
    ///
    /// Returns once consumption is registered; delivery handling continues in
    /// the background until the channel closes.
    async fn start(&self, channel: Arc<dyn Channel>) -> BrokerResult<()>;
}

pub struct ConnectionSupervisor {
    broker: Arc<dyn Broker>,
    publisher: Arc<Publisher>,
    consumers: Vec<Arc<dyn ConsumerFactory>>,
    reconnect_delay: Duration,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionSupervisor {
    pub fn new(broker: Arc<dyn Broker>, publisher: Arc<Publisher>, reconnect_delay: Duration) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            broker,
            publisher,
            consumers: Vec::new(),
            reconnect_delay,
            state_tx,
        }
    }

    pub fn with_consumer(mut self, consumer: Arc<dyn ConsumerFactory>) -> Self {
        self.consumers.push(consumer);
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
        tracing::debug!(state = state.as_str(), "Broker connection state changed");
    }

    /// Supervise the connection until `cancel` fires or a fatal error occurs.
    pub async fn run(&self, cancel: CancellationToken) -> BrokerResult<()> {
        let result = self.supervise(&cancel).await;
        self.publisher.detach().await;
        self.set_state(ConnectionState::Stopped);
        result
    }

    async fn supervise(&self, cancel: &CancellationToken) -> BrokerResult<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);
            match self.establish().await {
                Ok(conn) => {
                    self.set_state(ConnectionState::Connected);
                    tracing::info!(consumers = self.consumers.len(), "Connected to broker");

                    loop {
                        tokio::select! {
                            reason = conn.closed() => {
                                self.publisher.detach().await;
                                if reason.is_fatal() {
                                    tracing::error!(error = %reason, "Broker closed the connection, not reconnecting");
                                    return Err(reason);
                                }
                                tracing::warn!(error = %reason, "Broker connection lost");
                                break;
                            }
                            _ = self.publisher.channel_lost() => {
                                if let Err(e) = self.reattach_publisher(conn.as_ref()).await {
                                    tracing::warn!(error = %e, "Failed to replace publisher channel, reconnecting");
                                    self.publisher.detach().await;
                                    conn.close().await;
                                    break;
                                }
                            }
                            _ = cancel.cancelled() => {
                                self.publisher.detach().await;
                                conn.close().await;
                                return Ok(());
                            }
                        }
                    }
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "Fatal broker error, not reconnecting");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = self.reconnect_delay.as_millis() as u64,
                        "Broker connection attempt failed"
                    );
                }
            }

            self.set_state(ConnectionState::Reconnecting);
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }

    async fn establish(&self) -> BrokerResult<Arc<dyn BrokerConnection>> {
        let conn = self.broker.connect().await?;

        if let Err(e) = self.start_on(conn.as_ref()).await {
            self.publisher.detach().await;
            conn.close().await;
            return Err(e);
        }
        Ok(conn)
    }

    async fn reattach_publisher(&self, conn: &dyn BrokerConnection) -> BrokerResult<()> {
        let channel = conn.create_channel().await?;
        let flushed = self.publisher.attach(channel).await?;
        tracing::info!(flushed, "Publisher moved to a new channel");
        Ok(())
    }

        async fn start_on(&self, conn: &dyn BrokerConnection) -> BrokerResult<()> {
        let channel = conn.create_channel().await?;
        self.publisher.attach(channel).await?;

        for consumer in &self.consumers {
            let channel = conn.create_channel().await?;
            consumer.start(channel).await.map_err(|e| {
                tracing::warn!(error = %e, consumer = consumer.name(), "Failed to start consumer");
                e
            })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("state", &self.state())
            .field("consumers", &self.consumers.len())
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

/// Wait until the supervisor reports `target`.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionState>,
    target: ConnectionState,
) -> Result<(), BrokerError> {
    rx.wait_for(|state| *state == target)
        .await
        .map(|_| ())
        .map_err(|_| BrokerError::NotConnected)
}
