use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use trackline_broker::{
    wait_for_state, Broker, BrokerConnection, BrokerError, BrokerResult, Channel, ConnectionState,
    ConnectionSupervisor, Consumer, ConsumerFactory, MemoryBroker, OfflineBuffer, Publisher,
    PublishOutcome, CONNECTION_FORCED,
};
use trackline_core::models::{JobMessage, StageKind};
use uuid::Uuid;

const DELAY: Duration = Duration::from_millis(20);
const WAIT: Duration = Duration::from_secs(5);

/// Forwards every delivery's track name to a channel and acks it.
struct RecordingConsumer {
    starts: AtomicUsize,
    seen: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl ConsumerFactory for RecordingConsumer {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self, channel: Arc<dyn Channel>) -> BrokerResult<()> {
        let queue = StageKind::StoreSource.queue();
        channel.assert_queue(queue).await?;
        let mut consumer = channel.consume(queue, 1).await?;
        self.starts.fetch_add(1, Ordering::SeqCst);

        let seen = self.seen.clone();
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let job = JobMessage::decode(&delivery.payload).unwrap();
                let _ = seen.send(job.track_name.unwrap_or_default());
                let _ = delivery.ack().await;
            }
        });
        Ok(())
    }
}

fn job(name: &str) -> JobMessage {
    JobMessage::for_track(
        StageKind::StoreSource,
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        Some(name.to_string()),
        None,
    )
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_messages_published_during_outage_arrive_in_order() {
    let broker = MemoryBroker::new();
    let publisher = Arc::new(Publisher::new(OfflineBuffer::in_memory()));
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let consumer = Arc::new(RecordingConsumer {
        starts: AtomicUsize::new(0),
        seen: seen_tx,
    });

    let supervisor = Arc::new(
        ConnectionSupervisor::new(Arc::new(broker.clone()), publisher.clone(), DELAY)
            .with_consumer(consumer.clone()),
    );
    let mut state = supervisor.subscribe_state();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let supervisor = supervisor.clone();
        let cancel = cancel.clone();
        async move { supervisor.run(cancel).await }
    });

    tokio::time::timeout(WAIT, wait_for_state(&mut state, ConnectionState::Connected))
        .await
        .unwrap()
        .unwrap();

    broker.shutdown();
    tokio::time::timeout(WAIT, wait_for_state(&mut state, ConnectionState::Reconnecting))
        .await
        .unwrap()
        .unwrap();

    for name in ["1", "2", "3"] {
        let outcome = publisher.publish_job(&job(name)).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Buffered);
    }

    broker.restore();
    tokio::time::timeout(WAIT, wait_for_state(&mut state, ConnectionState::Connected))
        .await
        .unwrap()
        .unwrap();

    let received = vec![
        recv(&mut seen_rx).await,
        recv(&mut seen_rx).await,
        recv(&mut seen_rx).await,
    ];
    assert_eq!(received, vec!["1", "2", "3"]);
    assert_eq!(consumer.starts.load(Ordering::SeqCst), 2);
    assert_eq!(publisher.buffered().await, 0);

    cancel.cancel();
    handle.await.unwrap().unwrap();
    assert_eq!(supervisor.state(), ConnectionState::Stopped);
}

#[tokio::test]
async fn test_connection_forced_stops_supervisor() {
    let broker = MemoryBroker::new();
    let publisher = Arc::new(Publisher::new(OfflineBuffer::in_memory()));
    let supervisor = Arc::new(ConnectionSupervisor::new(
        Arc::new(broker.clone()),
        publisher.clone(),
        DELAY,
    ));
    let mut state = supervisor.subscribe_state();

    let handle = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run(CancellationToken::new()).await }
    });
    tokio::time::timeout(WAIT, wait_for_state(&mut state, ConnectionState::Connected))
        .await
        .unwrap()
        .unwrap();

    broker.force_close(CONNECTION_FORCED, "operator shutdown");

    let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(result.unwrap_err().is_fatal());
    assert_eq!(supervisor.state(), ConnectionState::Stopped);
    assert!(!publisher.is_attached().await);
}

/// Broker whose first channel on every connection starts rejecting publishes
/// once `broken` is set, while the connection itself stays up.
#[derive(Clone)]
struct BreakableBroker {
    inner: MemoryBroker,
    broken: Arc<AtomicBool>,
}

struct BreakableConnection {
    inner: Arc<dyn BrokerConnection>,
    broken: Arc<AtomicBool>,
    channels: AtomicUsize,
}

struct BreakableChannel {
    inner: Arc<dyn Channel>,
    broken: Arc<AtomicBool>,
}

#[async_trait]
impl Broker for BreakableBroker {
    async fn connect(&self) -> BrokerResult<Arc<dyn BrokerConnection>> {
        Ok(Arc::new(BreakableConnection {
            inner: self.inner.connect().await?,
            broken: self.broken.clone(),
            channels: AtomicUsize::new(0),
        }))
    }
}

#[async_trait]
impl BrokerConnection for BreakableConnection {
    async fn create_channel(&self) -> BrokerResult<Arc<dyn Channel>> {
        let channel = self.inner.create_channel().await?;
        if self.channels.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(Arc::new(BreakableChannel {
                inner: channel,
                broken: self.broken.clone(),
            }));
        }
        Ok(channel)
    }

    async fn closed(&self) -> BrokerError {
        self.inner.closed().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

#[async_trait]
impl Channel for BreakableChannel {
    async fn assert_queue(&self, queue: &str) -> BrokerResult<()> {
        self.inner.assert_queue(queue).await
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> BrokerResult<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(BrokerError::ChannelClosed);
        }
        self.inner.publish(queue, payload).await
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> BrokerResult<Consumer> {
        self.inner.consume(queue, prefetch).await
    }
}

#[tokio::test]
async fn test_failed_publisher_channel_is_replaced_on_live_connection() {
    let broker = BreakableBroker {
        inner: MemoryBroker::new(),
        broken: Arc::new(AtomicBool::new(false)),
    };
    let publisher = Arc::new(Publisher::new(OfflineBuffer::in_memory()));
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let consumer = Arc::new(RecordingConsumer {
        starts: AtomicUsize::new(0),
        seen: seen_tx,
    });

    let supervisor = Arc::new(
        ConnectionSupervisor::new(Arc::new(broker.clone()), publisher.clone(), DELAY)
            .with_consumer(consumer.clone()),
    );
    let mut state = supervisor.subscribe_state();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let supervisor = supervisor.clone();
        let cancel = cancel.clone();
        async move { supervisor.run(cancel).await }
    });
    tokio::time::timeout(WAIT, wait_for_state(&mut state, ConnectionState::Connected))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(publisher.publish_job(&job("1")).await.unwrap(), PublishOutcome::Published);
    assert_eq!(recv(&mut seen_rx).await, "1");

    broker.broken.store(true, Ordering::SeqCst);
    assert_eq!(publisher.publish_job(&job("2")).await.unwrap(), PublishOutcome::Buffered);
    assert_eq!(recv(&mut seen_rx).await, "2");

    let deadline = tokio::time::Instant::now() + WAIT;
    while !publisher.is_attached().await {
        assert!(tokio::time::Instant::now() < deadline, "publisher never reattached");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(publisher.publish_job(&job("3")).await.unwrap(), PublishOutcome::Published);
    assert_eq!(recv(&mut seen_rx).await, "3");

    assert_eq!(publisher.buffered().await, 0);
    assert_eq!(consumer.starts.load(Ordering::SeqCst), 1);
    assert_eq!(supervisor.state(), ConnectionState::Connected);

    cancel.cancel();
    handle.await.unwrap().unwrap();
}
