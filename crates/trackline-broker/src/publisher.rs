//! Job publisher.
//!
//! Publishing never fails the caller because the broker is away: without a
//! live channel, or while older messages are still buffered, the message goes
//! to the [`OfflineBuffer`]. [`Publisher::attach`] drains the buffer in order
//! before any new message is sent. A live channel that rejects a publish is
//! dropped and reported through [`Publisher::channel_lost`], so the owner of
//! the connection can hand over a fresh one.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use trackline_core::models::JobMessage;

use crate::buffer::{BufferedMessage, OfflineBuffer};
use crate::error::BrokerResult;
use crate::traits::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// Held in the offline buffer until the next reconnect.
    Buffered,
}

struct PublisherState {
    channel: Option<Arc<dyn Channel>>,
    declared: HashSet<String>,
    buffer: OfflineBuffer,
}

pub struct Publisher {
    state: Mutex<PublisherState>,
    lost: Notify,
}

impl Publisher {
    pub fn new(buffer: OfflineBuffer) -> Self {
        Self {
            state: Mutex::new(PublisherState {
                channel: None,
                declared: HashSet::new(),
                buffer,
            }),
            lost: Notify::new(),
        }
    }

    /// Publish `job` to the queue of its stage.
    pub async fn publish_job(&self, job: &JobMessage) -> BrokerResult<PublishOutcome> {
        self.publish_to_queue(job.job.queue(), job).await
    }

    #[tracing::instrument(skip(self, message), fields(job = %message.job, track_id = ?message.track_id))]
    pub async fn publish_to_queue(
        &self,
        queue: &str,
        message: &JobMessage,
    ) -> BrokerResult<PublishOutcome> {
        let payload = serde_json::to_value(message)?;
        let mut state = self.state.lock().await;

        if state.buffer.is_empty() {
            if let Some(channel) = state.channel.clone() {
                match send(&mut state.declared, channel.as_ref(), queue, &payload).await {
                    Ok(()) => {
                        tracing::debug!(queue = %queue, "Job published");
                        return Ok(PublishOutcome::Published);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, queue = %queue, "Publish failed, buffering");
                        state.channel = None;
                        self.lost.notify_one();
                    }
                }
            }
        }

        state
            .buffer
            .push(BufferedMessage {
                queue: queue.to_string(),
                payload,
            })
            .await;
        tracing::info!(
            queue = %queue,
            buffered = state.buffer.len(),
            "Broker unavailable, job buffered"
        );
        Ok(PublishOutcome::Buffered)
    }

    /// Adopt a fresh channel, flushing the offline buffer through it first.
    ///
    /// Publishes issued meanwhile wait for the flush. If the flush fails the
    /// unsent entries stay buffered, the publisher stays detached and the error
    /// is returned. Returns the number of flushed messages.
    #[tracing::instrument(skip(self, channel))]
    pub async fn attach(&self, channel: Arc<dyn Channel>) -> BrokerResult<usize> {
        let mut state = self.state.lock().await;
        state.channel = None;
        state.declared.clear();

        let mut flushed = 0;
        let mut failure = None;
        while let Some(entry) = state.buffer.front().cloned() {
            match send(&mut state.declared, channel.as_ref(), &entry.queue, &entry.payload).await {
                Ok(()) => {
                    state.buffer.pop_front();
                    flushed += 1;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if flushed > 0 {
            if let Err(e) = state.buffer.sync().await {
                tracing::warn!(error = %e, "Failed to rewrite publish spool");
            }
        }

        if let Some(e) = failure {
            tracing::warn!(
                error = %e,
                flushed,
                remaining = state.buffer.len(),
                "Buffer flush interrupted"
            );
            return Err(e);
        }

        state.channel = Some(channel);
        tracing::info!(flushed, "Publisher attached");
        Ok(flushed)
    }

    /// Drop the current channel; later publishes are buffered.
    pub async fn detach(&self) {
        let mut state = self.state.lock().await;
        if state.channel.take().is_some() {
            tracing::info!("Publisher detached");
        }
    }

    /// Resolves after a publish on the attached channel failed and the channel
    /// was dropped. A loss that happens with nobody waiting is kept for the
    /// next caller.
    pub async fn channel_lost(&self) {
        self.lost.notified().await
    }

    pub async fn is_attached(&self) -> bool {
        self.state.lock().await.channel.is_some()
    }

    pub async fn buffered(&self) -> usize {
        self.state.lock().await.buffer.len()
    }
}

async fn send(
    declared: &mut HashSet<String>,
    channel: &dyn Channel,
    queue: &str,
    payload: &serde_json::Value,
) -> BrokerResult<()> {
    if !declared.contains(queue) {
        channel.assert_queue(queue).await?;
        declared.insert(queue.to_string());
    }
    channel.publish(queue, serde_json::to_vec(payload)?).await
}
