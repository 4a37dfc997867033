//! Per-queue orchestrator.
//!
//! Pulls deliveries from one queue (at most `prefetch` unacked at a time),
//! runs each on the worker pool, forwards progress to the notifier, publishes
//! next-stage jobs, and acks or nacks once the terminal outcome arrives.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use trackline_broker::{BrokerResult, Channel, ConsumerFactory, Consumer, Delivery, Publisher};
use trackline_core::models::event::RELEASE_DOWNLOAD;
use trackline_core::models::{JobMessage, ProgressEvent, StageKind, TrackStatus, WorkerOutcome};
use trackline_infra::Notifier;

use crate::pool::WorkerPool;
use crate::registry::{StageContext, StageRegistry};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::stages::guard::is_tombstoned;

pub struct Orchestrator {
    stage: StageKind,
    prefetch: u16,
    retry: RetryPolicy,
    registry: Arc<StageRegistry>,
    ctx: StageContext,
    pool: Arc<WorkerPool>,
    publisher: Arc<Publisher>,
    notifier: Notifier,
    tracker: TaskTracker,
    cancel: CancellationToken,
    name: String,
}

#[derive(Clone)]
struct Shared {
    retry: RetryPolicy,
    registry: Arc<StageRegistry>,
    ctx: StageContext,
    pool: Arc<WorkerPool>,
    publisher: Arc<Publisher>,
    notifier: Notifier,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stage: StageKind,
        prefetch: u16,
        registry: Arc<StageRegistry>,
        ctx: StageContext,
        pool: Arc<WorkerPool>,
        publisher: Arc<Publisher>,
        notifier: Notifier,
        tracker: TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stage,
            prefetch,
            retry: RetryPolicy::NoRetry,
            registry,
            ctx,
            pool,
            publisher,
            notifier,
            tracker,
            cancel,
            name: format!("orchestrator:{}", stage.queue()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn stage(&self) -> StageKind {
        self.stage
    }

    pub fn prefetch(&self) -> u16 {
        self.prefetch
    }

    fn shared(&self) -> Shared {
        Shared {
            retry: self.retry,
            registry: self.registry.clone(),
            ctx: self.ctx.clone(),
            pool: self.pool.clone(),
            publisher: self.publisher.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

#[async_trait]
impl ConsumerFactory for Orchestrator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, channel: Arc<dyn Channel>) -> BrokerResult<()> {
        let queue = self.stage.queue();
        channel.assert_queue(queue).await?;
        let consumer = channel.consume(queue, self.prefetch).await?;
        tracing::info!(queue, prefetch = self.prefetch, "Consumer started");

        let shared = self.shared();
        let tracker = self.tracker.clone();
        let cancel = self.cancel.clone();
        self.tracker.spawn(consume_loop(consumer, shared, tracker, cancel));
        Ok(())
    }
}

async fn consume_loop(
    mut consumer: Consumer,
    shared: Shared,
    tracker: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(queue = consumer.queue(), "Consumer stopping, no new deliveries");
                break;
            }
            delivery = consumer.next() => match delivery {
                Some(delivery) => {
                    tracker.spawn(handle_delivery(delivery, shared.clone()));
                }
                None => {
                    tracing::debug!(queue = consumer.queue(), "Channel closed, consumer ended");
                    break;
                }
            }
        }
    }
}

async fn handle_delivery(delivery: Delivery, shared: Shared) {
    let job = match JobMessage::decode(&delivery.payload) {
        Ok(job) => job,
        Err(e) => {
            tracing::warn!(error = %e, delivery_tag = delivery.delivery_tag, "Dropping undecodable job");
            if let Err(e) = delivery.nack(false).await {
                tracing::warn!(error = %e, "Failed to nack delivery");
            }
            return;
        }
    };

    let span = tracing::info_span!(
        "job",
        job = %job.job,
        track_id = ?job.track_id,
        release_id = %job.release_id,
        attempt = delivery.delivery_count,
    );
    run_job(delivery, job, shared).instrument(span).await;
}

async fn run_job(delivery: Delivery, job: JobMessage, shared: Shared) {
    let handler = shared.registry.handler(job.job);
    let mut outcomes = shared.pool.submit(handler, shared.ctx.clone(), job.clone()).await;

    let (message, recoverable) = loop {
        match outcomes.recv().await {
            Some(WorkerOutcome::Progress(progress)) => {
                shared
                    .notifier
                    .send(job.user_id, ProgressEvent::from_progress(&job, &progress));
            }
            Some(WorkerOutcome::EnqueueNextStage { job: next }) => {
                if let Err(e) = shared.publisher.publish_job(&next).await {
                    break (format!("Failed to publish {} job: {}", next.job, e), true);
                }
            }
            Some(WorkerOutcome::StageComplete { .. }) => {
                tracing::info!("Job completed");
                if let Err(e) = delivery.ack().await {
                    tracing::warn!(error = %e, "Failed to ack delivery, it will be redelivered");
                }
                return;
            }
            Some(WorkerOutcome::StageError {
                message,
                recoverable,
                ..
            }) => break (message, recoverable),
            None => break ("Worker ended without reporting an outcome".to_string(), false),
        }
    };

    fail_job(&delivery, &job, &shared, &message, recoverable).await;
}

async fn fail_job(
    delivery: &Delivery,
    job: &JobMessage,
    shared: &Shared,
    message: &str,
    recoverable: bool,
) {
    if let RetryDecision::Requeue { after } = shared.retry.decide(recoverable, delivery.delivery_count) {
        tracing::warn!(
            error = %message,
            retry_in_ms = after.as_millis() as u64,
            "Job failed, requeueing"
        );
        tokio::time::sleep(after).await;
        if let Err(e) = delivery.nack(true).await {
            tracing::warn!(error = %e, "Failed to requeue delivery");
        }
        return;
    }

    tracing::error!(error = %message, recoverable, "Job failed");

    match job.track_id {
        Some(track_id) => match shared.ctx.store.transition(track_id, TrackStatus::Error).await {
            Ok(_) => {
                shared.notifier.send(
                    job.user_id,
                    ProgressEvent::error(job.user_id, job.release_id, track_id, message),
                );
                shared.notifier.send(
                    job.user_id,
                    ProgressEvent::status(job.user_id, job.release_id, track_id, TrackStatus::Error),
                );
            }
            Err(e) if is_tombstoned(&e) => {
                tracing::info!(track_id = %track_id, "Failed job's track was deleted");
            }
            Err(e) => {
                tracing::warn!(track_id = %track_id, error = %e, "Could not mark track as failed");
            }
        },
        None => {
            shared.notifier.send(
                job.user_id,
                ProgressEvent::new(
                    job.user_id,
                    RELEASE_DOWNLOAD,
                    json!({ "releaseId": job.release_id, "error": message }),
                ),
            );
        }
    }

    if let Err(e) = delivery.nack(false).await {
        tracing::warn!(error = %e, "Failed to nack delivery");
    }
}
