//! Pipeline assembly: one orchestrator per stage queue sharing a worker pool,
//! all registered with the connection supervisor.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use trackline_broker::{Broker, BrokerResult, ConnectionSupervisor, Publisher};
use trackline_core::models::StageKind;
use trackline_core::Config;
use trackline_infra::Notifier;

use crate::orchestrator::Orchestrator;
use crate::pool::WorkerPool;
use crate::registry::{StageContext, StageRegistry};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub pool_size: usize,
    pub job_timeout: Duration,
    pub heavy_prefetch: u16,
    pub light_prefetch: u16,
    pub reconnect_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            job_timeout: Duration::from_secs(3600),
            heavy_prefetch: 1,
            light_prefetch: 4,
            reconnect_delay: Duration::from_secs(5),
            retry: RetryPolicy::NoRetry,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pool_size: config.worker_pool_size(),
            job_timeout: Duration::from_secs(config.worker_job_timeout_secs()),
            heavy_prefetch: config.heavy_queue_prefetch(),
            light_prefetch: config.light_queue_prefetch(),
            reconnect_delay: Duration::from_millis(config.broker_reconnect_delay_ms()),
            retry: RetryPolicy::NoRetry,
        }
    }
}

pub struct Pipeline {
    supervisor: Arc<ConnectionSupervisor>,
    publisher: Arc<Publisher>,
    tracker: TaskTracker,
    consume_cancel: CancellationToken,
    supervisor_cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        broker: Arc<dyn Broker>,
        publisher: Arc<Publisher>,
        notifier: Notifier,
        ctx: StageContext,
        registry: StageRegistry,
        settings: PipelineSettings,
    ) -> Self {
        let pool = Arc::new(WorkerPool::new(settings.pool_size, settings.job_timeout));
        let registry = Arc::new(registry);
        let tracker = TaskTracker::new();
        let consume_cancel = CancellationToken::new();

        let mut supervisor =
            ConnectionSupervisor::new(broker, publisher.clone(), settings.reconnect_delay);
        for stage in StageKind::ALL {
            let prefetch = if stage.is_heavy() {
                settings.heavy_prefetch
            } else {
                settings.light_prefetch
            };
            let orchestrator = Orchestrator::new(
                stage,
                prefetch,
                registry.clone(),
                ctx.clone(),
                pool.clone(),
                publisher.clone(),
                notifier.clone(),
                tracker.clone(),
                consume_cancel.clone(),
            )
            .with_retry_policy(settings.retry);
            supervisor = supervisor.with_consumer(Arc::new(orchestrator));
        }

        tracing::info!(
            pool_size = pool.size(),
            heavy_prefetch = settings.heavy_prefetch,
            light_prefetch = settings.light_prefetch,
            "Pipeline assembled"
        );

        Self {
            supervisor: Arc::new(supervisor),
            publisher,
            tracker,
            consume_cancel,
            supervisor_cancel: CancellationToken::new(),
        }
    }

    /// Start supervising the broker connection in the background.
    pub fn start(&self) -> JoinHandle<BrokerResult<()>> {
        let supervisor = self.supervisor.clone();
        let cancel = self.supervisor_cancel.clone();
        tokio::spawn(async move {
            let result = supervisor.run(cancel).await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "Broker supervisor stopped");
            }
            result
        })
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    /// Stop taking deliveries, wait up to `grace` for in-flight jobs, then
    /// close the broker connection. Unfinished jobs stay unacked and are
    /// redelivered after restart.
    pub async fn shutdown(&self, grace: Duration) {
        tracing::info!(grace_secs = grace.as_secs(), "Pipeline shutting down");
        self.consume_cancel.cancel();
        self.tracker.close();

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                in_flight = self.tracker.len(),
                "In-flight jobs did not finish within the grace period"
            );
        }
        self.supervisor_cancel.cancel();
    }
}
