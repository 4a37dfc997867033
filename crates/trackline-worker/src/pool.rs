//! Bounded worker pool.
//!
//! Each job runs on its own Tokio task while holding one pool permit. A stage
//! that returns an error, panics or overruns the job timeout still produces a
//! terminal outcome, so the orchestrator always learns how a job ended.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use trackline_core::models::{JobMessage, Progress, WorkerOutcome};

use crate::registry::{StageContext, StageHandler};

/// Handle a running stage uses to stream non-terminal outcomes.
#[derive(Clone)]
pub struct OutcomeSender {
    tx: mpsc::UnboundedSender<WorkerOutcome>,
}

impl OutcomeSender {
    pub fn progress(&self, progress: Progress) {
        let _ = self.tx.send(WorkerOutcome::Progress(progress));
    }

    /// Ask the orchestrator to publish `job` once this stage's work is stored.
    pub fn enqueue_next(&self, job: JobMessage) {
        let _ = self.tx.send(WorkerOutcome::EnqueueNextStage { job });
    }
}

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
    job_timeout: Duration,
}

impl WorkerPool {
    pub fn new(size: usize, job_timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            job_timeout,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a free slot, start `handler` on `job`, and return its outcome stream.
    ///
    /// The stream yields zero or more progress and enqueue-next outcomes followed
    /// by exactly one terminal outcome.
    pub async fn submit(
        &self,
        handler: Arc<dyn StageHandler>,
        ctx: StageContext,
        job: JobMessage,
    ) -> mpsc::UnboundedReceiver<WorkerOutcome> {
        let (tx, rx) = mpsc::unbounded_channel();
        let stage = handler.kind();

        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let _ = tx.send(WorkerOutcome::StageError {
                    stage,
                    message: "Worker pool is closed".to_string(),
                    recoverable: true,
                });
                return rx;
            }
        };

        let job_timeout = self.job_timeout;
        tokio::spawn(async move {
            let _permit = permit;
            let outcomes = OutcomeSender { tx: tx.clone() };

            let worker = tokio::spawn(async move { handler.run(&ctx, &job, &outcomes).await });
            let abort = worker.abort_handle();

            let terminal = match tokio::time::timeout(job_timeout, worker).await {
                Ok(Ok(Ok(()))) => WorkerOutcome::StageComplete { stage },
                Ok(Ok(Err(e))) => WorkerOutcome::StageError {
                    stage,
                    message: e.message(),
                    recoverable: e.is_recoverable(),
                },
                Ok(Err(join_err)) if join_err.is_panic() => {
                    let message = panic_message(join_err.into_panic());
                    tracing::error!(stage = %stage, panic = %message, "Stage panicked");
                    WorkerOutcome::StageError {
                        stage,
                        message: format!("Stage panicked: {}", message),
                        recoverable: false,
                    }
                }
                Ok(Err(_)) => WorkerOutcome::StageError {
                    stage,
                    message: "Stage was cancelled".to_string(),
                    recoverable: true,
                },
                Err(_) => {
                    abort.abort();
                    tracing::error!(
                        stage = %stage,
                        timeout_secs = job_timeout.as_secs(),
                        "Stage timed out"
                    );
                    WorkerOutcome::StageError {
                        stage,
                        message: format!("Stage timed out after {}s", job_timeout.as_secs()),
                        recoverable: true,
                    }
                }
            };

            let _ = tx.send(terminal);
        });

        rx
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trackline_core::models::StageKind;
    use trackline_core::{StageError, TrackStore};
    use uuid::Uuid;

    use crate::registry::StageHandler;

    struct Scripted {
        behaviour: &'static str,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StageHandler for Scripted {
        fn kind(&self) -> StageKind {
            StageKind::EncodeLossless
        }

        async fn run(
            &self,
            _ctx: &StageContext,
            job: &JobMessage,
            outcomes: &OutcomeSender,
        ) -> Result<(), StageError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            outcomes.progress(Progress::text("working"));

            let result = match self.behaviour {
                "ok" => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    if let Some(next) = job.next_stage("key") {
                        outcomes.enqueue_next(next);
                    }
                    Ok(())
                }
                "fail" => Err(StageError::unrecoverable(anyhow::anyhow!("bad input"))),
                "panic" => panic!("encoder state corrupted"),
                _ => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            };
            self.running.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn handler(behaviour: &'static str) -> (Arc<dyn StageHandler>, Arc<AtomicUsize>) {
        let peak = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Scripted {
            behaviour,
            running: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        });
        (handler, peak)
    }

    fn ctx() -> StageContext {
        let store: Arc<dyn TrackStore> = Arc::new(trackline_db::InMemoryTrackStore::new());
        StageContext {
            store,
            storage: Arc::new(NullStorage),
            transcoder: Arc::new(NullTranscoder),
            work_dir: std::env::temp_dir(),
        }
    }

    fn job() -> JobMessage {
        JobMessage::for_track(
            StageKind::EncodeLossless,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            None,
        )
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<WorkerOutcome>) -> Vec<WorkerOutcome> {
        let mut all = Vec::new();
        while let Some(outcome) = rx.recv().await {
            all.push(outcome);
        }
        all
    }

    #[tokio::test]
    async fn test_success_streams_progress_then_exactly_one_terminal() {
        let pool = WorkerPool::new(2, Duration::from_secs(5));
        let (handler, _) = handler("ok");
        let outcomes = drain(pool.submit(handler, ctx(), job()).await).await;

        assert!(matches!(outcomes[0], WorkerOutcome::Progress(_)));
        assert!(matches!(outcomes[1], WorkerOutcome::EnqueueNextStage { .. }));
        assert_eq!(outcomes.iter().filter(|o| o.is_terminal()).count(), 1);
        assert!(matches!(
            outcomes.last(),
            Some(WorkerOutcome::StageComplete { stage: StageKind::EncodeLossless })
        ));
    }

    #[tokio::test]
    async fn test_stage_error_keeps_recoverability() {
        let pool = WorkerPool::new(1, Duration::from_secs(5));
        let (handler, _) = handler("fail");
        let outcomes = drain(pool.submit(handler, ctx(), job()).await).await;

        match outcomes.last() {
            Some(WorkerOutcome::StageError { message, recoverable, .. }) => {
                assert!(message.contains("bad input"));
                assert!(!recoverable);
            }
            other => panic!("unexpected terminal outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_unrecoverable_error() {
        let pool = WorkerPool::new(1, Duration::from_secs(5));
        let (handler, _) = handler("panic");
        let outcomes = drain(pool.submit(handler, ctx(), job()).await).await;

        match outcomes.last().unwrap() {
            WorkerOutcome::StageError { message, recoverable, .. } => {
                assert!(message.contains("encoder state corrupted"));
                assert!(!recoverable);
            }
            other => panic!("unexpected terminal outcome: {:?}", other),
        }
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_timeout_becomes_recoverable_error() {
        let pool = WorkerPool::new(1, Duration::from_millis(50));
        let (handler, _) = handler("hang");
        let outcomes = drain(pool.submit(handler, ctx(), job()).await).await;

        assert!(matches!(
            outcomes.last(),
            Some(WorkerOutcome::StageError { recoverable: true, .. })
        ));
    }

    #[tokio::test]
    async fn test_pool_size_bounds_concurrency() {
        let pool = Arc::new(WorkerPool::new(2, Duration::from_secs(5)));
        let (handler, peak) = handler("ok");

        let mut receivers = Vec::new();
        for _ in 0..6 {
            receivers.push(pool.submit(handler.clone(), ctx(), job()).await);
        }
        for rx in receivers {
            drain(rx).await;
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    struct NullStorage;

    #[async_trait]
    impl trackline_storage::Storage for NullStorage {
        async fn upload_with_key(&self, k: &str, _: Vec<u8>, _: &str) -> trackline_storage::StorageResult<String> {
            Ok(k.to_string())
        }
        async fn upload_file(&self, k: &str, _: &std::path::Path, _: &str) -> trackline_storage::StorageResult<String> {
            Ok(k.to_string())
        }
        async fn download(&self, k: &str) -> trackline_storage::StorageResult<Vec<u8>> {
            Err(trackline_storage::StorageError::NotFound(k.to_string()))
        }
        async fn download_to_file(&self, k: &str, _: &std::path::Path) -> trackline_storage::StorageResult<u64> {
            Err(trackline_storage::StorageError::NotFound(k.to_string()))
        }
        async fn delete(&self, _: &str) -> trackline_storage::StorageResult<()> {
            Ok(())
        }
        async fn delete_prefix(&self, _: &str) -> trackline_storage::StorageResult<usize> {
            Ok(0)
        }
        async fn exists(&self, _: &str) -> trackline_storage::StorageResult<bool> {
            Ok(false)
        }
        fn backend_type(&self) -> trackline_storage::StorageBackend {
            trackline_storage::StorageBackend::Local
        }
    }

    struct NullTranscoder;

    #[async_trait]
    impl trackline_processing::Transcoder for NullTranscoder {
        async fn probe_duration(
            &self,
            src: &std::path::Path,
        ) -> Result<trackline_processing::AudioMetadata, trackline_processing::TranscodeError> {
            Err(trackline_processing::TranscodeError::Probe(src.display().to_string()))
        }
        async fn encode_lossless(
            &self,
            _: &std::path::Path,
            _: &std::path::Path,
            _: Option<f64>,
            _: trackline_processing::ProgressFn<'_>,
        ) -> Result<(), trackline_processing::TranscodeError> {
            Ok(())
        }
        async fn encode_streaming_fragment(
            &self,
            _: &std::path::Path,
            _: &std::path::Path,
            _: Option<f64>,
            _: trackline_processing::ProgressFn<'_>,
        ) -> Result<(), trackline_processing::TranscodeError> {
            Ok(())
        }
        async fn encode_download(
            &self,
            _: &std::path::Path,
            _: &std::path::Path,
            _: Option<f64>,
            _: trackline_processing::ProgressFn<'_>,
        ) -> Result<(), trackline_processing::TranscodeError> {
            Ok(())
        }
    }
}
