//! Broker, publisher and worker pipeline wiring.

use std::sync::Arc;

use anyhow::{Context, Result};
use trackline_broker::{MemoryBroker, OfflineBuffer, Publisher};
use trackline_core::{Config, TrackStore};
use trackline_infra::Notifier;
use trackline_processing::FfmpegService;
use trackline_storage::Storage;
use trackline_worker::{Pipeline, PipelineSettings, StageContext, StageRegistry};

pub async fn setup_pipeline(
    config: &Config,
    tracks: Arc<dyn TrackStore>,
    storage: Arc<dyn Storage>,
    notifier: Notifier,
) -> Result<Pipeline> {
    let buffer = match config.publisher_spool_path() {
        Some(path) => OfflineBuffer::open(path.clone())
            .await
            .with_context(|| format!("Failed to open publisher spool {}", path.display()))?,
        None => OfflineBuffer::in_memory(),
    };
    if !buffer.is_empty() {
        tracing::info!(buffered = buffer.len(), "Recovered unsent jobs from spool");
    }
    let publisher = Arc::new(Publisher::new(buffer));

    let work_dir = config.staging_dir().join("work");
    tokio::fs::create_dir_all(&work_dir)
        .await
        .with_context(|| format!("Failed to create work directory {}", work_dir.display()))?;

    let ctx = StageContext {
        store: tracks,
        storage,
        transcoder: Arc::new(FfmpegService::new(config.ffmpeg_path(), config.ffprobe_path())),
        work_dir,
    };
    let settings = PipelineSettings::from_config(config);
    tracing::info!(
        pool_size = settings.pool_size,
        job_timeout_secs = settings.job_timeout.as_secs(),
        ffmpeg_path = %config.ffmpeg_path(),
        "Worker pipeline configured"
    );

    Ok(Pipeline::new(
        Arc::new(MemoryBroker::new()),
        publisher,
        notifier,
        ctx,
        StageRegistry::new(),
        settings,
    ))
}
