//! Stage handler contract and the registry resolving a stage kind to its handler.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use trackline_core::models::{JobMessage, StageKind};
use trackline_core::{StageError, TrackStore};
use trackline_processing::Transcoder;
use trackline_storage::Storage;

use crate::pool::OutcomeSender;
use crate::stages::{EncodeDownloadStage, EncodeLosslessStage, StoreSourceStage, TranscodeStreamingStage};

/// Collaborators every stage works with.
#[derive(Clone)]
pub struct StageContext {
    pub store: Arc<dyn TrackStore>,
    pub storage: Arc<dyn Storage>,
    pub transcoder: Arc<dyn Transcoder>,
    /// Parent of the per-job temporary directories.
    pub work_dir: PathBuf,
}

/// One pipeline stage.
///
/// `run` reports progress and next-stage jobs through `outcomes`; the worker
/// pool turns its return value into the terminal outcome.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn run(
        &self,
        ctx: &StageContext,
        job: &JobMessage,
        outcomes: &OutcomeSender,
    ) -> Result<(), StageError>;
}

pub struct StageRegistry {
    store_source: Arc<dyn StageHandler>,
    encode_lossless: Arc<dyn StageHandler>,
    transcode_streaming: Arc<dyn StageHandler>,
    encode_download: Arc<dyn StageHandler>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            store_source: Arc::new(StoreSourceStage),
            encode_lossless: Arc::new(EncodeLosslessStage),
            transcode_streaming: Arc::new(TranscodeStreamingStage),
            encode_download: Arc::new(EncodeDownloadStage),
        }
    }

    /// Replace the handler registered for `handler.kind()`.
    pub fn with_handler(mut self, handler: Arc<dyn StageHandler>) -> Self {
        match handler.kind() {
            StageKind::StoreSource => self.store_source = handler,
            StageKind::EncodeLossless => self.encode_lossless = handler,
            StageKind::TranscodeStreaming => self.transcode_streaming = handler,
            StageKind::EncodeDownload => self.encode_download = handler,
        }
        self
    }

    pub fn handler(&self, kind: StageKind) -> Arc<dyn StageHandler> {
        match kind {
            StageKind::StoreSource => self.store_source.clone(),
            StageKind::EncodeLossless => self.encode_lossless.clone(),
            StageKind::TranscodeStreaming => self.transcode_streaming.clone(),
            StageKind::EncodeDownload => self.encode_download.clone(),
        }
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
