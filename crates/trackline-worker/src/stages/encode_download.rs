use async_trait::async_trait;
use trackline_core::models::{JobMessage, Progress, StageKind};
use trackline_core::StageError;
use trackline_processing::encode_download_format;
use uuid::Uuid;

use super::job_dir;
use crate::pool::OutcomeSender;
use crate::registry::{StageContext, StageHandler};

/// Builds the download copy of every stored track in a release.
pub struct EncodeDownloadStage;

#[async_trait]
impl StageHandler for EncodeDownloadStage {
    fn kind(&self) -> StageKind {
        StageKind::EncodeDownload
    }

    #[tracing::instrument(skip_all, fields(release_id = %job.release_id))]
    async fn run(
        &self,
        ctx: &StageContext,
        job: &JobMessage,
        outcomes: &OutcomeSender,
    ) -> Result<(), StageError> {
        let dir = job_dir(ctx).await?;
        let forward = |track_id: Uuid, progress: Progress| {
            outcomes.progress(Progress {
                track_id: Some(track_id),
                ..progress
            })
        };

        let produced = encode_download_format(
            ctx.transcoder.as_ref(),
            ctx.storage.as_ref(),
            ctx.store.as_ref(),
            job.release_id,
            dir.path(),
            &forward,
        )
        .await?;

        outcomes.progress(Progress::text(format!(
            "Download copies ready for {} tracks",
            produced.len()
        )));
        tracing::info!(tracks = produced.len(), "Release download copies stored");
        Ok(())
    }
}
