#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use trackline_broker::{
    wait_for_state, ConnectionState, MemoryBroker, OfflineBuffer, Publisher,
};
use trackline_core::models::{JobMessage, StageKind, Track, TrackStatus};
use trackline_core::TrackStore;
use trackline_db::InMemoryTrackStore;
use trackline_infra::Notifier;
use trackline_processing::test_support::{fragmented_mp4, FragmentSpec};
use trackline_processing::{AudioMetadata, EncodeProgress, ProgressFn, TranscodeError, Transcoder};
use trackline_storage::{staging_path, LocalStorage, Storage};
use trackline_worker::{Pipeline, PipelineSettings, StageContext, StageRegistry};
use uuid::Uuid;

pub const WAIT: Duration = Duration::from_secs(10);

/// Transcoder double: sources starting with `CORRUPT` fail to probe, every
/// other source is a 180 second stereo file.
#[derive(Default)]
pub struct FakeTranscoder {
    pub encode_delay: Duration,
    pub lossless_running: AtomicUsize,
    pub lossless_peak: AtomicUsize,
    pub lossless_calls: AtomicUsize,
    /// When set, every lossless encode waits for a permit before finishing.
    pub lossless_gate: Option<Arc<Semaphore>>,
}

impl FakeTranscoder {
    fn report(on_progress: ProgressFn<'_>, secs: f64) {
        on_progress(EncodeProgress {
            timecode_secs: secs,
            size_bytes: (secs as u64) * 1024,
            speed: Some(40.0),
            percent: Some(secs / 180.0 * 100.0),
        });
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe_duration(&self, src: &Path) -> Result<AudioMetadata, TranscodeError> {
        let bytes = tokio::fs::read(src).await?;
        if bytes.starts_with(b"CORRUPT") {
            return Err(TranscodeError::NoAudioStream(src.display().to_string()));
        }
        Ok(AudioMetadata {
            duration: Some(180.0),
            bitrate: Some(1_411_200),
            sample_rate: Some(44_100),
            channels: Some(2),
            codec: Some("pcm_s16le".to_string()),
            format_name: Some("wav".to_string()),
        })
    }

    async fn encode_lossless(
        &self,
        src: &Path,
        out: &Path,
        _total_duration: Option<f64>,
        on_progress: ProgressFn<'_>,
    ) -> Result<(), TranscodeError> {
        self.lossless_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.lossless_running.fetch_add(1, Ordering::SeqCst) + 1;
        self.lossless_peak.fetch_max(now, Ordering::SeqCst);

        Self::report(on_progress, 90.0);
        tokio::time::sleep(self.encode_delay).await;
        if let Some(gate) = &self.lossless_gate {
            let _permit = gate.acquire().await;
        }
        let mut body = b"fLaC".to_vec();
        body.extend(tokio::fs::read(src).await?);
        tokio::fs::write(out, body).await?;
        Self::report(on_progress, 180.0);

        self.lossless_running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn encode_streaming_fragment(
        &self,
        _src: &Path,
        out: &Path,
        _total_duration: Option<f64>,
        on_progress: ProgressFn<'_>,
    ) -> Result<(), TranscodeError> {
        tokio::time::sleep(self.encode_delay).await;
        tokio::fs::write(out, fragmented_mp4(44_100, &[FragmentSpec::default(); 12])).await?;
        Self::report(on_progress, 180.0);
        Ok(())
    }

    async fn encode_download(
        &self,
        src: &Path,
        out: &Path,
        _total_duration: Option<f64>,
        on_progress: ProgressFn<'_>,
    ) -> Result<(), TranscodeError> {
        let mut body = b"ID3".to_vec();
        body.extend(tokio::fs::read(src).await?);
        tokio::fs::write(out, body).await?;
        Self::report(on_progress, 180.0);
        Ok(())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub broker: MemoryBroker,
    pub store: Arc<InMemoryTrackStore>,
    pub storage: Arc<LocalStorage>,
    pub notifier: Notifier,
    pub transcoder: Arc<FakeTranscoder>,
    pub pipeline: Pipeline,
    pub release_id: Uuid,
    pub user_id: Uuid,
}

impl Harness {
    pub async fn start(transcoder: FakeTranscoder) -> Self {
        Self::start_with(transcoder, StageRegistry::new(), PipelineSettings {
            pool_size: 4,
            job_timeout: Duration::from_secs(30),
            heavy_prefetch: 1,
            light_prefetch: 4,
            reconnect_delay: Duration::from_millis(20),
            ..Default::default()
        })
        .await
    }

    pub async fn start_with(
        transcoder: FakeTranscoder,
        registry: StageRegistry,
        settings: PipelineSettings,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let broker = MemoryBroker::new();
        let store = Arc::new(InMemoryTrackStore::new());
        let storage = Arc::new(
            LocalStorage::new(dir.path().join("objects"), "http://localhost/media".to_string())
                .await
                .unwrap(),
        );
        let notifier = Notifier::new(256);
        let transcoder = Arc::new(transcoder);
        let publisher = Arc::new(Publisher::new(OfflineBuffer::in_memory()));

        let ctx = StageContext {
            store: store.clone(),
            storage: storage.clone(),
            transcoder: transcoder.clone(),
            work_dir: dir.path().join("work"),
        };
        let pipeline = Pipeline::new(
            Arc::new(broker.clone()),
            publisher,
            notifier.clone(),
            ctx,
            registry,
            settings,
        );

        let mut state = pipeline.supervisor().subscribe_state();
        pipeline.start();
        tokio::time::timeout(WAIT, wait_for_state(&mut state, ConnectionState::Connected))
            .await
            .unwrap()
            .unwrap();

        Self {
            dir,
            broker,
            store,
            storage,
            notifier,
            transcoder,
            pipeline,
            release_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        }
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.dir.path().join("staging")
    }

    pub async fn add_track(&self, title: &str, position: i32) -> Track {
        let track = Track::new(self.release_id, title, position);
        self.store.insert(&track).await.unwrap();
        track
    }

    /// What the ingestion endpoint does: stage the body, flip to `uploading`, publish.
    pub async fn upload(&self, track: &Track, body: &[u8]) -> JobMessage {
        let path = staging_path(&self.staging_dir(), self.release_id, track.id);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, body).await.unwrap();

        let path = path.to_string_lossy().to_string();
        self.store.begin_upload(track.id, &path).await.unwrap();
        let job = JobMessage::for_track(
            StageKind::StoreSource,
            self.release_id,
            track.id,
            self.user_id,
            Some(track.title.clone()),
            Some(path),
        );
        self.pipeline.publisher().publish_job(&job).await.unwrap();
        job
    }

    pub async fn wait_for_status(&self, track_id: Uuid, status: TrackStatus) -> Track {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let track = self.store.get(track_id).await.unwrap();
            if let Some(track) = track.filter(|t| t.status == status) {
                return track;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "track {} never reached {}; history {:?}",
                track_id,
                status,
                self.store.status_history(track_id)
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until every queue is empty and nothing is unacked.
    pub async fn wait_idle(&self) {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let busy = StageKind::ALL
                .iter()
                .map(|s| self.broker.queue_depth(s.queue()))
                .sum::<usize>()
                + self.broker.unacked_count();
            if busy == 0 {
                return;
            }
            assert!(tokio::time::Instant::now() < deadline, "pipeline never went idle");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn object_exists(&self, key: &str) -> bool {
        self.storage.exists(key).await.unwrap()
    }
}
