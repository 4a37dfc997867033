//! Test helpers: build AppState and router for integration tests.
//!
//! Everything runs in-process: in-memory stores, local storage in a temp
//! directory and a publisher that is never attached, so queued jobs stay in
//! its offline buffer where tests can count them.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use tempfile::TempDir;
use trackline_api::setup::routes;
use trackline_api::state::{AppState, UploadSettings};
use trackline_broker::{ConnectionSupervisor, MemoryBroker, OfflineBuffer, Publisher};
use trackline_core::models::{Release, Track};
use trackline_core::TrackStore;
use trackline_db::{InMemoryReleaseDirectory, InMemoryTrackStore};
use trackline_infra::Notifier;
use trackline_storage::{LocalStorage, Storage};
use uuid::Uuid;

pub const MAX_UPLOAD_BYTES: usize = 64 * 1024;

pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub tracks: Arc<InMemoryTrackStore>,
    pub releases: Arc<InMemoryReleaseDirectory>,
    pub storage: Arc<LocalStorage>,
    pub owner: Uuid,
    pub release_id: Uuid,
    _temp_dir: TempDir,
}

impl TestApp {
    pub fn staging_dir(&self) -> PathBuf {
        self.state.uploads.staging_dir.clone()
    }

    pub async fn add_track(&self, title: &str, position: i32) -> Track {
        let track = Track::new(self.release_id, title, position);
        self.tracks
            .insert(&track)
            .await
            .expect("Failed to insert track");
        track
    }

    pub async fn track(&self, track_id: Uuid) -> Option<Track> {
        self.tracks.get(track_id).await.expect("Failed to read track")
    }

    pub fn track_path(&self, track_id: Uuid) -> String {
        format!("/releases/{}/tracks/{}", self.release_id, track_id)
    }

    pub fn audio_path(&self, track_id: Uuid) -> String {
        format!("{}/audio", self.track_path(track_id))
    }
}

/// Setup a test app with one release owned by `owner`.
pub async fn setup_test_app() -> TestApp {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let storage = Arc::new(
        LocalStorage::new(
            temp_dir.path().join("objects"),
            "http://localhost:3000/media".to_string(),
        )
        .await
        .expect("Failed to create local storage"),
    );

    let owner = Uuid::new_v4();
    let release_id = Uuid::new_v4();
    let releases = Arc::new(InMemoryReleaseDirectory::new());
    releases.insert(Release {
        id: release_id,
        user_id: owner,
        artist: "The Test Pattern".to_string(),
        title: "Sine Waves".to_string(),
    });
    let tracks = Arc::new(InMemoryTrackStore::new());

    let publisher = Arc::new(Publisher::new(OfflineBuffer::in_memory()));
    let supervisor = Arc::new(ConnectionSupervisor::new(
        Arc::new(MemoryBroker::new()),
        publisher.clone(),
        Duration::from_millis(50),
    ));

    let state = Arc::new(AppState {
        tracks: tracks.clone(),
        releases: releases.clone(),
        storage: storage.clone() as Arc<dyn Storage>,
        publisher,
        supervisor,
        notifier: Notifier::new(16),
        uploads: UploadSettings {
            staging_dir: temp_dir.path().join("staging"),
            max_upload_size_bytes: MAX_UPLOAD_BYTES,
        },
    });

    let app = routes::build_router(state.clone(), &["*".to_string()]);
    let server = TestServer::new(app.into_make_service()).expect("Failed to create test server");

    TestApp {
        server,
        state,
        tracks,
        releases,
        storage,
        owner,
        release_id,
        _temp_dir: temp_dir,
    }
}
