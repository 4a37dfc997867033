//! In-memory stores with the same compare-and-set semantics as the
//! PostgreSQL repositories.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use trackline_core::models::{ArtifactUpdate, Release, Track, TrackArtifacts, TrackStatus};
use trackline_core::store::transition_conflict;
use trackline_core::{AppError, ReleaseDirectory, StoreResult, TrackStore};

#[derive(Default)]
struct TrackState {
    tracks: HashMap<Uuid, Track>,
    /// Statuses written after insertion, in order.
    history: HashMap<Uuid, Vec<TrackStatus>>,
}

#[derive(Clone, Default)]
pub struct InMemoryTrackStore {
    state: Arc<Mutex<TrackState>>,
}

impl InMemoryTrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every status the track has been moved to since it was inserted.
    pub fn status_history(&self, track_id: Uuid) -> Vec<TrackStatus> {
        self.lock()
            .history
            .get(&track_id)
            .cloned()
            .unwrap_or_default()
    }

    fn compare_and_set(
        &self,
        track_id: Uuid,
        to: TrackStatus,
        mutate: impl FnOnce(&mut Track),
    ) -> StoreResult<Track> {
        let mut state = self.lock();
        let current = state.tracks.get(&track_id).map(|t| t.status);

        match current {
            Some(from) if from.can_transition_to(to) => {}
            other => return Err(transition_conflict(other, track_id, to)),
        }

        let updated = match state.tracks.get_mut(&track_id) {
            Some(track) => {
                track.status = to;
                track.updated_at = Utc::now();
                mutate(track);
                track.clone()
            }
            None => return Err(transition_conflict(None, track_id, to)),
        };

        state.history.entry(track_id).or_default().push(to);
        Ok(updated)
    }
}

#[async_trait]
impl TrackStore for InMemoryTrackStore {
    async fn get(&self, track_id: Uuid) -> StoreResult<Option<Track>> {
        Ok(self.lock().tracks.get(&track_id).cloned())
    }

    async fn list_by_release(&self, release_id: Uuid) -> StoreResult<Vec<Track>> {
        let mut tracks: Vec<Track> = self
            .lock()
            .tracks
            .values()
            .filter(|t| t.release_id == release_id)
            .cloned()
            .collect();
        tracks.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(tracks)
    }

    async fn insert(&self, track: &Track) -> StoreResult<()> {
        self.lock().tracks.insert(track.id, track.clone());
        Ok(())
    }

    async fn transition(&self, track_id: Uuid, to: TrackStatus) -> StoreResult<Track> {
        self.compare_and_set(track_id, to, |_| {})
    }

    async fn complete(
        &self,
        track_id: Uuid,
        to: TrackStatus,
        update: &ArtifactUpdate,
    ) -> StoreResult<Track> {
        self.compare_and_set(track_id, to, |track| update.apply(track))
    }

    async fn begin_upload(&self, track_id: Uuid, staging_path: &str) -> StoreResult<Track> {
        self.compare_and_set(track_id, TrackStatus::Uploading, |track| {
            track.artifacts = TrackArtifacts::default();
            track.duration_secs = None;
            track.staging_path = Some(staging_path.to_string());
        })
    }

    async fn record_artifacts(&self, track_id: Uuid, update: &ArtifactUpdate) -> StoreResult<()> {
        let mut state = self.lock();
        match state.tracks.get_mut(&track_id) {
            Some(track) => {
                update.apply(track);
                track.updated_at = Utc::now();
                Ok(())
            }
            None => Err(AppError::NotFound(format!("Track {} not found", track_id))),
        }
    }

    async fn clear_staging_path(&self, track_id: Uuid) -> StoreResult<()> {
        if let Some(track) = self.lock().tracks.get_mut(&track_id) {
            track.staging_path = None;
        }
        Ok(())
    }

    async fn remove(&self, track_id: Uuid) -> StoreResult<()> {
        self.lock().tracks.remove(&track_id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryReleaseDirectory {
    releases: Arc<Mutex<HashMap<Uuid, Release>>>,
}

impl InMemoryReleaseDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, release: Release) {
        self.releases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(release.id, release);
    }
}

#[async_trait]
impl ReleaseDirectory for InMemoryReleaseDirectory {
    async fn get_release(&self, release_id: Uuid) -> StoreResult<Option<Release>> {
        Ok(self
            .releases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&release_id)
            .cloned())
    }
}
