use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use trackline_core::models::{ArtifactUpdate, Track, TrackArtifacts, TrackStatus};
use trackline_core::store::transition_conflict;
use trackline_core::{AppError, StoreResult, TrackStore};

const TRACK_COLUMNS: &str = r#"
    id, release_id, title, position, status, duration_secs, staging_path,
    source_key, lossless_key, stream_key, manifest_key, mpd_key, download_key,
    created_at, updated_at
"#;

#[derive(sqlx::FromRow)]
struct TrackRow {
    id: Uuid,
    release_id: Uuid,
    title: String,
    position: i32,
    status: String,
    duration_secs: Option<f64>,
    staging_path: Option<String>,
    source_key: Option<String>,
    lossless_key: Option<String>,
    stream_key: Option<String>,
    manifest_key: Option<String>,
    mpd_key: Option<String>,
    download_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TrackRow> for Track {
    type Error = AppError;

    fn try_from(row: TrackRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TrackStatus>()
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(Track {
            id: row.id,
            release_id: row.release_id,
            title: row.title,
            position: row.position,
            status,
            duration_secs: row.duration_secs,
            artifacts: TrackArtifacts {
                source_key: row.source_key,
                lossless_key: row.lossless_key,
                stream_key: row.stream_key,
                manifest_key: row.manifest_key,
                mpd_key: row.mpd_key,
                download_key: row.download_key,
            },
            staging_path: row.staging_path,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn db_error(err: sqlx::Error, operation: &'static str, track_id: Option<Uuid>) -> AppError {
    tracing::error!(error = %err, operation, track_id = ?track_id, "Track query failed");
    AppError::Database(err.to_string())
}

fn status_names(statuses: &[TrackStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.to_string()).collect()
}

/// PostgreSQL-backed track persistence.
#[derive(Clone)]
pub struct TrackRepository {
    pool: PgPool,
}

impl TrackRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, track_id: Uuid) -> StoreResult<Option<TrackStatus>> {
        let status: Option<String> =
            sqlx::query_scalar::<Postgres, String>("SELECT status FROM tracks WHERE id = $1")
                .bind(track_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error(e, "current_status", Some(track_id)))?;

        status
            .map(|s| s.parse::<TrackStatus>())
            .transpose()
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Turn a compare-and-set result into the updated track or the reason it did not apply.
    async fn resolve_cas(
        &self,
        row: Option<TrackRow>,
        track_id: Uuid,
        to: TrackStatus,
    ) -> StoreResult<Track> {
        match row {
            Some(row) => {
                let track = Track::try_from(row)?;
                tracing::debug!(track_id = %track_id, status = %to, "Track status updated");
                Ok(track)
            }
            None => {
                let current = self.current_status(track_id).await?;
                Err(transition_conflict(current, track_id, to))
            }
        }
    }
}

#[async_trait]
impl TrackStore for TrackRepository {
    #[tracing::instrument(skip(self))]
    async fn get(&self, track_id: Uuid) -> StoreResult<Option<Track>> {
        let query = format!("SELECT {} FROM tracks WHERE id = $1", TRACK_COLUMNS);
        let row = sqlx::query_as::<Postgres, TrackRow>(&query)
            .bind(track_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(e, "get", Some(track_id)))?;

        row.map(Track::try_from).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn list_by_release(&self, release_id: Uuid) -> StoreResult<Vec<Track>> {
        let query = format!(
            "SELECT {} FROM tracks WHERE release_id = $1 ORDER BY position, created_at",
            TRACK_COLUMNS
        );
        let rows = sqlx::query_as::<Postgres, TrackRow>(&query)
            .bind(release_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error(e, "list_by_release", None))?;

        rows.into_iter().map(Track::try_from).collect()
    }

    #[tracing::instrument(skip(self, track), fields(track_id = %track.id))]
    async fn insert(&self, track: &Track) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tracks (
                id, release_id, title, position, status, duration_secs, staging_path,
                source_key, lossless_key, stream_key, manifest_key, mpd_key, download_key,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(track.id)
        .bind(track.release_id)
        .bind(&track.title)
        .bind(track.position)
        .bind(track.status.to_string())
        .bind(track.duration_secs)
        .bind(&track.staging_path)
        .bind(&track.artifacts.source_key)
        .bind(&track.artifacts.lossless_key)
        .bind(&track.artifacts.stream_key)
        .bind(&track.artifacts.manifest_key)
        .bind(&track.artifacts.mpd_key)
        .bind(&track.artifacts.download_key)
        .bind(track.created_at)
        .bind(track.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(e, "insert", Some(track.id)))?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn transition(&self, track_id: Uuid, to: TrackStatus) -> StoreResult<Track> {
        let allowed = status_names(&TrackStatus::predecessors_of(to));
        let query = format!(
            r#"
            UPDATE tracks
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING {}
            "#,
            TRACK_COLUMNS
        );

        let row = sqlx::query_as::<Postgres, TrackRow>(&query)
            .bind(track_id)
            .bind(to.to_string())
            .bind(&allowed)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(e, "transition", Some(track_id)))?;

        self.resolve_cas(row, track_id, to).await
    }

    #[tracing::instrument(skip(self, update))]
    async fn complete(
        &self,
        track_id: Uuid,
        to: TrackStatus,
        update: &ArtifactUpdate,
    ) -> StoreResult<Track> {
        let allowed = status_names(&TrackStatus::predecessors_of(to));
        let query = format!(
            r#"
            UPDATE tracks
            SET status = $2,
                source_key = COALESCE($4, source_key),
                lossless_key = COALESCE($5, lossless_key),
                stream_key = COALESCE($6, stream_key),
                manifest_key = COALESCE($7, manifest_key),
                mpd_key = COALESCE($8, mpd_key),
                download_key = COALESCE($9, download_key),
                duration_secs = COALESCE($10, duration_secs),
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING {}
            "#,
            TRACK_COLUMNS
        );

        let row = sqlx::query_as::<Postgres, TrackRow>(&query)
            .bind(track_id)
            .bind(to.to_string())
            .bind(&allowed)
            .bind(&update.source_key)
            .bind(&update.lossless_key)
            .bind(&update.stream_key)
            .bind(&update.manifest_key)
            .bind(&update.mpd_key)
            .bind(&update.download_key)
            .bind(update.duration_secs)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(e, "complete", Some(track_id)))?;

        self.resolve_cas(row, track_id, to).await
    }

    #[tracing::instrument(skip(self))]
    async fn begin_upload(&self, track_id: Uuid, staging_path: &str) -> StoreResult<Track> {
        let to = TrackStatus::Uploading;
        let allowed = status_names(&TrackStatus::predecessors_of(to));
        let query = format!(
            r#"
            UPDATE tracks
            SET status = $2,
                staging_path = $4,
                duration_secs = NULL,
                source_key = NULL,
                lossless_key = NULL,
                stream_key = NULL,
                manifest_key = NULL,
                mpd_key = NULL,
                download_key = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING {}
            "#,
            TRACK_COLUMNS
        );

        let row = sqlx::query_as::<Postgres, TrackRow>(&query)
            .bind(track_id)
            .bind(to.to_string())
            .bind(&allowed)
            .bind(staging_path)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(e, "begin_upload", Some(track_id)))?;

        self.resolve_cas(row, track_id, to).await
    }

    #[tracing::instrument(skip(self, update))]
    async fn record_artifacts(&self, track_id: Uuid, update: &ArtifactUpdate) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tracks
            SET source_key = COALESCE($2, source_key),
                lossless_key = COALESCE($3, lossless_key),
                stream_key = COALESCE($4, stream_key),
                manifest_key = COALESCE($5, manifest_key),
                mpd_key = COALESCE($6, mpd_key),
                download_key = COALESCE($7, download_key),
                duration_secs = COALESCE($8, duration_secs),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(track_id)
        .bind(&update.source_key)
        .bind(&update.lossless_key)
        .bind(&update.stream_key)
        .bind(&update.manifest_key)
        .bind(&update.mpd_key)
        .bind(&update.download_key)
        .bind(update.duration_secs)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(e, "record_artifacts", Some(track_id)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Track {} not found", track_id)));
        }
        Ok(())
    }

    async fn clear_staging_path(&self, track_id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE tracks SET staging_path = NULL WHERE id = $1")
            .bind(track_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(e, "clear_staging_path", Some(track_id)))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn remove(&self, track_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM tracks WHERE id = $1")
            .bind(track_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(e, "remove", Some(track_id)))?;

        tracing::info!(track_id = %track_id, "Track removed");
        Ok(())
    }
}
