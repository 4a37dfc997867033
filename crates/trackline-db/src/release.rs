use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use trackline_core::models::Release;
use trackline_core::{AppError, ReleaseDirectory, StoreResult};

#[derive(sqlx::FromRow)]
struct ReleaseRow {
    id: Uuid,
    user_id: Uuid,
    artist: String,
    title: String,
}

impl From<ReleaseRow> for Release {
    fn from(row: ReleaseRow) -> Self {
        Release {
            id: row.id,
            user_id: row.user_id,
            artist: row.artist,
            title: row.title,
        }
    }
}

/// Read-only view over the `releases` table.
#[derive(Clone)]
pub struct ReleaseRepository {
    pool: PgPool,
}

impl ReleaseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReleaseDirectory for ReleaseRepository {
    #[tracing::instrument(skip(self))]
    async fn get_release(&self, release_id: Uuid) -> StoreResult<Option<Release>> {
        let row = sqlx::query_as::<Postgres, ReleaseRow>(
            "SELECT id, user_id, artist, title FROM releases WHERE id = $1",
        )
        .bind(release_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, release_id = %release_id, "Failed to load release");
            AppError::Database(e.to_string())
        })?;

        Ok(row.map(Release::from))
    }
}
