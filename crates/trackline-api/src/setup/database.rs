//! Database setup and initialization

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use trackline_core::{Config, ReleaseDirectory, TrackStore};
use trackline_db::{InMemoryReleaseDirectory, InMemoryTrackStore, ReleaseRepository, TrackRepository};

pub struct Stores {
    pub tracks: Arc<dyn TrackStore>,
    pub releases: Arc<dyn ReleaseDirectory>,
}

/// Connect to PostgreSQL and run migrations, or fall back to in-memory
/// stores when no database is configured.
pub async fn setup_stores(config: &Config) -> Result<Stores> {
    let Some(url) = config.database_url() else {
        tracing::warn!("DATABASE_URL not set, using in-memory track store (state is lost on restart)");
        return Ok(Stores {
            tracks: Arc::new(InMemoryTrackStore::new()),
            releases: Arc::new(InMemoryReleaseDirectory::new()),
        });
    };

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections())
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds()))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections(),
        "Database connected successfully"
    );

    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("Failed to load migrations")?;
    migrator
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(Stores {
        tracks: Arc::new(TrackRepository::new(pool.clone())),
        releases: Arc::new(ReleaseRepository::new(pool)),
    })
}
