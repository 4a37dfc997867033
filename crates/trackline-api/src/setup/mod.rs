//! Application setup and initialization

pub mod database;
pub mod pipeline;
pub mod routes;
pub mod server;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use trackline_core::Config;
use trackline_infra::Notifier;
use trackline_worker::Pipeline;

use crate::state::{AppState, UploadSettings};

pub struct App {
    pub state: Arc<AppState>,
    pub router: Router,
    pub pipeline: Pipeline,
}

/// Wire stores, storage, the worker pipeline and the HTTP router.
///
/// The pipeline is returned unstarted; the caller decides when to connect.
pub async fn initialize_app(config: &Config) -> Result<App> {
    config.validate()?;

    trackline_infra::init_telemetry(config.log_format())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    tracing::info!(
        environment = %config.environment(),
        port = config.server_port(),
        "Starting Trackline API"
    );

    tokio::fs::create_dir_all(config.staging_dir())
        .await
        .with_context(|| {
            format!(
                "Failed to create staging directory {}",
                config.staging_dir().display()
            )
        })?;

    let stores = database::setup_stores(config).await?;
    let storage = storage::setup_storage(config).await?;
    let notifier = Notifier::new(config.notifier_session_buffer());
    let pipeline = pipeline::setup_pipeline(
        config,
        stores.tracks.clone(),
        storage.clone(),
        notifier.clone(),
    )
    .await?;

    let state = Arc::new(AppState {
        tracks: stores.tracks,
        releases: stores.releases,
        storage,
        publisher: pipeline.publisher().clone(),
        supervisor: pipeline.supervisor().clone(),
        notifier,
        uploads: UploadSettings {
            staging_dir: config.staging_dir().clone(),
            max_upload_size_bytes: config.max_upload_size_bytes(),
        },
    });

    let router = routes::setup_routes(config, state.clone());

    Ok(App {
        state,
        router,
        pipeline,
    })
}
