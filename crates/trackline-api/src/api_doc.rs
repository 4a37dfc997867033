//! OpenAPI documentation.

use utoipa::OpenApi;

use crate::error;
use crate::handlers;
use crate::setup::routes::HealthResponse;
use trackline_core::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Trackline API",
        version = "0.1.0",
        description = "Audio ingestion for artist releases: raw uploads are archived losslessly, transcoded for adaptive streaming and, on request, encoded for download. Progress is pushed to the uploader over server-sent events."
    ),
    paths(
        handlers::track_upload::upload_track_audio,
        handlers::track_get::get_track,
        handlers::track_delete::delete_track,
        handlers::release_download::request_release_download,
        handlers::events::event_stream,
        crate::setup::routes::health_check,
    ),
    components(
        schemas(
            models::TrackView,
            models::TrackStatus,
            models::TrackArtifacts,
            handlers::release_download::DownloadAccepted,
            HealthResponse,
            error::ErrorResponse,
        )
    ),
    tags(
        (name = "tracks", description = "Track upload, status and deletion"),
        (name = "releases", description = "Release-wide operations"),
        (name = "events", description = "Live pipeline progress for the caller"),
        (name = "health", description = "Liveness and broker connection state")
    )
)]
pub struct ApiDoc;
