use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use trackline_core::models::TrackView;
use uuid::Uuid;

use crate::auth::CallerId;
use crate::error::{ErrorResponse, HttpAppError};
use crate::services::ingestion::IngestionService;
use crate::state::AppState;

#[utoipa::path(
    put,
    path = "/releases/{release_id}/tracks/{track_id}/audio",
    tag = "tracks",
    params(
        ("release_id" = Uuid, Path, description = "Release ID"),
        ("track_id" = Uuid, Path, description = "Track ID"),
        ("x-user-id" = Uuid, Header, description = "Authenticated user")
    ),
    request_body(content = Vec<u8>, content_type = "application/octet-stream", description = "Raw audio file"),
    responses(
        (status = 202, description = "Upload staged and queued for processing", body = TrackView),
        (status = 400, description = "Empty or interrupted upload", body = ErrorResponse),
        (status = 403, description = "Release belongs to another user", body = ErrorResponse),
        (status = 404, description = "Release or track not found", body = ErrorResponse),
        (status = 409, description = "Track is already being processed", body = ErrorResponse),
        (status = 413, description = "Upload too large", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, body), fields(user_id = %caller.0, operation = "upload_track"))]
pub async fn upload_track_audio(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
    Path((release_id, track_id)): Path<(Uuid, Uuid)>,
    body: Body,
) -> Result<(StatusCode, Json<TrackView>), HttpAppError> {
    let track = IngestionService::new(&state)
        .ingest(caller.0, release_id, track_id, body)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(track.to_view())))
}
