use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use trackline_core::models::TrackView;
use uuid::Uuid;

use crate::auth::CallerId;
use crate::error::{ErrorResponse, HttpAppError};
use crate::services::{owned_release, release_track};
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/releases/{release_id}/tracks/{track_id}",
    tag = "tracks",
    params(
        ("release_id" = Uuid, Path, description = "Release ID"),
        ("track_id" = Uuid, Path, description = "Track ID"),
        ("x-user-id" = Uuid, Header, description = "Authenticated user")
    ),
    responses(
        (status = 200, description = "Track status and artifacts", body = TrackView),
        (status = 403, description = "Release belongs to another user", body = ErrorResponse),
        (status = 404, description = "Release or track not found", body = ErrorResponse)
    )
)]
pub async fn get_track(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
    Path((release_id, track_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<TrackView>, HttpAppError> {
    owned_release(state.releases.as_ref(), release_id, caller.0).await?;
    let track = release_track(state.tracks.as_ref(), release_id, track_id).await?;
    Ok(Json(track.to_view()))
}
