use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::auth::CallerId;
use crate::error::{ErrorResponse, HttpAppError};
use crate::services::track_lifecycle::TrackLifecycleService;
use crate::state::AppState;

#[utoipa::path(
    delete,
    path = "/releases/{release_id}/tracks/{track_id}",
    tag = "tracks",
    params(
        ("release_id" = Uuid, Path, description = "Release ID"),
        ("track_id" = Uuid, Path, description = "Track ID"),
        ("x-user-id" = Uuid, Header, description = "Authenticated user")
    ),
    responses(
        (status = 204, description = "Track and its artifacts deleted"),
        (status = 403, description = "Release belongs to another user", body = ErrorResponse),
        (status = 404, description = "Release or track not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(user_id = %caller.0, operation = "delete_track"))]
pub async fn delete_track(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
    Path((release_id, track_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, HttpAppError> {
    TrackLifecycleService::delete_track(&state, caller.0, release_id, track_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
