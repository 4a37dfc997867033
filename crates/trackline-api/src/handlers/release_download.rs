use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::CallerId;
use crate::error::{ErrorResponse, HttpAppError};
use crate::services::track_lifecycle::TrackLifecycleService;
use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct DownloadAccepted {
    pub release_id: Uuid,
    pub status: String,
}

#[utoipa::path(
    post,
    path = "/releases/{release_id}/download",
    tag = "releases",
    params(
        ("release_id" = Uuid, Path, description = "Release ID"),
        ("x-user-id" = Uuid, Header, description = "Authenticated user")
    ),
    responses(
        (status = 202, description = "Download encode queued", body = DownloadAccepted),
        (status = 403, description = "Release belongs to another user", body = ErrorResponse),
        (status = 404, description = "Release not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(user_id = %caller.0, operation = "request_download"))]
pub async fn request_release_download(
    State(state): State<Arc<AppState>>,
    caller: CallerId,
    Path(release_id): Path<Uuid>,
) -> Result<(StatusCode, Json<DownloadAccepted>), HttpAppError> {
    TrackLifecycleService::request_download(&state, caller.0, release_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DownloadAccepted {
            release_id,
            status: "queued".to_string(),
        }),
    ))
}
