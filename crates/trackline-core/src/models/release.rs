use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A release as seen by the pipeline: who owns it and which tracks belong to it.
///
/// Catalogue fields beyond these are managed by the release CRUD service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub id: Uuid,
    pub user_id: Uuid,
    pub artist: String,
    pub title: String,
}

impl Release {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }
}
