//! Shared application state handed to every handler.

use std::path::PathBuf;
use std::sync::Arc;

use trackline_broker::{ConnectionSupervisor, Publisher};
use trackline_core::{ReleaseDirectory, TrackStore};
use trackline_infra::Notifier;
use trackline_storage::Storage;

/// Where raw uploads are staged and how large they may be.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub staging_dir: PathBuf,
    pub max_upload_size_bytes: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub tracks: Arc<dyn TrackStore>,
    pub releases: Arc<dyn ReleaseDirectory>,
    pub storage: Arc<dyn Storage>,
    pub publisher: Arc<Publisher>,
    pub supervisor: Arc<ConnectionSupervisor>,
    pub notifier: Notifier,
    pub uploads: UploadSettings,
}
