pub mod events;
pub mod release_download;
pub mod track_delete;
pub mod track_get;
pub mod track_upload;
