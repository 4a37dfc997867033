mod helpers;

use std::time::Duration;

use axum::body::Bytes;
use helpers::{setup_test_app, MAX_UPLOAD_BYTES};
use serde_json::Value;
use trackline_core::models::{Release, Track, TrackStatus, TrackView};
use trackline_core::TrackStore;
use trackline_storage::{artifact_key, staging_path, Artifact, Storage};
use uuid::Uuid;

const AUDIO: &[u8] = b"RIFF\x24\x00\x00\x00WAVEfmt fake pcm payload";

#[tokio::test]
async fn test_upload_stages_file_and_queues_job() {
    let app = setup_test_app().await;
    let track = app.add_track("Opening", 1).await;

    let response = app
        .server
        .put(&app.audio_path(track.id))
        .add_header("x-user-id", app.owner.to_string())
        .bytes(Bytes::from_static(AUDIO))
        .await;

    assert_eq!(response.status_code(), 202);
    let view: TrackView = response.json();
    assert_eq!(view.id, track.id);
    assert_eq!(view.status, TrackStatus::Uploading);

    let stored = app.track(track.id).await.expect("track exists");
    assert_eq!(stored.status, TrackStatus::Uploading);
    let staged = staging_path(&app.staging_dir(), app.release_id, track.id);
    assert_eq!(stored.staging_path.as_deref(), Some(staged.to_string_lossy().as_ref()));
    assert_eq!(tokio::fs::read(&staged).await.expect("staged file"), AUDIO);

    // The broker is not connected, so the job waits in the offline buffer.
    assert_eq!(app.state.publisher.buffered().await, 1);
}

#[tokio::test]
async fn test_upload_notifies_the_uploader() {
    let app = setup_test_app().await;
    let track = app.add_track("Opening", 1).await;
    let mut session = app.state.notifier.subscribe(app.owner);

    let response = app
        .server
        .put(&app.audio_path(track.id))
        .add_header("x-user-id", app.owner.to_string())
        .bytes(Bytes::from_static(AUDIO))
        .await;
    assert_eq!(response.status_code(), 202);

    let event = tokio::time::timeout(Duration::from_secs(2), session.recv())
        .await
        .expect("event delivered")
        .expect("session open");
    assert_eq!(event.event_type, "track.status");
    assert_eq!(event.payload["status"], "uploading");
    assert_eq!(event.payload["trackId"], track.id.to_string());
}

#[tokio::test]
async fn test_upload_requires_caller_header() {
    let app = setup_test_app().await;
    let track = app.add_track("Opening", 1).await;

    let missing = app
        .server
        .put(&app.audio_path(track.id))
        .bytes(Bytes::from_static(AUDIO))
        .await;
    assert_eq!(missing.status_code(), 401);

    let malformed = app
        .server
        .put(&app.audio_path(track.id))
        .add_header("x-user-id", "not-a-uuid")
        .bytes(Bytes::from_static(AUDIO))
        .await;
    assert_eq!(malformed.status_code(), 401);

    assert_eq!(app.track(track.id).await.expect("track").status, TrackStatus::Pending);
}

#[tokio::test]
async fn test_upload_to_someone_elses_release_is_forbidden() {
    let app = setup_test_app().await;
    let track = app.add_track("Opening", 1).await;

    let response = app
        .server
        .put(&app.audio_path(track.id))
        .add_header("x-user-id", Uuid::new_v4().to_string())
        .bytes(Bytes::from_static(AUDIO))
        .await;

    assert_eq!(response.status_code(), 403);
    let body: Value = response.json();
    assert_eq!(body["code"], "FORBIDDEN");
    assert_eq!(app.track(track.id).await.expect("track").status, TrackStatus::Pending);
    assert_eq!(app.state.publisher.buffered().await, 0);
}

#[tokio::test]
async fn test_upload_to_unknown_release_or_track_is_not_found() {
    let app = setup_test_app().await;

    let unknown_release = app
        .server
        .put(&format!("/releases/{}/tracks/{}/audio", Uuid::new_v4(), Uuid::new_v4()))
        .add_header("x-user-id", app.owner.to_string())
        .bytes(Bytes::from_static(AUDIO))
        .await;
    assert_eq!(unknown_release.status_code(), 404);

    let unknown_track = app
        .server
        .put(&app.audio_path(Uuid::new_v4()))
        .add_header("x-user-id", app.owner.to_string())
        .bytes(Bytes::from_static(AUDIO))
        .await;
    assert_eq!(unknown_track.status_code(), 404);
}

#[tokio::test]
async fn test_upload_while_processing_conflicts() {
    let app = setup_test_app().await;
    let track = app.add_track("Opening", 1).await;
    app.tracks.begin_upload(track.id, "/tmp/elsewhere").await.expect("begin");
    app.tracks.transition(track.id, TrackStatus::Uploaded).await.expect("uploaded");
    app.tracks.transition(track.id, TrackStatus::Encoding).await.expect("encoding");

    let response = app
        .server
        .put(&app.audio_path(track.id))
        .add_header("x-user-id", app.owner.to_string())
        .bytes(Bytes::from_static(AUDIO))
        .await;

    assert_eq!(response.status_code(), 409);
    let body: Value = response.json();
    assert_eq!(body["code"], "INVALID_STATUS_TRANSITION");
    assert_eq!(app.track(track.id).await.expect("track").status, TrackStatus::Encoding);
    assert!(!staging_path(&app.staging_dir(), app.release_id, track.id).exists());
}

#[tokio::test]
async fn test_reupload_after_error_is_accepted() {
    let app = setup_test_app().await;
    let track = app.add_track("Opening", 1).await;
    app.tracks.begin_upload(track.id, "/tmp/elsewhere").await.expect("begin");
    app.tracks.transition(track.id, TrackStatus::Error).await.expect("error");

    let response = app
        .server
        .put(&app.audio_path(track.id))
        .add_header("x-user-id", app.owner.to_string())
        .bytes(Bytes::from_static(AUDIO))
        .await;

    assert_eq!(response.status_code(), 202);
    assert_eq!(app.track(track.id).await.expect("track").status, TrackStatus::Uploading);
}

#[tokio::test]
async fn test_oversized_upload_is_rejected_and_cleaned_up() {
    let app = setup_test_app().await;
    let track = app.add_track("Opening", 1).await;

    let response = app
        .server
        .put(&app.audio_path(track.id))
        .add_header("x-user-id", app.owner.to_string())
        .bytes(Bytes::from(vec![7u8; MAX_UPLOAD_BYTES + 1]))
        .await;

    assert_eq!(response.status_code(), 413);
    let body: Value = response.json();
    assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");
    assert_eq!(app.track(track.id).await.expect("track").status, TrackStatus::Pending);

    let release_dir = app.staging_dir().join(app.release_id.to_string());
    let leftovers = std::fs::read_dir(&release_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
    assert_eq!(app.state.publisher.buffered().await, 0);
}

#[tokio::test]
async fn test_empty_upload_is_rejected() {
    let app = setup_test_app().await;
    let track = app.add_track("Opening", 1).await;

    let response = app
        .server
        .put(&app.audio_path(track.id))
        .add_header("x-user-id", app.owner.to_string())
        .bytes(Bytes::new())
        .await;

    assert_eq!(response.status_code(), 400);
    assert_eq!(app.track(track.id).await.expect("track").status, TrackStatus::Pending);
}

#[tokio::test]
async fn test_second_upload_while_uploading_conflicts() {
    let app = setup_test_app().await;
    let track = app.add_track("Opening", 1).await;

    let first = app
        .server
        .put(&app.audio_path(track.id))
        .add_header("x-user-id", app.owner.to_string())
        .bytes(Bytes::from_static(AUDIO))
        .await;
    assert_eq!(first.status_code(), 202);

    let second = app
        .server
        .put(&app.audio_path(track.id))
        .add_header("x-user-id", app.owner.to_string())
        .bytes(Bytes::from_static(b"different audio"))
        .await;
    assert_eq!(second.status_code(), 409);

    let staged = staging_path(&app.staging_dir(), app.release_id, track.id);
    assert_eq!(tokio::fs::read(&staged).await.expect("staged file"), AUDIO);
    assert_eq!(app.state.publisher.buffered().await, 1);
}

#[tokio::test]
async fn test_get_track_returns_view() {
    let app = setup_test_app().await;
    let track = app.add_track("Closing", 9).await;

    let response = app
        .server
        .get(&app.track_path(track.id))
        .add_header("x-user-id", app.owner.to_string())
        .await;

    assert_eq!(response.status_code(), 200);
    let view: TrackView = response.json();
    assert_eq!(view.title, "Closing");
    assert_eq!(view.position, 9);
    assert_eq!(view.status, TrackStatus::Pending);
}

#[tokio::test]
async fn test_get_track_from_another_release_is_not_found() {
    let app = setup_test_app().await;
    let other_release = Uuid::new_v4();
    app.releases.insert(Release {
        id: other_release,
        user_id: app.owner,
        artist: "The Test Pattern".to_string(),
        title: "B-Sides".to_string(),
    });
    let elsewhere = Track::new(other_release, "Hidden", 1);
    app.tracks.insert(&elsewhere).await.expect("insert");

    let response = app
        .server
        .get(&app.track_path(elsewhere.id))
        .add_header("x-user-id", app.owner.to_string())
        .await;

    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_delete_track_removes_record_objects_and_staging() {
    let app = setup_test_app().await;
    let track = app.add_track("Opening", 1).await;

    let upload = app
        .server
        .put(&app.audio_path(track.id))
        .add_header("x-user-id", app.owner.to_string())
        .bytes(Bytes::from_static(AUDIO))
        .await;
    assert_eq!(upload.status_code(), 202);

    let source_key = artifact_key(app.release_id, track.id, Artifact::Source);
    app.storage
        .upload_with_key(&source_key, AUDIO.to_vec(), Artifact::Source.content_type())
        .await
        .expect("seed object");

    let response = app
        .server
        .delete(&app.track_path(track.id))
        .add_header("x-user-id", app.owner.to_string())
        .await;

    assert_eq!(response.status_code(), 204);
    assert!(app.track(track.id).await.is_none());
    assert!(!app.storage.exists(&source_key).await.expect("exists check"));
    assert!(!staging_path(&app.staging_dir(), app.release_id, track.id).exists());

    let again = app
        .server
        .delete(&app.track_path(track.id))
        .add_header("x-user-id", app.owner.to_string())
        .await;
    assert_eq!(again.status_code(), 404);
}

#[tokio::test]
async fn test_delete_by_non_owner_is_forbidden() {
    let app = setup_test_app().await;
    let track = app.add_track("Opening", 1).await;

    let response = app
        .server
        .delete(&app.track_path(track.id))
        .add_header("x-user-id", Uuid::new_v4().to_string())
        .await;

    assert_eq!(response.status_code(), 403);
    assert_eq!(app.track(track.id).await.expect("track").status, TrackStatus::Pending);
}
