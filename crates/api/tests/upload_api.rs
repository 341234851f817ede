//! Integration tests for `POST /upload`: admission, validation, the busy
//! gate and parameter clamping.

mod common;

use std::sync::atomic::Ordering;

use axum::http::StatusCode;
use common::{
    body_json, build_test_app, get, post_multipart, video_upload, wait_for_status,
    MultipartBody, StubResult, TestApp,
};
use splatscan_core::job::JobPhase;
use splatscan_core::params::JobParams;

// ---------------------------------------------------------------------------
// Test: a valid upload is admitted and staged
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_is_admitted_and_staged() {
    let t = build_test_app(StubResult::Produces(b"ply".to_vec()), true).await;

    let response = post_multipart(t.app(), "/upload", video_upload("clip.mp4", b"frames")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Video uploaded and job started.");

    assert_eq!(t.state.slot.phase(), JobPhase::Running);
    assert_eq!(TestApp::files_in(&t.upload_dir), vec!["clip.mp4"]);
    let staged = std::fs::read(t.upload_dir.join("clip.mp4")).unwrap();
    assert_eq!(staged, b"frames");

    t.backend.release();
    wait_for_status(&t.app(), "idle_succes").await;
}

#[tokio::test]
async fn binary_upload_is_staged_byte_for_byte() {
    let t = build_test_app(StubResult::Produces(b"ply".to_vec()), true).await;
    let video: Vec<u8> = (0..=255u8).cycle().take(300 * 1024).collect();

    let response = post_multipart(t.app(), "/upload", video_upload("scan.mov", &video)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let staged = std::fs::read(t.upload_dir.join("scan.mov")).unwrap();
    assert_eq!(staged.len(), video.len());
    assert_eq!(staged, video);

    t.backend.release();
    wait_for_status(&t.app(), "idle_succes").await;
}

// ---------------------------------------------------------------------------
// Test: admission clears leftovers from the previous job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_clears_staging_directories() {
    let t = build_test_app(StubResult::Nothing, true).await;
    std::fs::write(t.upload_dir.join("old.mp4"), b"old").unwrap();
    std::fs::write(t.download_dir.join("splat.ply"), b"old result").unwrap();

    let response = post_multipart(t.app(), "/upload", video_upload("new.mp4", b"new")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(TestApp::files_in(&t.upload_dir), vec!["new.mp4"]);
    assert!(TestApp::files_in(&t.download_dir).is_empty());

    t.backend.release();
    wait_for_status(&t.app(), "idle_fail").await;
}

// ---------------------------------------------------------------------------
// Test: missing video part returns 400 and leaves the slot idle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_without_video_returns_400() {
    let t = build_test_app(StubResult::Nothing, false).await;
    let body = MultipartBody::new().text("iterations", "100").finish();

    let response = post_multipart(t.app(), "/upload", body).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(t.state.slot.phase(), JobPhase::Idle);
    assert!(t.backend.submitted().is_empty());
}

// ---------------------------------------------------------------------------
// Test: empty file name returns 400 and leaves the slot idle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_with_empty_file_name_returns_400() {
    let t = build_test_app(StubResult::Nothing, false).await;

    let response = post_multipart(t.app(), "/upload", video_upload("", b"frames")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(t.state.slot.phase(), JobPhase::Idle);
    assert!(TestApp::files_in(&t.upload_dir).is_empty());
}

// ---------------------------------------------------------------------------
// Test: non-numeric parameter returns 400 before admission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_with_non_numeric_parameter_returns_400() {
    let t = build_test_app(StubResult::Nothing, false).await;
    let body = MultipartBody::new()
        .text("keep_pre", "most")
        .file("video", "clip.mp4", b"frames")
        .finish();

    let response = post_multipart(t.app(), "/upload", body).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(t.state.slot.phase(), JobPhase::Idle);
}

// ---------------------------------------------------------------------------
// Test: a second upload while running gets 429 and changes nothing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_while_running_returns_429_without_side_effects() {
    let t = build_test_app(StubResult::Produces(b"ply".to_vec()), true).await;

    let first = post_multipart(t.app(), "/upload", video_upload("first.mp4", b"one")).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = post_multipart(t.app(), "/upload", video_upload("second.mp4", b"two")).await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let json = body_json(second).await;
    assert_eq!(json["code"], "BUSY");
    assert_eq!(
        json["error"],
        "A job is already running. Please wait until it finishes."
    );

    assert_eq!(TestApp::files_in(&t.upload_dir), vec!["first.mp4"]);
    assert_eq!(t.state.slot.snapshot().generation, 1);

    t.backend.release();
    wait_for_status(&t.app(), "idle_succes").await;
    assert_eq!(t.backend.submitted().len(), 1);
}

// ---------------------------------------------------------------------------
// Test: concurrent uploads admit exactly one job
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_uploads_admit_exactly_one() {
    let t = build_test_app(StubResult::Produces(b"ply".to_vec()), true).await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let app = t.app();
        tasks.push(tokio::spawn(async move {
            post_multipart(app, "/upload", video_upload(&format!("clip{i}.mp4"), b"x"))
                .await
                .status()
        }));
    }

    let mut admitted = 0;
    let mut busy = 0;
    for task in tasks {
        match task.await.unwrap() {
            StatusCode::OK => admitted += 1,
            StatusCode::TOO_MANY_REQUESTS => busy += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(busy, 7);
    assert_eq!(TestApp::files_in(&t.upload_dir).len(), 1);

    t.backend.release();
    wait_for_status(&t.app(), "idle_succes").await;
    assert_eq!(t.backend.submitted().len(), 1);
    assert_eq!(t.backend.closed.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Test: out-of-range parameters are clamped, not rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_clamps_parameters() {
    let t = build_test_app(StubResult::Produces(b"ply".to_vec()), false).await;
    let body = MultipartBody::new()
        .text("iterations", "0")
        .text("keep_pre", "500")
        .text("keep_post", "0")
        .text("keep_train_images", "")
        .file("video", "clip.mp4", b"frames")
        .finish();

    let response = post_multipart(t.app(), "/upload", body).await;
    assert_eq!(response.status(), StatusCode::OK);
    wait_for_status(&t.app(), "idle_succes").await;

    assert_eq!(
        t.backend.submitted(),
        vec![JobParams {
            iterations: 1,
            keep_pre: 100,
            keep_post: 1,
            keep_train_images: 100,
        }]
    );
}

// ---------------------------------------------------------------------------
// Test: the upload route is registered for POST only
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_upload_returns_405() {
    let t = build_test_app(StubResult::Nothing, false).await;
    let response = get(t.app(), "/upload").await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
