#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use splatscan_api::config::ServerConfig;
use splatscan_api::router::build_app_router;
use splatscan_api::state::AppState;
use splatscan_core::backend::{
    BackendError, BackendKind, BackendRun, ExecutionBackend, JobHandle, Liveness,
};
use splatscan_core::params::JobParams;
use splatscan_core::viewer::{ViewerError, ViewerLauncher};

pub const BOUNDARY: &str = "splatscan-test-boundary";

// ---------------------------------------------------------------------------
// Stub backend
// ---------------------------------------------------------------------------

/// What the stub's computation leaves behind.
#[derive(Clone)]
pub enum StubResult {
    /// Writes these bytes as the result file.
    Produces(Vec<u8>),
    /// Ends without a result file.
    Nothing,
}

/// Shared between the backend and each run so tests can observe and steer it.
pub struct StubShared {
    result: StubResult,
    gated: bool,
    release: Notify,
    pub submitted: Mutex<Vec<JobParams>>,
    pub uploads: Mutex<Vec<PathBuf>>,
    pub closed: AtomicUsize,
}

impl StubShared {
    /// Let a gated computation finish.
    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn submitted(&self) -> Vec<JobParams> {
        self.submitted.lock().unwrap().clone()
    }
}

/// [`ExecutionBackend`] that finishes after one poll and optionally waits
/// for [`StubShared::release`] during submission.
pub struct StubBackend {
    shared: Arc<StubShared>,
}

#[async_trait]
impl ExecutionBackend for StubBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn connect(&self) -> Result<Box<dyn BackendRun>, BackendError> {
        Ok(Box::new(StubRun {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct StubRun {
    shared: Arc<StubShared>,
}

#[async_trait]
impl BackendRun for StubRun {
    async fn upload(&mut self, input: &Path) -> Result<(), BackendError> {
        self.shared.uploads.lock().unwrap().push(input.to_path_buf());
        Ok(())
    }

    async fn submit(&mut self, params: &JobParams) -> Result<JobHandle, BackendError> {
        self.shared.submitted.lock().unwrap().push(*params);
        if self.shared.gated {
            self.shared.release.notified().await;
        }
        Ok(JobHandle::new("4242"))
    }

    async fn poll(&mut self, _handle: &JobHandle) -> Result<Liveness, BackendError> {
        Ok(Liveness::Finished)
    }

    async fn fetch(&mut self, _handle: &JobHandle, dest: &Path) -> Result<(), BackendError> {
        match &self.shared.result {
            StubResult::Produces(bytes) => {
                tokio::fs::write(dest, bytes).await?;
                Ok(())
            }
            StubResult::Nothing => Err(BackendError::ResultMissing("stub produced nothing".into())),
        }
    }

    async fn close(self: Box<Self>) {
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Viewer launcher that only counts invocations.
#[derive(Default)]
pub struct CountingLauncher {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ViewerLauncher for CountingLauncher {
    async fn launch(&self, _result: &Path) -> Result<(), ViewerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Test app
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub backend: Arc<StubShared>,
    pub launcher: Arc<CountingLauncher>,
    pub upload_dir: PathBuf,
    pub download_dir: PathBuf,
    _dirs: tempfile::TempDir,
}

impl TestApp {
    pub fn app(&self) -> Router {
        self.router.clone()
    }

    /// File names currently in `dir`, sorted.
    pub fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

/// Build a test `ServerConfig` rooted in `root`.
pub fn test_config(root: &Path) -> ServerConfig {
    let vars: HashMap<&str, String> = HashMap::from([
        ("HOST", "127.0.0.1".to_string()),
        ("PORT", "0".to_string()),
        ("REQUEST_TIMEOUT_SECS", "30".to_string()),
        ("UPLOAD_DIR", root.join("uploads").display().to_string()),
        ("DOWNLOAD_DIR", root.join("downloads").display().to_string()),
        ("LOCAL_WORKSPACE", root.join("workspace").display().to_string()),
        ("POLL_INTERVAL_SECS", "1".to_string()),
    ]);
    ServerConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// Build the full application router around a stub backend.
///
/// Uses the same router builder as `main.rs`, so tests exercise the real
/// middleware stack.
pub async fn build_test_app(result: StubResult, gated: bool) -> TestApp {
    let dirs = tempfile::tempdir().unwrap();
    let config = test_config(dirs.path());

    let shared = Arc::new(StubShared {
        result,
        gated,
        release: Notify::new(),
        submitted: Mutex::new(Vec::new()),
        uploads: Mutex::new(Vec::new()),
        closed: AtomicUsize::new(0),
    });
    let backend = Arc::new(StubBackend {
        shared: Arc::clone(&shared),
    });
    let launcher = Arc::new(CountingLauncher::default());

    let state = AppState::new(
        config.clone(),
        backend,
        launcher.clone(),
        CancellationToken::new(),
    );
    state.staging().ensure().await.unwrap();

    TestApp {
        router: build_app_router(state.clone(), &config),
        state,
        backend: shared,
        launcher,
        upload_dir: config.upload_dir.clone(),
        download_dir: config.download_dir.clone(),
        _dirs: dirs,
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Builder for a `multipart/form-data` body.
#[derive(Default)]
pub struct MultipartBody {
    buf: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.buf.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, data: &[u8]) -> Self {
        self.buf.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: video/mp4\r\n\r\n"
            )
            .as_bytes(),
        );
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.buf
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.buf
    }
}

/// A multipart upload carrying only a video.
pub fn video_upload(file_name: &str, data: &[u8]) -> Vec<u8> {
    MultipartBody::new().file("video", file_name, data).finish()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_multipart(app: Router, uri: &str, body: Vec<u8>) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Current `status` label from `GET /status`.
pub async fn status_label(app: Router) -> String {
    let json = body_json(get(app, "/status").await).await;
    json["status"].as_str().unwrap().to_string()
}

/// Poll `GET /status` until it reports `expected`, for up to five seconds.
pub async fn wait_for_status(app: &Router, expected: &str) {
    for _ in 0..500 {
        if status_label(app.clone()).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("status never became '{expected}'");
}
