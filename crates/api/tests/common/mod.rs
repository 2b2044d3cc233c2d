#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{self, post};
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use illustrify_api::app::build_router;
use illustrify_api::config::ServerConfig;
use illustrify_api::state::AppState;
use illustrify_api::templates::{WorkflowCatalog, WorkflowKind, WorkflowTemplate};
use illustrify_comfyui::{WatchStrategy, WatcherConfig};
use illustrify_core::workflow::Workflow;

/// Build a test `ServerConfig` pointing at `comfyui_url`.
///
/// Short timings so failures surface quickly. The fake executor has no
/// `/ws`, so `auto` falls back to polling.
pub fn test_config(comfyui_url: &str) -> ServerConfig {
    let mut comfyui = WatcherConfig::from_api_url(comfyui_url);
    comfyui.strategy = WatchStrategy::Auto;
    comfyui.timeout = Duration::from_secs(5);
    comfyui.poll_interval = Duration::from_millis(20);

    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        workflow_dir: PathBuf::from("workflows"),
        comfyui,
    }
}

/// Minimal templates with the node ids the built-in bindings expect.
pub fn test_catalog() -> WorkflowCatalog {
    let docs = [
        (
            WorkflowKind::TextToImage,
            json!({
                "100": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}},
                "139": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}},
                "136": {"class_type": "EmptyLatentImage", "inputs": {"width": 0, "height": 0}},
                "137": {"class_type": "KSampler", "inputs": {"seed": 0, "steps": 0, "cfg": 0}},
                "9": {"class_type": "SaveImage", "inputs": {}}
            }),
        ),
        (
            WorkflowKind::ImageEdit,
            json!({
                "105": {"class_type": "LoadImage", "inputs": {"image": ""}},
                "76": {"class_type": "TextEncodeQwenImageEdit", "inputs": {"prompt": ""}},
                "77": {"class_type": "TextEncodeQwenImageEdit", "inputs": {"prompt": ""}},
                "3": {"class_type": "KSampler", "inputs": {"seed": 0, "steps": 0, "cfg": 0}}
            }),
        ),
        (
            WorkflowKind::ImageToVideo,
            json!({
                "91": {"class_type": "LoadImage", "inputs": {"image": ""}},
                "88": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}},
                "86": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}},
                "89": {
                    "class_type": "WanImageToVideo",
                    "inputs": {"width": 0, "height": 0, "length": 0}
                },
                "81": {
                    "class_type": "KSamplerAdvanced",
                    "inputs": {"noise_seed": 0, "steps": 0, "cfg": 0}
                },
                "82": {
                    "class_type": "KSamplerAdvanced",
                    "inputs": {"noise_seed": 0, "steps": 0, "cfg": 0}
                },
                "62": {"class_type": "VHS_VideoCombine", "inputs": {"frame_rate": 0}}
            }),
        ),
    ];

    let mut catalog = WorkflowCatalog::new();
    for (kind, doc) in docs {
        let workflow = Workflow::from_value(doc).unwrap();
        catalog.insert(WorkflowTemplate::new(kind, workflow, kind.default_bindings()).unwrap());
    }
    catalog
}

/// Build the full application router against `comfyui_url`.
pub fn build_test_app(comfyui_url: &str) -> Router {
    build_router(AppState::new(test_config(comfyui_url), test_catalog()))
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// POST a multipart form with one file part (`image`) and text fields.
pub async fn post_multipart(
    app: Router,
    uri: &str,
    file_name: &str,
    file: &[u8],
    fields: &[(&str, &str)],
) -> Response {
    const BOUNDARY: &str = "illustrify-test-boundary";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"image\"; filename=\"{file_name}\"\r\n\
             Content-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(file);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Fake executor (HTTP only; `/ws` is absent so the watcher polls)
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct ExecutorState {
    outputs: Arc<Value>,
    status: Arc<Value>,
    files: Arc<HashMap<String, Vec<u8>>>,
    submitted: Arc<Mutex<Vec<Value>>>,
    uploads: Arc<Mutex<Vec<String>>>,
}

pub struct FakeExecutor {
    pub url: String,
    submitted: Arc<Mutex<Vec<Value>>>,
    uploads: Arc<Mutex<Vec<String>>>,
}

impl FakeExecutor {
    /// Start an executor that completes every prompt with `outputs`,
    /// serving `files` from `/view`.
    pub async fn start(outputs: Value, files: &[(&str, &[u8])]) -> Self {
        Self::start_with_status(
            outputs,
            json!({"status_str": "success", "completed": true, "messages": []}),
            files,
        )
        .await
    }

    pub async fn start_with_status(outputs: Value, status: Value, files: &[(&str, &[u8])]) -> Self {
        let state = ExecutorState {
            outputs: Arc::new(outputs),
            status: Arc::new(status),
            files: Arc::new(
                files
                    .iter()
                    .map(|(name, data)| (name.to_string(), data.to_vec()))
                    .collect(),
            ),
            submitted: Arc::new(Mutex::new(Vec::new())),
            uploads: Arc::new(Mutex::new(Vec::new())),
        };
        let submitted = Arc::clone(&state.submitted);
        let uploads = Arc::clone(&state.uploads);

        let app = Router::new()
            .route("/prompt", post(submit))
            .route("/history/{prompt_id}", routing::get(history))
            .route("/view", routing::get(view))
            .route("/upload/image", post(upload))
            .route("/interrupt", post(|| async { StatusCode::OK }))
            .route("/system_stats", routing::get(|| async { Json(json!({"devices": []})) }))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url,
            submitted,
            uploads,
        }
    }

    /// Job documents received so far.
    pub fn submitted(&self) -> Vec<Value> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

/// An address nothing listens on.
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn submit(State(state): State<ExecutorState>, Json(body): Json<Value>) -> Json<Value> {
    state.submitted.lock().unwrap().push(body["prompt"].clone());
    Json(json!({"prompt_id": body["prompt_id"], "number": 0, "node_errors": {}}))
}

async fn history(State(state): State<ExecutorState>, Path(prompt_id): Path<String>) -> Json<Value> {
    Json(json!({
        prompt_id: {"status": state.status.as_ref(), "outputs": state.outputs.as_ref()}
    }))
}

async fn view(
    State(state): State<ExecutorState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let filename = params.get("filename").cloned().unwrap_or_default();
    match state.files.get(&filename) {
        Some(bytes) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn upload(State(state): State<ExecutorState>, mut multipart: Multipart) -> Json<Value> {
    let mut name = String::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() == Some("image") {
            name = field.file_name().unwrap_or("upload.png").to_string();
            let _ = field.bytes().await.unwrap();
        }
    }
    state.uploads.lock().unwrap().push(name.clone());
    Json(json!({"name": name, "subfolder": "", "type": "input"}))
}
