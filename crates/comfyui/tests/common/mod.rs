//! In-process fake ComfyUI executor for integration tests.
//!
//! Serves the subset of the ComfyUI protocol the watcher uses on an
//! ephemeral port. Behaviour is controlled through [`Behavior`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use illustrify_comfyui::{JobWatcher, WatchStrategy, WatcherConfig};

/// How the fake executor responds.
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Outputs index reported once the prompt is complete.
    pub outputs: Value,
    /// Status block reported once the prompt is complete.
    pub status: Value,
    /// History calls answered with a running entry before completion.
    pub running_polls: usize,
    /// History calls answered with 500 before anything else.
    pub history_failures: usize,
    /// Never record the prompt in history and never send the terminal frame.
    pub never_complete: bool,
    /// Serve `/ws`. When false the upgrade fails with 404.
    pub websocket: bool,
    /// Binary preview frames sent before the terminal frame.
    pub binary_frames: usize,
    /// Send a non-JSON text frame after submission.
    pub garbage_frame: bool,
    /// Close the socket before the terminal frame.
    pub close_early: bool,
    /// Reject `/prompt` with this status and body.
    pub reject_submit: Option<(u16, String)>,
    /// Include `prompt_id` in the `/prompt` response.
    pub echo_prompt_id: bool,
    /// Accept `/prompt` but never answer it.
    pub hang_submit: bool,
    /// Stop reading the socket after the scripted frames, so a close
    /// handshake from the client is never answered.
    pub ignore_close: bool,
    /// Files served by `/view`, keyed by filename.
    pub files: HashMap<String, Vec<u8>>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            outputs: json!({
                "100": {"images": [{"filename": "a.png", "subfolder": "", "type": "output"}]}
            }),
            status: json!({"status_str": "success", "completed": true, "messages": []}),
            running_polls: 0,
            history_failures: 0,
            never_complete: false,
            websocket: true,
            binary_frames: 0,
            garbage_frame: false,
            close_early: false,
            reject_submit: None,
            echo_prompt_id: true,
            hang_submit: false,
            ignore_close: false,
            files: HashMap::from([("a.png".to_string(), b"PNGDATA".to_vec())]),
        }
    }
}

/// What the fake executor has observed.
#[derive(Debug, Default)]
pub struct Observed {
    /// `(client_id, prompt_id, prompt)` per accepted submission.
    pub submissions: Vec<(String, String, Value)>,
    pub history_calls: usize,
    pub ws_connections: usize,
    pub interrupts: usize,
    /// `(filename, bytes)` per upload.
    pub uploads: Vec<(String, Vec<u8>)>,
}

#[derive(Clone)]
struct FakeState {
    behavior: Arc<Behavior>,
    observed: Arc<Mutex<Observed>>,
    /// `(client_id, prompt_id)` broadcast on each submission.
    submitted_tx: broadcast::Sender<(String, String)>,
}

pub struct FakeExecutor {
    pub addr: SocketAddr,
    observed: Arc<Mutex<Observed>>,
}

impl FakeExecutor {
    /// Bind to an ephemeral port and start serving.
    pub async fn start(behavior: Behavior) -> Self {
        let (submitted_tx, _) = broadcast::channel(16);
        let websocket = behavior.websocket;
        let state = FakeState {
            behavior: Arc::new(behavior),
            observed: Arc::new(Mutex::new(Observed::default())),
            submitted_tx,
        };
        let observed = Arc::clone(&state.observed);

        let mut router = Router::new()
            .route("/prompt", post(submit))
            .route("/history/{prompt_id}", get(history))
            .route("/view", get(view))
            .route("/upload/image", post(upload))
            .route("/interrupt", post(interrupt))
            .route("/system_stats", get(system_stats));
        if websocket {
            router = router.route("/ws", get(ws_upgrade));
        }
        let app = router.with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, observed }
    }

    pub fn api_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// A watcher pointed at this executor with test-friendly timings.
    pub fn watcher(&self, strategy: WatchStrategy, timeout: Duration) -> JobWatcher {
        let mut config = WatcherConfig::from_api_url(self.api_url());
        config.strategy = strategy;
        config.timeout = timeout;
        config.poll_interval = Duration::from_millis(20);
        JobWatcher::new(config)
    }

    pub fn observed<R>(&self, f: impl FnOnce(&Observed) -> R) -> R {
        f(&self.observed.lock().unwrap())
    }
}

/// An address nothing listens on.
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// A minimal job document.
pub fn sample_workflow() -> Value {
    json!({
        "100": {"class_type": "CLIPTextEncode", "inputs": {"text": "a cat"}},
        "95": {"class_type": "KSampler", "inputs": {"seed": 1}}
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn submit(State(state): State<FakeState>, Json(body): Json<Value>) -> Response {
    if state.behavior.hang_submit {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
    if let Some((status, body)) = &state.behavior.reject_submit {
        let code = StatusCode::from_u16(*status).unwrap();
        return (code, body.clone()).into_response();
    }

    let client_id = body["client_id"].as_str().unwrap_or_default().to_string();
    let prompt_id = body["prompt_id"].as_str().unwrap_or_default().to_string();
    state.observed.lock().unwrap().submissions.push((
        client_id.clone(),
        prompt_id.clone(),
        body["prompt"].clone(),
    ));
    let _ = state.submitted_tx.send((client_id, prompt_id.clone()));

    if state.behavior.echo_prompt_id {
        Json(json!({"prompt_id": prompt_id, "number": 0, "node_errors": {}})).into_response()
    } else {
        Json(json!({"number": 0})).into_response()
    }
}

async fn history(State(state): State<FakeState>, Path(prompt_id): Path<String>) -> Response {
    let behavior = &state.behavior;
    let calls = {
        let mut observed = state.observed.lock().unwrap();
        observed.history_calls += 1;
        let known = observed.submissions.iter().any(|(_, id, _)| *id == prompt_id);
        if !known {
            return Json(json!({})).into_response();
        }
        observed.history_calls
    };

    if calls <= behavior.history_failures {
        return (StatusCode::INTERNAL_SERVER_ERROR, "history unavailable").into_response();
    }
    if behavior.never_complete {
        return Json(json!({})).into_response();
    }
    if calls <= behavior.history_failures + behavior.running_polls {
        return Json(json!({
            prompt_id: {
                "status": {
                    "status_str": null,
                    "completed": false,
                    "messages": [],
                    "current": "137"
                },
                "outputs": {"100": {"images": []}}
            }
        }))
        .into_response();
    }
    Json(json!({
        prompt_id: {"status": behavior.status, "outputs": behavior.outputs}
    }))
    .into_response()
}

async fn view(
    State(state): State<FakeState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let filename = params.get("filename").cloned().unwrap_or_default();
    match state.behavior.files.get(&filename) {
        Some(bytes) => bytes.clone().into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn upload(State(state): State<FakeState>, mut multipart: Multipart) -> Response {
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() != Some("image") {
            continue;
        }
        let name = field.file_name().unwrap_or("upload.png").to_string();
        let bytes = field.bytes().await.unwrap().to_vec();
        state.observed.lock().unwrap().uploads.push((name.clone(), bytes));
        return Json(json!({"name": name, "subfolder": "", "type": "input"})).into_response();
    }
    (StatusCode::BAD_REQUEST, "missing image field").into_response()
}

async fn interrupt(State(state): State<FakeState>) -> StatusCode {
    state.observed.lock().unwrap().interrupts += 1;
    StatusCode::OK
}

async fn system_stats() -> Json<Value> {
    Json(json!({"system": {"os": "posix", "comfyui_version": "0.3.0"}, "devices": []}))
}

async fn ws_upgrade(
    State(state): State<FakeState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let client_id = params.get("clientId").cloned().unwrap_or_default();
    let rx = state.submitted_tx.subscribe();
    state.observed.lock().unwrap().ws_connections += 1;
    ws.on_upgrade(move |socket| stream_job(socket, client_id, rx, state.behavior))
}

async fn stream_job(
    mut socket: WebSocket,
    client_id: String,
    mut rx: broadcast::Receiver<(String, String)>,
    behavior: Arc<Behavior>,
) {
    let _ = socket
        .send(text(json!({
            "type": "status",
            "data": {"status": {"exec_info": {"queue_remaining": 0}}}
        })))
        .await;

    let prompt_id = loop {
        match rx.recv().await {
            Ok((cid, pid)) if cid == client_id => break pid,
            Ok(_) => continue,
            Err(_) => return,
        }
    };

    if behavior.garbage_frame {
        let _ = socket.send(Message::Text("this is not json".into())).await;
    }

    let frames = [
        json!({"type": "execution_start", "data": {"prompt_id": prompt_id}}),
        json!({"type": "crystools.monitor", "data": {"cpu_utilization": 12}}),
        json!({"type": "executing", "data": {"node": "100", "prompt_id": prompt_id}}),
        json!({"type": "progress", "data": {"value": 1, "max": 2, "prompt_id": prompt_id}}),
        json!({"type": "executing", "data": {"node": null, "prompt_id": "someone-else"}}),
        json!({"type": "progress", "data": {"value": 2, "max": 2, "prompt_id": prompt_id}}),
    ];
    for frame in frames {
        let _ = socket.send(text(frame)).await;
    }
    for i in 0..behavior.binary_frames {
        let _ = socket.send(Message::Binary(vec![1, 0, 0, 0, i as u8].into())).await;
    }

    if behavior.close_early {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    if !behavior.never_complete {
        let _ = socket
            .send(text(json!({
                "type": "executing",
                "data": {"node": null, "prompt_id": prompt_id}
            })))
            .await;
    }

    if behavior.ignore_close {
        std::future::pending::<()>().await;
    }
    // Hold the socket open until the client goes away.
    while let Some(Ok(_)) = socket.recv().await {}
}

fn text(value: Value) -> Message {
    Message::Text(value.to_string().into())
}
