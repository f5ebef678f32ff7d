//! In-process mock of the generation backend.
//!
//! Serves the REST task endpoints and the push WebSocket on a loopback
//! port. Tests script what each submitted task reports, watch what the
//! client sent, and push frames or cut sockets at will.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The only token the backend accepts.
pub const TOKEN: &str = "test-token";

// ── State ─────────────────────────────────────────────────────────────────────

/// Status snapshots one task reports, in order. The last one repeats.
struct Script {
    snapshots: Vec<Value>,
    gets: usize,
}

#[derive(Default)]
struct BackendState {
    submitted: AtomicUsize,
    pending_scripts: Mutex<VecDeque<Vec<Value>>>,
    tasks: Mutex<HashMap<String, Script>>,
    submit_failure: Mutex<Option<(i64, String)>>,
    last_submit: Mutex<Option<Value>>,
    listing: Mutex<Vec<Value>>,
    refuse_ws: AtomicBool,
    ws_attempts: AtomicUsize,
    ws_connects: AtomicUsize,
    /// `None` asks the socket task to close.
    sockets: Mutex<Vec<mpsc::UnboundedSender<Option<String>>>>,
    subscribes: Mutex<Vec<String>>,
    heartbeats: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<BackendState>,
    server: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(BackendState::default());
        let app = Router::new()
            .route("/api/v1/images/generate", post(submit))
            .route("/api/v1/images/tasks", get(list_tasks))
            .route("/api/v1/images/tasks/{id}", get(get_task))
            .route("/api/v1/ws/tasks", get(push_socket))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend address");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            addr,
            state,
            server,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    // ── Scripting ─────────────────────────────────────────────────────────────

    /// Snapshots the next submitted task reports on successive status
    /// queries, e.g. `json!({"status": "processing"})`. Unscripted tasks
    /// stay processing forever.
    pub fn script_next(&self, snapshots: Vec<Value>) {
        lock(&self.state.pending_scripts).push_back(snapshots);
    }

    /// Answer the next submission with a business error envelope.
    pub fn fail_next_submit(&self, code: i64, msg: &str) {
        *lock(&self.state.submit_failure) = Some((code, msg.to_string()));
    }

    /// Tasks served by the list endpoint, newest first.
    pub fn set_listing(&self, tasks: Vec<Value>) {
        *lock(&self.state.listing) = tasks;
    }

    /// Reject push upgrades until cleared.
    pub fn set_refuse_ws(&self, refuse: bool) {
        self.state.refuse_ws.store(refuse, Ordering::SeqCst);
    }

    /// Send a frame to every open push socket.
    pub fn push(&self, frame: Value) {
        let text = frame.to_string();
        lock(&self.state.sockets).retain(|tx| tx.send(Some(text.clone())).is_ok());
    }

    /// Close every open push socket from the server side.
    pub fn drop_sockets(&self) {
        for tx in lock(&self.state.sockets).drain(..) {
            let _ = tx.send(None);
        }
    }

    // ── Observations ──────────────────────────────────────────────────────────

    pub fn submits(&self) -> usize {
        self.state.submitted.load(Ordering::SeqCst)
    }

    pub fn last_submit(&self) -> Option<Value> {
        lock(&self.state.last_submit).clone()
    }

    pub fn gets(&self, task_id: &str) -> usize {
        lock(&self.state.tasks).get(task_id).map_or(0, |s| s.gets)
    }

    pub fn ws_attempts(&self) -> usize {
        self.state.ws_attempts.load(Ordering::SeqCst)
    }

    pub fn ws_connects(&self) -> usize {
        self.state.ws_connects.load(Ordering::SeqCst)
    }

    pub fn open_sockets(&self) -> usize {
        lock(&self.state.sockets)
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    pub fn subscribes(&self) -> Vec<String> {
        lock(&self.state.subscribes).clone()
    }

    pub fn heartbeats(&self) -> usize {
        self.state.heartbeats.load(Ordering::SeqCst)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

// ── REST handlers ─────────────────────────────────────────────────────────────

fn authorized(headers: &HeaderMap) -> Result<(), Response> {
    let expected = format!("Bearer {TOKEN}");
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Not authenticated" })),
        )
            .into_response()),
    }
}

fn ok(data: Value) -> Response {
    Json(json!({ "code": 200, "data": data, "msg": "ok" })).into_response()
}

/// `snapshot` with the task id filled in.
fn with_id(task_id: &str, snapshot: &Value) -> Value {
    let mut task = json!({ "task_id": task_id });
    if let (Some(task), Some(fields)) = (task.as_object_mut(), snapshot.as_object()) {
        task.extend(fields.clone());
    }
    task
}

async fn submit(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    *lock(&state.last_submit) = Some(body);
    if let Some((code, msg)) = lock(&state.submit_failure).take() {
        return Json(json!({ "code": code, "data": null, "msg": msg })).into_response();
    }

    let n = state.submitted.fetch_add(1, Ordering::SeqCst) + 1;
    let task_id = format!("task-{n}");
    let snapshots = lock(&state.pending_scripts)
        .pop_front()
        .unwrap_or_else(|| vec![json!({ "status": "processing" })]);
    lock(&state.tasks).insert(task_id.clone(), Script { snapshots, gets: 0 });

    ok(json!({
        "task_id": task_id,
        "status": "queued",
        "created_at": "2026-10-16T09:00:00.123456",
    }))
}

async fn get_task(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    let mut tasks = lock(&state.tasks);
    let Some(script) = tasks.get_mut(&task_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "Task not found" })),
        )
            .into_response();
    };
    let at = script.gets.min(script.snapshots.len().saturating_sub(1));
    script.gets += 1;
    let snapshot = script.snapshots.get(at).cloned().unwrap_or(Value::Null);
    ok(with_id(&task_id, &snapshot))
}

async fn list_tasks(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    let page: usize = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let page_size: usize = query
        .get("page_size")
        .and_then(|p| p.parse().ok())
        .unwrap_or(20);
    let status = query.get("status");

    let matching: Vec<Value> = lock(&state.listing)
        .iter()
        .filter(|t| status.map_or(true, |s| t["status"].as_str() == Some(s.as_str())))
        .cloned()
        .collect();
    let data: Vec<Value> = matching
        .iter()
        .skip(page.saturating_sub(1) * page_size)
        .take(page_size)
        .cloned()
        .collect();
    ok(json!({
        "data": data,
        "total": matching.len(),
        "page": page,
        "page_size": page_size,
    }))
}

// ── Push socket ───────────────────────────────────────────────────────────────

async fn push_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BackendState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.ws_attempts.fetch_add(1, Ordering::SeqCst);
    let token_ok = query.get("token").map(String::as_str) == Some(TOKEN);
    if !token_ok || state.refuse_ws.load(Ordering::SeqCst) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: Arc<BackendState>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    lock(&state.sockets).push(tx);
    state.ws_connects.fetch_add(1, Ordering::SeqCst);

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            out = rx.recv() => match out {
                Some(Some(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(None) | None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = client_frame(&state, text.as_str()) {
                        if sink.send(Message::Text(reply.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Record a client frame and build the server's reply.
fn client_frame(state: &BackendState, text: &str) -> Option<String> {
    let frame: Value = serde_json::from_str(text).ok()?;
    match frame["type"].as_str()? {
        "subscribe" => {
            let task_id = frame["task_id"].as_str()?.to_string();
            lock(&state.subscribes).push(task_id.clone());
            Some(json!({ "type": "subscribed", "task_id": task_id }).to_string())
        }
        "heartbeat" => {
            state.heartbeats.fetch_add(1, Ordering::SeqCst);
            Some(json!({ "type": "heartbeat" }).to_string())
        }
        _ => None,
    }
}
