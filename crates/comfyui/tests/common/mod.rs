//! In-process mock ComfyUI server for integration tests.
//!
//! Serves `/ws`, `/history/{id}`, `/interrupt`, `/prompt` and `/view`
//! on `127.0.0.1:0`. Each WebSocket connection plays the next scripted
//! list of [`Step`]s, then stays open until the client closes it.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use nesupixel_comfyui::reconnect::ReconnectConfig;
use nesupixel_comfyui::{ComfyUIApi, ComfyUIClient, CompletionTracker, TrackerConfig};

pub const PROMPT_ID: &str = "p-1";

#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    Binary(Vec<u8>),
    Sleep(Duration),
    Close,
}

#[derive(Clone, Default)]
pub struct MockState {
    scripts: Arc<Mutex<VecDeque<Vec<Step>>>>,
    history: Arc<Mutex<VecDeque<Value>>>,
    history_status: Arc<Mutex<Option<StatusCode>>>,
    interrupt_reply: Arc<Mutex<Option<(Duration, StatusCode)>>>,
    pub history_hits: Arc<AtomicUsize>,
    pub interrupts: Arc<AtomicUsize>,
    pub ws_connections: Arc<AtomicUsize>,
    pub ws_closed_by_client: Arc<AtomicUsize>,
    pub client_ids: Arc<Mutex<Vec<String>>>,
    pub inbound_texts: Arc<Mutex<Vec<String>>>,
    pub prompts: Arc<Mutex<Vec<Value>>>,
}

impl MockState {
    /// Queue the frames the next WebSocket connection will receive.
    pub fn push_script(&self, steps: Vec<Step>) -> &Self {
        self.scripts.lock().unwrap().push_back(steps);
        self
    }

    /// Queue a `/history` body. The last queued body is repeated.
    pub fn push_history(&self, body: Value) -> &Self {
        self.history.lock().unwrap().push_back(body);
        self
    }

    pub fn fail_history_with(&self, status: StatusCode) {
        *self.history_status.lock().unwrap() = Some(status);
    }

    /// Make `/interrupt` wait `delay` before answering with `status`.
    pub fn answer_interrupt_with(&self, delay: Duration, status: StatusCode) {
        *self.interrupt_reply.lock().unwrap() = Some((delay, status));
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct MockComfy {
    pub addr: SocketAddr,
    pub state: MockState,
}

impl MockComfy {
    pub async fn start() -> Self {
        let state = MockState::default();
        let app = Router::new()
            .route("/ws", get(ws_handler))
            .route("/history/{prompt_id}", get(history))
            .route("/interrupt", post(interrupt))
            .route("/prompt", post(prompt))
            .route("/view", get(view))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn api_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn tracker(&self, deadline: Duration) -> CompletionTracker {
        CompletionTracker::new(
            ComfyUIClient::new(self.ws_url()),
            ComfyUIApi::new(self.api_url()),
            TrackerConfig {
                deadline,
                history_retry_delay: Duration::from_millis(100),
                ping_interval: Duration::from_secs(5),
                reconnect: ReconnectConfig {
                    initial_delay: Duration::from_millis(50),
                    max_delay: Duration::from_millis(200),
                    multiplier: 2.0,
                },
            },
        )
    }

    /// Wait (briefly) until `/interrupt` has been hit `expected` times.
    pub async fn wait_for_interrupts(&self, expected: usize) -> bool {
        for _ in 0..50 {
            if MockState::count(&self.state.interrupts) >= expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    /// Wait (briefly) until the client has sent a close frame.
    pub async fn wait_for_client_close(&self, expected: usize) -> bool {
        for _ in 0..50 {
            if MockState::count(&self.state.ws_closed_by_client) >= expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

#[derive(Deserialize)]
struct WsQuery {
    #[serde(rename = "clientId")]
    client_id: String,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<MockState>,
) -> impl IntoResponse {
    state.client_ids.lock().unwrap().push(query.client_id);
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: MockState) {
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    let script = state.scripts.lock().unwrap().pop_front().unwrap_or_default();
    let (mut sink, mut stream) = socket.split();

    let reader_state = state.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    let text = text.as_str().to_string();
                    reader_state.inbound_texts.lock().unwrap().push(text);
                }
                Message::Close(_) => {
                    reader_state.ws_closed_by_client.fetch_add(1, Ordering::SeqCst);
                    break;
                }
                _ => {}
            }
        }
    });

    for step in script {
        let sent = match step {
            Step::Text(text) => sink.send(Message::Text(text.into())).await,
            Step::Binary(bytes) => sink.send(Message::Binary(bytes.into())).await,
            Step::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            Step::Close => {
                let _ = sink.close().await;
                reader.abort();
                return;
            }
        };
        if sent.is_err() {
            break;
        }
    }

    let _ = reader.await;
}

async fn history(Path(_prompt_id): Path<String>, State(state): State<MockState>) -> Response {
    state.history_hits.fetch_add(1, Ordering::SeqCst);
    if let Some(status) = *state.history_status.lock().unwrap() {
        return (status, "history unavailable").into_response();
    }

    let mut queue = state.history.lock().unwrap();
    let body = if queue.len() > 1 {
        queue.pop_front().unwrap_or_else(|| json!({}))
    } else {
        queue.front().cloned().unwrap_or_else(|| json!({}))
    };
    Json(body).into_response()
}

async fn interrupt(State(state): State<MockState>) -> StatusCode {
    state.interrupts.fetch_add(1, Ordering::SeqCst);
    let reply = *state.interrupt_reply.lock().unwrap();
    match reply {
        Some((delay, status)) => {
            tokio::time::sleep(delay).await;
            status
        }
        None => StatusCode::OK,
    }
}

async fn prompt(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    state.prompts.lock().unwrap().push(body);
    Json(json!({"prompt_id": PROMPT_ID, "number": 1, "node_errors": {}}))
}

async fn view() -> impl IntoResponse {
    ([("content-type", "image/png")], png_bytes(2, 2))
}

// ---- message builders ----

pub fn executed(node: &str, prompt_id: &str, filename: &str) -> Step {
    Step::Text(
        json!({
            "type": "executed",
            "data": {
                "node": node,
                "prompt_id": prompt_id,
                "output": {"images": [{"filename": filename, "subfolder": "", "type": "output"}]}
            }
        })
        .to_string(),
    )
}

pub fn cached(prompt_id: &str, nodes: &[&str]) -> Step {
    Step::Text(
        json!({"type": "execution_cached", "data": {"prompt_id": prompt_id, "nodes": nodes}})
            .to_string(),
    )
}

pub fn status(queue_remaining: i64) -> Step {
    Step::Text(
        json!({
            "type": "status",
            "data": {"status": {"exec_info": {"queue_remaining": queue_remaining}}, "sid": "mock"}
        })
        .to_string(),
    )
}

pub fn binary_preview() -> Step {
    let mut frame = vec![0, 0, 0, 1, 0, 0, 0, 2];
    frame.extend(png_bytes(8, 8));
    Step::Binary(frame)
}

pub fn history_with(prompt_id: &str, nodes: &[(&str, &str)]) -> Value {
    let outputs: serde_json::Map<String, Value> = nodes
        .iter()
        .map(|(node, filename)| {
            (
                node.to_string(),
                json!({"images": [{"filename": filename, "subfolder": "", "type": "output"}]}),
            )
        })
        .collect();
    json!({
        prompt_id: {
            "prompt": [],
            "outputs": outputs,
            "status": {"status_str": "success", "completed": true, "messages": []}
        }
    })
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}
