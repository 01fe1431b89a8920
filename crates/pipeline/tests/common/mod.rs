//! Minimal mock ComfyUI for end-to-end generation tests.
//!
//! Every WebSocket connection receives one `executed` event for node `16`
//! of prompt `p-1`; `/history/p-1` reports the same image.

#![allow(dead_code)]

use std::io::Cursor;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use nesupixel_core::config::ComfyConfig;

pub const PROMPT_ID: &str = "p-1";
pub const OUTPUT_FILE: &str = "NESUPixel_00001_.png";

#[derive(Clone, Default)]
pub struct MockState {
    pub prompts: Arc<Mutex<Vec<Value>>>,
    pub interrupts: Arc<AtomicUsize>,
    pub views: Arc<AtomicUsize>,
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

    pub fn posted_workflow(&self) -> Value {
        self.state.prompts.lock().unwrap()[0]["prompt"].clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Wait (briefly) until `/interrupt` has been hit `expected` times.
    pub async fn wait_for_interrupts(&self, expected: usize) -> bool {
        for _ in 0..50 {
            if Self::count(&self.state.interrupts) >= expected {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        false
    }
}

/// Directory layout of one test run.
pub struct Workspace {
    pub root: tempfile::TempDir,
}

impl Workspace {
    /// Creates `workflows/txt2img.json` and `workflows/inpaint.json`.
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let workflows = root.path().join("workflows");
        std::fs::create_dir_all(&workflows).unwrap();
        std::fs::write(workflows.join("txt2img.json"), txt2img_template().to_string()).unwrap();
        std::fs::write(workflows.join("inpaint.json"), inpaint_template().to_string()).unwrap();
        Self { root }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    pub fn config(&self, api_url: &str) -> ComfyConfig {
        let vars = [
            ("COMFY_API_URL", api_url.to_string()),
            ("WORKFLOW_DIR", self.path("workflows").display().to_string()),
            ("COMFY_OUTPUT_DIR", self.path("comfy/output/NESUPixel").display().to_string()),
            ("COMFY_INPUT_DIR", self.path("comfy/input/NESUPixel").display().to_string()),
            ("DOWNLOAD_DIR", self.path("downloads").display().to_string()),
            ("TRACK_TIMEOUT_SECS", "5".to_string()),
            ("HISTORY_RETRY_DELAY_MS", "50".to_string()),
        ];
        ComfyConfig::from_lookup(|key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
        })
        .unwrap()
    }
}

pub fn txt2img_template() -> Value {
    json!({
        "1": {"class_type": "PrimitiveString", "inputs": {"string": ""}},
        "2": {"class_type": "PrimitiveString", "inputs": {"string": ""}},
        "3": {"class_type": "PrimitiveInt", "inputs": {"int": 1024}},
        "4": {"class_type": "PrimitiveInt", "inputs": {"int": 1024}},
        "6": {"class_type": "LoraLoader", "inputs": {"lora_name": "none.safetensors", "strength_model": 1.0, "strength_clip": 1.0}},
        "8": {"class_type": "KSampler", "inputs": {"seed": 0, "steps": 20}},
        "16": {"class_type": "SaveImage", "inputs": {"filename_prefix": "NESUPixel/Txt2Img"}}
    })
}

pub fn inpaint_template() -> Value {
    json!({
        "1": {"class_type": "PrimitiveString", "inputs": {"string": ""}},
        "2": {"class_type": "PrimitiveString", "inputs": {"string": ""}},
        "3": {"class_type": "LoadImage", "inputs": {"image": "example.png"}},
        "4": {"class_type": "LoadImageMask", "inputs": {"image": "example.png", "channel": "red"}},
        "6": {"class_type": "LoraLoader", "inputs": {"lora_name": "none.safetensors"}},
        "8": {"class_type": "KSampler", "inputs": {"seed": 0}},
        "16": {"class_type": "SaveImage", "inputs": {"filename_prefix": "NESUPixel/Inpaint"}}
    })
}

pub fn write_png(path: &Path, image: image::DynamicImage) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    image.save_with_format(path, image::ImageFormat::Png).unwrap();
}

pub fn png_bytes() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(2, 2));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn image_output() -> Value {
    json!({"images": [{"filename": OUTPUT_FILE, "subfolder": "", "type": "output"}]})
}

async fn ws_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(handle_socket)
}

async fn handle_socket(socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let executed = json!({
        "type": "executed",
        "data": {"node": "16", "prompt_id": PROMPT_ID, "output": image_output()}
    });
    if sink.send(Message::Text(executed.to_string().into())).await.is_err() {
        return;
    }
    while let Some(Ok(msg)) = stream.next().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }
}

async fn history() -> Json<Value> {
    Json(json!({
        PROMPT_ID: {
            "outputs": {"16": image_output()},
            "status": {"status_str": "success", "completed": true}
        }
    }))
}

async fn interrupt(State(state): State<MockState>) -> StatusCode {
    state.interrupts.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn prompt(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    state.prompts.lock().unwrap().push(body);
    Json(json!({"prompt_id": PROMPT_ID, "number": 1}))
}

async fn view(State(state): State<MockState>) -> impl IntoResponse {
    state.views.fetch_add(1, Ordering::SeqCst);
    ([("content-type", "image/png")], png_bytes())
}
