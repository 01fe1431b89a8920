//! Startup configuration for the ComfyUI client and generation modes.
//!
//! Every value is read once when the process starts and then passed by
//! reference to whoever needs it. Nothing here is mutated afterwards.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CoreError;

/// Connection and tracking settings for one ComfyUI server.
#[derive(Debug, Clone)]
pub struct ComfyConfig {
    /// HTTP base URL, e.g. `http://127.0.0.1:8188`.
    pub api_url: String,
    /// WebSocket base URL, e.g. `ws://127.0.0.1:8188`.
    pub ws_url: String,
    /// Directory ComfyUI writes generated images into, when it is local.
    pub output_dir: PathBuf,
    /// Directory ComfyUI reads `LoadImage` inputs from, when it is local.
    pub input_dir: PathBuf,
    /// Subfolder name used for staged inputs and generated outputs.
    pub subfolder: String,
    /// Directory holding `<name>.json` workflow templates.
    pub workflow_dir: PathBuf,
    /// Directory that artifacts are downloaded into when not found locally.
    pub download_dir: PathBuf,
    /// Path to the LoRA preset catalogue.
    pub lora_presets_path: PathBuf,
    /// Deadline for the live-wait phase of one tracking call.
    pub track_timeout: Duration,
    /// Pause before the single history retry when the first poll is empty.
    pub history_retry_delay: Duration,
    /// Keep-alive ping interval on the live channel.
    pub ws_ping_interval: Duration,
    /// Capacity of the bounded preview frame channel.
    pub preview_channel_capacity: usize,
}

impl ComfyConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                          |
    /// |----------------------------|----------------------------------|
    /// | `COMFY_API_URL`            | `http://127.0.0.1:8188`          |
    /// | `COMFY_WS_URL`             | API URL with `http` -> `ws`      |
    /// | `COMFY_OUTPUT_DIR`         | `output/NESUPixel`               |
    /// | `COMFY_INPUT_DIR`          | `input/NESUPixel`                |
    /// | `COMFY_SUBFOLDER`          | `NESUPixel`                      |
    /// | `WORKFLOW_DIR`             | `workflows`                      |
    /// | `DOWNLOAD_DIR`             | `temp`                           |
    /// | `LORA_PRESETS_PATH`        | `config/lora_presets.json`       |
    /// | `TRACK_TIMEOUT_SECS`       | `15`                             |
    /// | `HISTORY_RETRY_DELAY_MS`   | `2000`                           |
    /// | `WS_PING_INTERVAL_SECS`    | `5`                              |
    /// | `PREVIEW_CHANNEL_CAPACITY` | `16`                             |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads values through
    /// `lookup`, so callers (and tests) can supply their own source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("COMFY_API_URL")
            .unwrap_or_else(|| "http://127.0.0.1:8188".into())
            .trim_end_matches('/')
            .to_string();
        let ws_url = match lookup("COMFY_WS_URL") {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => derive_ws_url(&api_url),
        };
        let subfolder = lookup("COMFY_SUBFOLDER").unwrap_or_else(|| "NESUPixel".into());

        let output_dir = lookup("COMFY_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("output").join(&subfolder));
        let input_dir = lookup("COMFY_INPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("input").join(&subfolder));

        let track_timeout_secs: u64 = nonzero_or(&lookup, "TRACK_TIMEOUT_SECS", 15)?;
        let history_retry_delay_ms: u64 = parse_or(&lookup, "HISTORY_RETRY_DELAY_MS", 2000)?;
        let ws_ping_interval_secs: u64 = nonzero_or(&lookup, "WS_PING_INTERVAL_SECS", 5)?;
        let preview_channel_capacity: usize =
            nonzero_or(&lookup, "PREVIEW_CHANNEL_CAPACITY", 16)?;

        Ok(Self {
            api_url,
            ws_url,
            output_dir,
            input_dir,
            subfolder,
            workflow_dir: lookup("WORKFLOW_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("workflows")),
            download_dir: lookup("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("temp")),
            lora_presets_path: lookup("LORA_PRESETS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config").join("lora_presets.json")),
            track_timeout: Duration::from_secs(track_timeout_secs),
            history_retry_delay: Duration::from_millis(history_retry_delay_ms),
            ws_ping_interval: Duration::from_secs(ws_ping_interval_secs),
            preview_channel_capacity,
        })
    }
}

/// Default values applied to a generation request when the caller omits them.
#[derive(Debug, Clone)]
pub struct GenerationDefaults {
    pub width: u32,
    pub height: u32,
    pub negative_prompt: String,
    pub seed: i64,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            negative_prompt: "blurry, bad anatomy, low quality".into(),
            seed: 0,
        }
    }
}

/// Swap the scheme of an HTTP base URL for its WebSocket counterpart.
///
/// `https://` becomes `wss://`, `http://` becomes `ws://`. Anything else
/// is returned unchanged.
pub fn derive_ws_url(api_url: &str) -> String {
    if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api_url.to_string()
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, CoreError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| CoreError::Config {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

/// Like [`parse_or`], but zero is rejected.
fn nonzero_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, CoreError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let value = parse_or(lookup, key, default)?;
    if value == T::default() {
        return Err(CoreError::Config {
            key,
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }
    Ok(value)
}
