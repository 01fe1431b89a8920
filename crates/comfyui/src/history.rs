//! History poller: reads the durable execution record for a prompt.
//!
//! `GET /history/{prompt_id}` answers
//! `{"<prompt_id>": {"outputs": {"<node>": {"images": [...]}}, "status": {...}}}`
//! once the prompt has run, and `{}` before that. Polling is best-effort:
//! any failure is logged and reported as "nothing yet".

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::api::ComfyUIApi;
use crate::artifact::{flatten_node_output, OutputArtifact};
use crate::session::WatchSet;

/// Node outputs keyed by node id.
pub type NodeOutputs = BTreeMap<String, Vec<OutputArtifact>>;

/// One prompt's entry in the history response.
#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    outputs: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    status: Option<HistoryStatus>,
}

#[derive(Debug, Deserialize)]
struct HistoryStatus {
    #[serde(default)]
    status_str: Option<String>,
    #[serde(default)]
    completed: bool,
}

/// Queries `/history` for watched node outputs.
#[derive(Debug, Clone)]
pub struct HistoryPoller {
    api: ComfyUIApi,
}

impl HistoryPoller {
    pub fn new(api: ComfyUIApi) -> Self {
        Self { api }
    }

    /// Fetch outputs for the watched nodes of `prompt_id`.
    ///
    /// Nodes missing from the record are omitted. A transport failure, a
    /// non-2xx status or an unreadable body all yield an empty map.
    pub async fn poll(&self, prompt_id: &str, watch: &WatchSet) -> NodeOutputs {
        match self.api.get_history(prompt_id).await {
            Ok(body) => {
                let outputs = extract_outputs(&body, prompt_id, watch);
                tracing::debug!(
                    prompt_id = %prompt_id,
                    found = outputs.len(),
                    watched = watch.len(),
                    "History polled",
                );
                outputs
            }
            Err(e) => {
                tracing::warn!(prompt_id = %prompt_id, error = %e, "History poll failed");
                NodeOutputs::new()
            }
        }
    }
}

/// Pick the watched nodes' outputs out of a `/history` response body.
pub fn extract_outputs(body: &serde_json::Value, prompt_id: &str, watch: &WatchSet) -> NodeOutputs {
    let Some(raw_entry) = body.get(prompt_id) else {
        return NodeOutputs::new();
    };

    let entry: HistoryEntry = match serde_json::from_value(raw_entry.clone()) {
        Ok(entry) => entry,
        Err(e) => {
            tracing::warn!(prompt_id = %prompt_id, error = %e, "Unreadable history entry");
            return NodeOutputs::new();
        }
    };

    if let Some(status) = &entry.status {
        tracing::trace!(
            prompt_id = %prompt_id,
            status = ?status.status_str,
            completed = status.completed,
            "History status",
        );
    }

    entry
        .outputs
        .iter()
        .filter(|(node_id, _)| watch.contains(node_id))
        .map(|(node_id, output)| (node_id.clone(), flatten_node_output(output)))
        .collect()
}
