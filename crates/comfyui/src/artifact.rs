//! Output artifacts produced by workflow nodes.
//!
//! ComfyUI reports a node's output as an object whose list-valued keys
//! carry the artifacts (`{"images": [...], "text": [...]}`). The same
//! shape appears in live `executed` events and in `/history` records, so
//! both are flattened by [`flatten_node_output`].

use serde::{Deserialize, Serialize};

/// One result unit from one output node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputArtifact {
    /// Output key the entry was listed under, e.g. `images`.
    pub key: String,
    pub payload: ArtifactPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ArtifactPayload {
    Image(ImageRef),
    Text(String),
    Other(serde_json::Value),
}

/// A file ComfyUI wrote, addressable through `/view`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// `output`, `temp` or `input`.
    #[serde(rename = "type", default = "default_folder_type")]
    pub folder_type: String,
}

fn default_folder_type() -> String {
    "output".into()
}

impl ImageRef {
    /// `<base>/view?filename=<f>&subfolder=<s>&type=<t>`, query-escaped.
    pub fn view_url(&self, api_url: &str) -> String {
        let base = api_url.trim_end_matches('/');
        match reqwest::Url::parse(&format!("{base}/view")) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .append_pair("filename", &self.filename)
                    .append_pair("subfolder", &self.subfolder)
                    .append_pair("type", &self.folder_type);
                url.to_string()
            }
            Err(_) => format!(
                "{base}/view?filename={}&subfolder={}&type={}",
                self.filename, self.subfolder, self.folder_type
            ),
        }
    }
}

impl OutputArtifact {
    /// Classify one list entry found under `key`.
    pub fn from_entry(key: &str, entry: &serde_json::Value) -> Self {
        let payload = match entry {
            serde_json::Value::String(text) => ArtifactPayload::Text(text.clone()),
            serde_json::Value::Object(map) if map.get("filename").is_some_and(|f| f.is_string()) => {
                match serde_json::from_value::<ImageRef>(entry.clone()) {
                    Ok(image) => ArtifactPayload::Image(image),
                    Err(_) => ArtifactPayload::Other(entry.clone()),
                }
            }
            other => ArtifactPayload::Other(other.clone()),
        };
        Self {
            key: key.to_string(),
            payload,
        }
    }

    pub fn as_image(&self) -> Option<&ImageRef> {
        match &self.payload {
            ArtifactPayload::Image(image) => Some(image),
            _ => None,
        }
    }
}

/// Flatten a node output object into artifacts.
///
/// Only list-valued keys contribute; scalar and object values are
/// dropped. A non-object output yields nothing.
pub fn flatten_node_output(output: &serde_json::Value) -> Vec<OutputArtifact> {
    let Some(map) = output.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(key, value)| value.as_array().map(|items| (key, items)))
        .flat_map(|(key, items)| items.iter().map(move |item| OutputArtifact::from_entry(key, item)))
        .collect()
}
