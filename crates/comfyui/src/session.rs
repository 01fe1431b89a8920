//! Identifiers for one submit-and-wait cycle.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

/// One logical client connection to ComfyUI.
///
/// The same `client_id` is sent with `POST /prompt` and used for the
/// `/ws?clientId=` subscription so ComfyUI routes `executed` events for
/// the job back to us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    client_id: String,
}

impl Session {
    /// Start a session with a fresh UUID v4 client id.
    pub fn new() -> Self {
        Self {
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Start a session with a caller-supplied client id.
    pub fn with_id(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// The node ids a tracking call waits on. Fixed once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSet(BTreeSet<String>);

impl WatchSet {
    pub fn new<I, S>(node_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(node_ids.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.0.contains(node_id)
    }

    /// True once every watched node is in `confirmed`.
    pub fn is_satisfied_by(&self, confirmed: &BTreeSet<String>) -> bool {
        self.0.is_subset(confirmed)
    }

    /// True when a single cached batch lists every watched node.
    pub fn is_covered_by(&self, cached: &[String]) -> bool {
        self.0.iter().all(|id| cached.iter().any(|c| c == id))
    }

    /// Watched nodes not present in `keys`.
    pub fn missing_from<'a, I>(&self, keys: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let present: BTreeSet<&String> = keys.into_iter().collect();
        self.0
            .iter()
            .filter(|id| !present.contains(id))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A submitted generation request.
#[derive(Debug, Clone)]
pub struct Job {
    /// Server-assigned prompt id.
    pub prompt_id: String,
    /// Nodes whose outputs the caller needs.
    pub watch: WatchSet,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(prompt_id: impl Into<String>, watch: WatchSet) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            watch,
            submitted_at: Utc::now(),
        }
    }
}
