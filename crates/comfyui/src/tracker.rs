//! Completion tracker: answers "are the nodes I care about done yet".
//!
//! A tracking call moves through
//!
//! ```text
//! Waiting ──▶ Confirmed | TimedOut | QueueDrained ──▶ Resolved
//! ```
//!
//! The live listener only decides *when* to stop waiting. The answer
//! itself always comes from `/history`, polled once after the wait (plus
//! one delayed retry when that first poll is empty), so everything
//! returned is backed by the durable record.

use std::collections::BTreeSet;
use std::time::Duration;

use nesupixel_core::config::ComfyConfig;
use serde::Serialize;

use crate::api::ComfyUIApi;
use crate::artifact::{ImageRef, OutputArtifact};
use crate::client::ComfyUIClient;
use crate::history::{HistoryPoller, NodeOutputs};
use crate::listener::{ListenerHandle, ListenerOptions, Termination};
use crate::preview::PreviewSink;
use crate::reconnect::ReconnectConfig;
use crate::session::{Job, Session};

/// Default deadline for the live-wait phase.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(15);

/// Default pause before re-polling an empty history.
pub const DEFAULT_HISTORY_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Tracker-wide settings.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub deadline: Duration,
    pub history_retry_delay: Duration,
    pub ping_interval: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            history_retry_delay: DEFAULT_HISTORY_RETRY_DELAY,
            ping_interval: Duration::from_secs(5),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl From<&ComfyConfig> for TrackerConfig {
    fn from(config: &ComfyConfig) -> Self {
        Self {
            deadline: config.track_timeout,
            history_retry_delay: config.history_retry_delay,
            ping_interval: config.ws_ping_interval,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct TrackOptions {
    /// Overrides [`TrackerConfig::deadline`] for this call.
    pub deadline: Option<Duration>,
    /// Ask ComfyUI to interrupt once the watched outputs are confirmed.
    pub cancel_on_ready: bool,
    /// Where decoded preview frames go.
    pub preview: Option<PreviewSink>,
}

/// Where a tracking call is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    Waiting,
    Confirmed,
    TimedOut,
    QueueDrained,
    Resolved,
}

impl From<Termination> for TrackingState {
    fn from(termination: Termination) -> Self {
        match termination {
            Termination::AllExecuted | Termination::AllCached => TrackingState::Confirmed,
            Termination::QueueDrained => TrackingState::QueueDrained,
        }
    }
}

/// Final answer of a tracking call.
///
/// `outputs` only holds watched nodes found in the execution record; an
/// empty map means nothing was confirmed in time. `unresolved` lists the
/// watched nodes that are missing.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingResult {
    pub outputs: NodeOutputs,
    pub unresolved: BTreeSet<String>,
    /// How the live wait ended before resolution.
    pub wait_outcome: TrackingState,
}

impl TrackingResult {
    pub fn get(&self, node_id: &str) -> Option<&[OutputArtifact]> {
        self.outputs.get(node_id).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// First image artifact produced by `node_id`.
    pub fn first_image(&self, node_id: &str) -> Option<&ImageRef> {
        self.get(node_id)?.iter().find_map(OutputArtifact::as_image)
    }
}

/// Combines the live listener and the history poller for one ComfyUI
/// server. Cheap to clone; each [`track`](Self::track) call is independent.
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    client: ComfyUIClient,
    api: ComfyUIApi,
    poller: HistoryPoller,
    config: TrackerConfig,
}

impl CompletionTracker {
    pub fn new(client: ComfyUIClient, api: ComfyUIApi, config: TrackerConfig) -> Self {
        let poller = HistoryPoller::new(api.clone());
        Self {
            client,
            api,
            poller,
            config,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Wait for `job`'s watched nodes and return their outputs.
    ///
    /// The listener runs on its own task; this call only waits on its
    /// one-shot verdict, bounded by the deadline. The subscription is torn
    /// down before history is polled, whatever ended the wait.
    pub async fn track(&self, session: &Session, job: &Job, options: TrackOptions) -> TrackingResult {
        if job.watch.is_empty() {
            return TrackingResult {
                outputs: NodeOutputs::new(),
                unresolved: BTreeSet::new(),
                wait_outcome: TrackingState::Resolved,
            };
        }

        let deadline = options.deadline.unwrap_or(self.config.deadline);
        let wait_outcome = self.wait_live(session, job, deadline, options).await;

        tracing::debug!(prompt_id = %job.prompt_id, state = ?wait_outcome, "Resolving from history");
        let outputs = self.resolve(job).await;
        let unresolved = job.watch.missing_from(outputs.keys());

        tracing::info!(
            prompt_id = %job.prompt_id,
            wait_outcome = ?wait_outcome,
            found = outputs.len(),
            unresolved = unresolved.len(),
            since_submit_ms = (chrono::Utc::now() - job.submitted_at).num_milliseconds(),
            "Tracking resolved",
        );

        TrackingResult {
            outputs,
            unresolved,
            wait_outcome,
        }
    }

    /// Live phase: `Waiting` until the listener reports or the deadline passes.
    async fn wait_live(
        &self,
        session: &Session,
        job: &Job,
        deadline: Duration,
        options: TrackOptions,
    ) -> TrackingState {
        let deadline_at = tokio::time::Instant::now() + deadline;

        let mut listener = ListenerHandle::spawn(
            self.client.clone(),
            self.api.clone(),
            session.clone(),
            job,
            ListenerOptions {
                cancel_on_ready: options.cancel_on_ready,
                ping_interval: self.config.ping_interval,
                reconnect: self.config.reconnect.clone(),
                preview: options.preview,
            },
        );
        tracing::debug!(
            prompt_id = %job.prompt_id,
            watched = job.watch.len(),
            deadline_ms = deadline.as_millis() as u64,
            state = ?TrackingState::Waiting,
            "Tracking started",
        );

        let outcome = match tokio::time::timeout_at(deadline_at, listener.wait()).await {
            Ok(Some(signal)) => {
                tracing::debug!(
                    prompt_id = %job.prompt_id,
                    termination = ?signal.termination,
                    live_nodes = ?signal.live_outputs.keys().collect::<Vec<_>>(),
                    "Listener reported",
                );
                TrackingState::from(signal.termination)
            }
            Ok(None) => {
                tracing::warn!(prompt_id = %job.prompt_id, "Listener ended without a verdict");
                TrackingState::TimedOut
            }
            Err(_) => {
                tracing::info!(prompt_id = %job.prompt_id, "No completion signal before deadline");
                TrackingState::TimedOut
            }
        };

        listener.shutdown().await;
        outcome
    }

    /// Poll history, retrying once after a short pause if it is empty.
    async fn resolve(&self, job: &Job) -> NodeOutputs {
        let outputs = self.poller.poll(&job.prompt_id, &job.watch).await;
        if !outputs.is_empty() {
            return outputs;
        }

        tracing::debug!(
            prompt_id = %job.prompt_id,
            delay_ms = self.config.history_retry_delay.as_millis() as u64,
            "History empty, retrying once",
        );
        tokio::time::sleep(self.config.history_retry_delay).await;
        self.poller.poll(&job.prompt_id, &job.watch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::WatchSet;

    #[test]
    fn termination_maps_to_state() {
        assert_eq!(TrackingState::from(Termination::AllExecuted), TrackingState::Confirmed);
        assert_eq!(TrackingState::from(Termination::AllCached), TrackingState::Confirmed);
        assert_eq!(TrackingState::from(Termination::QueueDrained), TrackingState::QueueDrained);
    }

    #[tokio::test]
    async fn empty_watch_set_resolves_immediately() {
        let tracker = CompletionTracker::new(
            ComfyUIClient::new("ws://127.0.0.1:9"),
            ComfyUIApi::new("http://127.0.0.1:9"),
            TrackerConfig::default(),
        );
        let job = Job::new("p-1", WatchSet::default());

        let result = tracker.track(&Session::new(), &job, TrackOptions::default()).await;
        assert!(result.is_empty());
        assert!(result.is_complete());
        assert_eq!(result.wait_outcome, TrackingState::Resolved);
    }

    #[tokio::test]
    async fn unreachable_server_times_out_to_empty() {
        let tracker = CompletionTracker::new(
            ComfyUIClient::new("ws://127.0.0.1:9"),
            ComfyUIApi::new("http://127.0.0.1:9"),
            TrackerConfig {
                deadline: Duration::from_millis(300),
                history_retry_delay: Duration::from_millis(50),
                ..Default::default()
            },
        );
        let job = Job::new("p-1", WatchSet::new(["16"]));

        let started = std::time::Instant::now();
        let result = tracker.track(&Session::new(), &job, TrackOptions::default()).await;

        assert!(result.is_empty());
        assert_eq!(result.wait_outcome, TrackingState::TimedOut);
        assert_eq!(result.unresolved.iter().collect::<Vec<_>>(), vec!["16"]);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
