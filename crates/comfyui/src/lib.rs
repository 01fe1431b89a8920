//! ComfyUI client library.
//!
//! Submits workflows over REST, follows their completion over the
//! WebSocket live channel with `/history` as the source of truth, and
//! forwards preview frames while a job runs.
//!
//! The entry point is [`CompletionTracker::track`](tracker::CompletionTracker::track).

pub mod api;
pub mod artifact;
pub mod client;
pub mod history;
pub mod listener;
pub mod messages;
pub mod preview;
pub mod reconnect;
pub mod session;
pub mod tracker;

pub use api::{ComfyUIApi, TransportError};
pub use artifact::{ArtifactPayload, ImageRef, OutputArtifact};
pub use client::ComfyUIClient;
pub use preview::{preview_channel, PreviewFrame, PreviewSink};
pub use session::{Job, Session, WatchSet};
pub use tracker::{CompletionTracker, TrackOptions, TrackerConfig, TrackingResult, TrackingState};
