//! Completion listener: the live-channel half of job tracking.
//!
//! One background task per tracked job holds the WebSocket subscription,
//! processes frames strictly in arrival order, forwards previews, and
//! decides when the tracker can stop waiting. It reports exactly one
//! [`ListenerSignal`] through a oneshot channel, or none if it was
//! cancelled first. The socket is closed on every exit path.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::artifact::{flatten_node_output, OutputArtifact};
use crate::client::{ComfyUIClient, WsStream};
use crate::messages::{parse_message, ComfyUIMessage};
use crate::preview::{PreviewFrame, PreviewSink};
use crate::reconnect::{connect_with_backoff, ReconnectConfig};
use crate::session::{Job, Session, WatchSet};

/// Upper bound on the best-effort `/interrupt` call.
const INTERRUPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on sending our close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// How long [`ListenerHandle::shutdown`] waits for the task to exit
/// before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const MIN_PING_INTERVAL: Duration = Duration::from_millis(100);

/// Longest raw message echoed into a parse-failure log line.
const MAX_LOGGED_MESSAGE: usize = 512;

/// Sent on connect so servers that gate previews behind a subscription
/// start streaming them. Servers that do not know these ignore them.
const SUBSCRIPTION_INTENTS: [&str; 2] = [
    r#"{"type":"subscribe","data":{"channel":"preview"}}"#,
    r#"{"type":"binary_preview"}"#,
];

/// Why the listener stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every watched node produced an `executed` event.
    AllExecuted,
    /// One `execution_cached` batch listed every watched node.
    AllCached,
    /// A `status` heartbeat reported an empty queue. This says nothing
    /// about which job finished, only that history is worth checking.
    QueueDrained,
}

impl Termination {
    /// Whether this termination is evidence that the watched outputs exist.
    pub fn confirms_outputs(self) -> bool {
        matches!(self, Termination::AllExecuted | Termination::AllCached)
    }
}

/// What the listener hands back to the tracker.
#[derive(Debug, Clone)]
pub struct ListenerSignal {
    pub termination: Termination,
    /// Watched nodes seen in `executed` events.
    pub confirmed: BTreeSet<String>,
    /// Artifacts carried by those `executed` events.
    pub live_outputs: BTreeMap<String, Vec<OutputArtifact>>,
}

/// Settings for one listener task.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Send `/interrupt` once the watched outputs are confirmed.
    pub cancel_on_ready: bool,
    pub ping_interval: Duration,
    pub reconnect: ReconnectConfig,
    pub preview: Option<PreviewSink>,
}

/// Completion bookkeeping for one job, fed one message at a time.
#[derive(Debug)]
pub struct CompletionState {
    prompt_id: String,
    watch: WatchSet,
    confirmed: BTreeSet<String>,
    live_outputs: BTreeMap<String, Vec<OutputArtifact>>,
}

impl CompletionState {
    pub fn new(job: &Job) -> Self {
        Self {
            prompt_id: job.prompt_id.clone(),
            watch: job.watch.clone(),
            confirmed: BTreeSet::new(),
            live_outputs: BTreeMap::new(),
        }
    }

    pub fn confirmed(&self) -> &BTreeSet<String> {
        &self.confirmed
    }

    pub fn live_outputs(&self) -> &BTreeMap<String, Vec<OutputArtifact>> {
        &self.live_outputs
    }

    /// Apply one decoded message. Returns `Some` when the listener should
    /// stop waiting.
    pub fn apply(&mut self, message: &ComfyUIMessage) -> Option<Termination> {
        match message {
            ComfyUIMessage::Executed(data) => {
                if data.prompt_id != self.prompt_id {
                    tracing::trace!(prompt_id = %data.prompt_id, "Ignoring executed for another prompt");
                    return None;
                }
                if !self.watch.contains(&data.node) {
                    tracing::debug!(prompt_id = %data.prompt_id, node = %data.node, "Unwatched node executed");
                    return None;
                }

                let artifacts = flatten_node_output(&data.output);
                tracing::debug!(
                    prompt_id = %data.prompt_id,
                    node = %data.node,
                    artifacts = artifacts.len(),
                    "Watched node executed",
                );
                self.confirmed.insert(data.node.clone());
                self.live_outputs.insert(data.node.clone(), artifacts);

                self.watch
                    .is_satisfied_by(&self.confirmed)
                    .then_some(Termination::AllExecuted)
            }
            ComfyUIMessage::ExecutionCached(data) => {
                if data.prompt_id != self.prompt_id {
                    return None;
                }
                if self.watch.is_covered_by(&data.nodes) {
                    tracing::debug!(prompt_id = %data.prompt_id, "All watched nodes served from cache");
                    Some(Termination::AllCached)
                } else {
                    tracing::debug!(
                        prompt_id = %data.prompt_id,
                        cached = data.nodes.len(),
                        "Partially cached, still waiting",
                    );
                    None
                }
            }
            ComfyUIMessage::Status(data) => {
                let queue_remaining = data.status.exec_info.queue_remaining;
                tracing::debug!(queue_remaining, "ComfyUI queue status");
                (queue_remaining == 0).then_some(Termination::QueueDrained)
            }
            ComfyUIMessage::ExecutionStart(data) => {
                if data.prompt_id == self.prompt_id {
                    tracing::info!(prompt_id = %data.prompt_id, "Execution started");
                }
                None
            }
            ComfyUIMessage::Executing(data) => {
                tracing::debug!(node = ?data.node, prompt_id = ?data.prompt_id, "Executing node");
                None
            }
            ComfyUIMessage::Progress(data) => {
                tracing::debug!(value = data.value, max = data.max, percent = data.percent(), "Generation progress");
                None
            }
            ComfyUIMessage::ExecutionError(data) => {
                if data.prompt_id == self.prompt_id {
                    tracing::warn!(
                        prompt_id = %data.prompt_id,
                        node_id = ?data.node_id,
                        error_type = %data.exception_type,
                        error_message = %data.exception_message,
                        "Execution error reported by ComfyUI",
                    );
                }
                None
            }
            ComfyUIMessage::Preview(_) => None,
            ComfyUIMessage::Unrecognized { kind } => {
                tracing::trace!(kind = %kind, "Ignoring unrecognized message");
                None
            }
        }
    }

    fn into_signal(self, termination: Termination) -> ListenerSignal {
        ListenerSignal {
            termination,
            confirmed: self.confirmed,
            live_outputs: self.live_outputs,
        }
    }
}

/// Owner-side handle to a running listener task.
///
/// Dropping the handle cancels the task; [`shutdown`](Self::shutdown)
/// additionally waits for the socket to be closed.
pub struct ListenerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    signal: oneshot::Receiver<ListenerSignal>,
}

impl ListenerHandle {
    /// Spawn the listener for `job` on the current runtime.
    pub fn spawn(
        client: ComfyUIClient,
        api: ComfyUIApi,
        session: Session,
        job: &Job,
        options: ListenerOptions,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (signal_tx, signal) = oneshot::channel();
        let state = CompletionState::new(job);
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            run_listener(client, api, session, state, options, task_cancel, signal_tx).await;
        });

        Self {
            cancel,
            task: Some(task),
            signal,
        }
    }

    /// Wait for the listener's verdict. `None` means the task ended
    /// without one (cancelled or crashed).
    pub async fn wait(&mut self) -> Option<ListenerSignal> {
        (&mut self.signal).await.ok()
    }

    /// Cancel the task and wait briefly for it to close the socket.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                tracing::warn!("Listener did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum SessionEnd {
    Terminated(Termination),
    Cancelled,
    Dropped,
}

async fn run_listener(
    client: ComfyUIClient,
    api: ComfyUIApi,
    session: Session,
    mut state: CompletionState,
    options: ListenerOptions,
    cancel: CancellationToken,
    signal_tx: oneshot::Sender<ListenerSignal>,
) {
    loop {
        let Some(ws_stream) =
            connect_with_backoff(&client, &session, &options.reconnect, &cancel).await
        else {
            return;
        };

        match run_session(ws_stream, &mut state, &options, &cancel).await {
            SessionEnd::Terminated(termination) => {
                tracing::info!(
                    prompt_id = %state.prompt_id,
                    ?termination,
                    confirmed = state.confirmed.len(),
                    "Live wait finished",
                );
                let _ = signal_tx.send(state.into_signal(termination));
                // Runs detached; its result never reaches the verdict.
                if options.cancel_on_ready && termination.confirms_outputs() {
                    tokio::spawn(request_interrupt(api.clone()));
                }
                return;
            }
            SessionEnd::Cancelled => return,
            SessionEnd::Dropped => {
                tracing::info!(client_id = %session.client_id(), "Live channel lost, reconnecting");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(options.reconnect.initial_delay) => {}
                }
            }
        }
    }
}

/// Read frames until a termination condition, cancellation, or the
/// connection dropping. Always closes the socket before returning.
async fn run_session(
    ws_stream: WsStream,
    state: &mut CompletionState,
    options: &ListenerOptions,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut sink, mut stream) = ws_stream.split();

    if options.preview.is_some() {
        send_subscription_intents(&mut sink).await;
    }

    // `interval_at` panics on a zero period.
    let ping_every = options.ping_interval.max(MIN_PING_INTERVAL);
    let mut ping = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let end = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break SessionEnd::Cancelled,
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(termination) = handle_text(&text, state, options.preview.as_ref()) {
                        break SessionEnd::Terminated(termination);
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if let Some(sink) = options.preview.as_ref() {
                        forward_preview(PreviewFrame::from_binary_message(&data), sink);
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    // Handled automatically by tungstenite.
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "ComfyUI WebSocket closed");
                    break SessionEnd::Dropped;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break SessionEnd::Dropped;
                }
                None => break SessionEnd::Dropped,
            },
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    tracing::warn!(error = %e, "Keep-alive ping failed");
                    break SessionEnd::Dropped;
                }
            }
        }
    };

    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => tracing::debug!("Live channel closed"),
        Ok(Err(e)) => tracing::debug!(error = %e, "Close frame not delivered"),
        Err(_) => tracing::debug!("Timed out closing live channel"),
    }

    end
}

fn handle_text(
    text: &str,
    state: &mut CompletionState,
    preview: Option<&PreviewSink>,
) -> Option<Termination> {
    match parse_message(text) {
        Ok(ComfyUIMessage::Preview(data)) => {
            if let Some(sink) = preview {
                forward_preview(PreviewFrame::from_base64(&data.image), sink);
            }
            None
        }
        Ok(message) => state.apply(&message),
        Err(e) => {
            tracing::warn!(
                error = %e,
                raw_message = %truncate(text, MAX_LOGGED_MESSAGE),
                "Failed to parse ComfyUI message",
            );
            None
        }
    }
}

fn forward_preview(decoded: Result<PreviewFrame, crate::messages::FrameError>, sink: &PreviewSink) {
    match decoded {
        Ok(frame) => {
            tracing::trace!(width = frame.width, height = frame.height, format = ?frame.format, "Preview frame");
            sink.offer(frame);
        }
        Err(e) => tracing::warn!(error = %e, "Dropping undecodable preview frame"),
    }
}

async fn send_subscription_intents(sink: &mut SplitSink<WsStream, Message>) {
    for intent in SUBSCRIPTION_INTENTS {
        if let Err(e) = sink.send(Message::Text(intent.to_string())).await {
            tracing::debug!(error = %e, "Could not send subscription intent");
            return;
        }
    }
}

async fn request_interrupt(api: ComfyUIApi) {
    match tokio::time::timeout(INTERRUPT_TIMEOUT, api.interrupt()).await {
        Ok(Ok(())) => tracing::info!("Interrupt requested once watched outputs were ready"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Interrupt request failed"),
        Err(_) => tracing::warn!("Interrupt request timed out"),
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
