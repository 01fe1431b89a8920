//! Exponential-backoff (re)connection for the live channel.
//!
//! The listener uses [`connect_with_backoff`] both for its first
//! connection and after the socket drops mid-wait. Retries stop as soon
//! as the [`CancellationToken`] fires, which the tracker does when its
//! deadline expires.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, WsStream};
use crate::session::Session;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Connect as `session`, retrying with exponential backoff.
///
/// The first attempt is made immediately. Returns `Some(stream)` once a
/// connection succeeds, or `None` if `cancel` fires first.
pub async fn connect_with_backoff(
    client: &ComfyUIClient,
    session: &Session,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<WsStream> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(client_id = %session.client_id(), "Connect cancelled");
                return None;
            }
            result = client.connect(session) => {
                match result {
                    Ok(stream) => {
                        if attempt > 1 {
                            tracing::info!(client_id = %session.client_id(), attempt, "Reconnected to ComfyUI");
                        }
                        return Some(stream);
                    }
                    Err(e) => {
                        tracing::warn!(
                            client_id = %session.client_id(),
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "Connect attempt {attempt} failed",
                        );
                    }
                }
            }
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}
