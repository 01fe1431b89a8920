//! Intermediate preview frames from the live channel.
//!
//! Previews arrive either as binary WebSocket frames (an 8-byte header
//! followed by encoded image bytes) or as JSON `preview` messages holding
//! base64. Both are validated with a header-only decode and pushed onto a
//! bounded channel that the caller drains at its own pace. A full channel
//! drops the frame: previews are not part of the durable record.

use std::io::Cursor;

use base64::Engine as _;
use image::{DynamicImage, ImageFormat, ImageReader};
use tokio::sync::mpsc;

use crate::messages::FrameError;

/// Bytes to discard at the start of a binary preview frame
/// (event type + image format, both big-endian u32).
pub const BINARY_PREVIEW_HEADER_LEN: usize = 8;

/// One decoded preview image.
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// Encoded image bytes as received.
    pub bytes: Vec<u8>,
}

impl PreviewFrame {
    /// Validate `bytes` as an image by reading its format and dimensions.
    pub fn decode(bytes: Vec<u8>) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::Decode("empty preview payload".into()));
        }

        let reader = ImageReader::new(Cursor::new(bytes.as_slice()))
            .with_guessed_format()
            .map_err(|e| FrameError::Decode(e.to_string()))?;
        let format = reader
            .format()
            .ok_or_else(|| FrameError::Decode("unrecognised image format".into()))?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| FrameError::Decode(e.to_string()))?;

        Ok(Self {
            format,
            width,
            height,
            bytes,
        })
    }

    /// Decode a binary WebSocket frame.
    pub fn from_binary_message(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() <= BINARY_PREVIEW_HEADER_LEN {
            return Err(FrameError::Decode(format!(
                "binary frame too short ({} bytes)",
                data.len()
            )));
        }
        Self::decode(data[BINARY_PREVIEW_HEADER_LEN..].to_vec())
    }

    /// Decode a base64 payload from a JSON `preview` message.
    ///
    /// A `data:image/...;base64,` prefix is accepted.
    pub fn from_base64(encoded: &str) -> Result<Self, FrameError> {
        let payload = match encoded.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => encoded,
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| FrameError::Decode(e.to_string()))?;
        Self::decode(bytes)
    }

    /// Fully decode the pixels.
    pub fn to_image(&self) -> Result<DynamicImage, image::ImageError> {
        image::load_from_memory_with_format(&self.bytes, self.format)
    }
}

/// Producer half of the preview channel, held by the listener.
#[derive(Debug, Clone)]
pub struct PreviewSink {
    tx: mpsc::Sender<PreviewFrame>,
}

impl PreviewSink {
    /// Push a frame without waiting. Returns `false` if it was dropped
    /// because the channel is full or the consumer has gone away.
    pub fn offer(&self, frame: PreviewFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!("Preview channel full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Create a bounded preview channel.
pub fn preview_channel(capacity: usize) -> (PreviewSink, mpsc::Receiver<PreviewFrame>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (PreviewSink { tx }, rx)
}
