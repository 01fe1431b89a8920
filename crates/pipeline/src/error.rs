use std::path::PathBuf;

use nesupixel_comfyui::TransportError;
use nesupixel_core::error::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("ComfyUI request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Workflow '{name}' is not a JSON object of nodes")]
    InvalidWorkflow { name: String },

    #[error("Failed to read image {path}: {source}")]
    ImageRead {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to write image {path}: {source}")]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Image preparation task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
