//! Generation modes built on the ComfyUI client: workflow templating,
//! inpaint input preparation and artifact resolution.

pub mod artifacts;
pub mod error;
pub mod generator;
pub mod mask;
pub mod modes;
pub mod workflow;

pub use artifacts::ResolvedArtifact;
pub use error::PipelineError;
pub use generator::{GenerationOutcome, Generator, RunOptions};
pub use modes::inpaint::InpaintRequest;
pub use modes::txt2img::Txt2ImgRequest;
