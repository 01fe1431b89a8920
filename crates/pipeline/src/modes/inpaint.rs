//! Inpainting: repaint the masked area of an existing image.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use nesupixel_core::workflow::WorkflowDescriptor;

use super::{base_patch, LoraSelection, Prompts, OUTPUT_NODE};
use crate::error::PipelineError;
use crate::generator::{GenerationOutcome, Generator, RunOptions};
use crate::mask::{build_mask, open_image, stage_image, StagedImage};
use crate::workflow::WorkflowPatch;

pub const WORKFLOW_NAME: &str = "inpaint";
const IMAGE_NODE: &str = "3";
const MASK_NODE: &str = "4";

pub fn descriptor() -> WorkflowDescriptor {
    WorkflowDescriptor::new(WORKFLOW_NAME, &[OUTPUT_NODE])
}

#[derive(Debug, Clone, Default)]
pub struct InpaintRequest {
    pub prompt: String,
    pub negative: Option<String>,
    /// Image to repaint.
    pub image: PathBuf,
    /// First editor layer holding the user's strokes. `None` repaints nothing.
    pub mask_layer: Option<PathBuf>,
    pub invert_mask: bool,
    /// Negative values pick a random seed.
    pub seed: Option<i64>,
    pub lora: Option<String>,
    pub lora_strength: Option<f64>,
    pub translate: bool,
}

pub fn inpaint_patch(
    prompts: &Prompts,
    image_ref: &str,
    mask_ref: &str,
    seed: i64,
    lora: Option<&LoraSelection>,
) -> WorkflowPatch {
    base_patch(prompts, seed, lora)
        .set(IMAGE_NODE, "image", image_ref)
        .set(MASK_NODE, "image", mask_ref)
}

/// Decode the inputs, build the mask and write both into `input_dir`.
/// Blocking; callers run it off the async runtime.
fn stage_inputs(
    image: &Path,
    mask_layer: Option<&Path>,
    invert_mask: bool,
    input_dir: &Path,
    subfolder: &str,
) -> Result<(StagedImage, StagedImage), PipelineError> {
    let base = open_image(image)?;
    let layer = mask_layer.map(open_image).transpose()?;
    let mask = build_mask(&base, layer.as_ref(), invert_mask);

    let staged_base = stage_image(
        &DynamicImage::ImageRgb8(base.to_rgb8()),
        "base",
        input_dir,
        subfolder,
    )?;
    let staged_mask = stage_image(&DynamicImage::ImageLuma8(mask), "mask", input_dir, subfolder)?;
    Ok((staged_base, staged_mask))
}

impl Generator {
    pub async fn inpaint(
        &self,
        request: &InpaintRequest,
        options: RunOptions,
    ) -> Result<GenerationOutcome, PipelineError> {
        let prompts = self.prompts(&request.prompt, request.negative.as_deref(), request.translate);
        let lora = self.lora_selection(request.lora.as_deref(), request.lora_strength);
        let seed = self.seed(request.seed);

        let image = request.image.clone();
        let mask_layer = request.mask_layer.clone();
        let invert_mask = request.invert_mask;
        let input_dir = self.config().input_dir.clone();
        let subfolder = self.config().subfolder.clone();
        let (staged_base, staged_mask) = tokio::task::spawn_blocking(move || {
            stage_inputs(&image, mask_layer.as_deref(), invert_mask, &input_dir, &subfolder)
        })
        .await??;

        tracing::info!(
            image = %staged_base.reference,
            mask = %staged_mask.reference,
            seed,
            "Starting inpaint",
        );

        let patch = inpaint_patch(
            &prompts,
            &staged_base.reference,
            &staged_mask.reference,
            seed,
            lora.as_ref(),
        );
        self.run(&descriptor(), patch, options).await
    }
}
