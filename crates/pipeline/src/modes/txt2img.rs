//! Text-to-image.

use nesupixel_core::workflow::WorkflowDescriptor;

use super::{base_patch, LoraSelection, Prompts, OUTPUT_NODE};
use crate::error::PipelineError;
use crate::generator::{GenerationOutcome, Generator, RunOptions};
use crate::workflow::WorkflowPatch;

pub const WORKFLOW_NAME: &str = "txt2img";
const WIDTH_NODE: &str = "3";
const HEIGHT_NODE: &str = "4";

pub fn descriptor() -> WorkflowDescriptor {
    WorkflowDescriptor::new(WORKFLOW_NAME, &[OUTPUT_NODE])
}

/// A text-to-image request. Unset fields fall back to the generator's
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct Txt2ImgRequest {
    pub prompt: String,
    pub negative: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Negative values pick a random seed.
    pub seed: Option<i64>,
    /// Preset alias or LoRA filename.
    pub lora: Option<String>,
    pub lora_strength: Option<f64>,
    pub translate: bool,
}

pub fn txt2img_patch(
    prompts: &Prompts,
    width: u32,
    height: u32,
    seed: i64,
    lora: Option<&LoraSelection>,
) -> WorkflowPatch {
    base_patch(prompts, seed, lora)
        .set(WIDTH_NODE, "int", width)
        .set(HEIGHT_NODE, "int", height)
}

impl Generator {
    pub async fn txt2img(
        &self,
        request: &Txt2ImgRequest,
        options: RunOptions,
    ) -> Result<GenerationOutcome, PipelineError> {
        let prompts = self.prompts(&request.prompt, request.negative.as_deref(), request.translate);
        let lora = self.lora_selection(request.lora.as_deref(), request.lora_strength);
        let width = request.width.unwrap_or(self.defaults().width);
        let height = request.height.unwrap_or(self.defaults().height);
        let seed = self.seed(request.seed);

        tracing::info!(
            width,
            height,
            seed,
            lora = ?lora.as_ref().map(|l| &l.filename),
            "Starting txt2img",
        );

        let patch = txt2img_patch(&prompts, width, height, seed, lora.as_ref());
        self.run(&descriptor(), patch, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_sets_dimensions() {
        let prompts = Prompts {
            positive: "castle".into(),
            negative: String::new(),
        };
        let patch = txt2img_patch(&prompts, 768, 512, 3, None);
        assert_eq!(patch.node(WIDTH_NODE).unwrap()["int"], 768);
        assert_eq!(patch.node(HEIGHT_NODE).unwrap()["int"], 512);
    }

    #[test]
    fn descriptor_watches_output_node() {
        let descriptor = descriptor();
        assert_eq!(descriptor.name, "txt2img");
        assert_eq!(descriptor.output_node_ids, vec!["16".to_string()]);
    }
}
