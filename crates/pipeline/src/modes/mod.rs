//! Generation modes. Each mode builds a [`WorkflowPatch`] for its template
//! and hands it to [`Generator::run`](crate::generator::Generator).
//!
//! Both shipped templates share the node layout below; modes differ only
//! in what nodes `3` and `4` receive.
//!
//! | Node | Input                                   |
//! |------|-----------------------------------------|
//! | `1`  | positive prompt (`string`)              |
//! | `2`  | negative prompt (`string`)              |
//! | `3`  | width (`int`) or base image (`image`)   |
//! | `4`  | height (`int`) or mask image (`image`)  |
//! | `6`  | LoRA loader                             |
//! | `8`  | sampler `seed`                          |
//! | `16` | output image node                       |

pub mod inpaint;
pub mod txt2img;

use crate::workflow::WorkflowPatch;

pub const POSITIVE_NODE: &str = "1";
pub const NEGATIVE_NODE: &str = "2";
pub const LORA_NODE: &str = "6";
pub const SAMPLER_NODE: &str = "8";
pub const OUTPUT_NODE: &str = "16";

/// Prompts after optional translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub positive: String,
    pub negative: String,
}

/// A LoRA to apply at the given strength (model and clip alike).
#[derive(Debug, Clone, PartialEq)]
pub struct LoraSelection {
    pub filename: String,
    pub strength: f64,
}

/// Patch for the nodes every mode sets. Without a LoRA the loader stays
/// in the graph with both strengths zeroed.
pub fn base_patch(prompts: &Prompts, seed: i64, lora: Option<&LoraSelection>) -> WorkflowPatch {
    let patch = WorkflowPatch::new()
        .set(POSITIVE_NODE, "string", prompts.positive.as_str())
        .set(NEGATIVE_NODE, "string", prompts.negative.as_str())
        .set(SAMPLER_NODE, "seed", seed);

    match lora {
        Some(lora) => patch
            .set(LORA_NODE, "lora_name", lora.filename.as_str())
            .set(LORA_NODE, "strength_model", lora.strength)
            .set(LORA_NODE, "strength_clip", lora.strength),
        None => patch
            .set(LORA_NODE, "strength_model", 0.0)
            .set(LORA_NODE, "strength_clip", 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompts() -> Prompts {
        Prompts {
            positive: "a red fox".into(),
            negative: "blurry".into(),
        }
    }

    #[test]
    fn without_lora_strengths_are_zeroed() {
        let patch = base_patch(&prompts(), 7, None);
        let lora = patch.node(LORA_NODE).unwrap();
        assert_eq!(lora["strength_model"], 0.0);
        assert_eq!(lora["strength_clip"], 0.0);
        assert!(!lora.contains_key("lora_name"));
        assert_eq!(patch.node(SAMPLER_NODE).unwrap()["seed"], 7);
        assert_eq!(patch.node(POSITIVE_NODE).unwrap()["string"], "a red fox");
        assert_eq!(patch.node(NEGATIVE_NODE).unwrap()["string"], "blurry");
    }

    #[test]
    fn lora_sets_name_and_both_strengths() {
        let lora = LoraSelection {
            filename: "pixel_art.safetensors".into(),
            strength: 0.8,
        };
        let patch = base_patch(&prompts(), 7, Some(&lora));
        let node = patch.node(LORA_NODE).unwrap();
        assert_eq!(node["lora_name"], "pixel_art.safetensors");
        assert_eq!(node["strength_model"], 0.8);
        assert_eq!(node["strength_clip"], 0.8);
    }
}
