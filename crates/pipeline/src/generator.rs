//! Shared generation context: submit a patched workflow, track it, and
//! resolve the resulting image.

use std::time::Duration;

use nesupixel_comfyui::{
    preview_channel, ComfyUIApi, ComfyUIClient, CompletionTracker, Job, PreviewFrame, PreviewSink,
    Session, TrackOptions, TrackerConfig, TrackingResult, WatchSet,
};
use nesupixel_core::config::{ComfyConfig, GenerationDefaults};
use nesupixel_core::lora::{LoraCatalog, DEFAULT_LORA_STRENGTH};
use nesupixel_core::translate::Translator;
use nesupixel_core::workflow::WorkflowDescriptor;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::artifacts::{ArtifactResolver, ResolvedArtifact};
use crate::error::PipelineError;
use crate::modes::{LoraSelection, Prompts};
use crate::workflow::{load_and_patch, WorkflowPatch};

/// Per-run knobs that are not part of the request itself.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Receives preview frames while the job runs.
    pub preview: Option<PreviewSink>,
    /// Overrides the configured tracking deadline.
    pub deadline: Option<Duration>,
}

/// What one generation produced.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub prompt_id: String,
    pub tracking: TrackingResult,
    /// The first output image, if the job produced one in time.
    pub artifact: Option<ResolvedArtifact>,
}

/// Everything a mode needs to talk to one ComfyUI server.
pub struct Generator {
    config: ComfyConfig,
    defaults: GenerationDefaults,
    loras: LoraCatalog,
    translator: Box<dyn Translator>,
    api: ComfyUIApi,
    tracker: CompletionTracker,
    resolver: ArtifactResolver,
}

impl Generator {
    pub fn new(config: ComfyConfig, loras: LoraCatalog, translator: Box<dyn Translator>) -> Self {
        let api = ComfyUIApi::new(config.api_url.clone());
        let tracker = CompletionTracker::new(
            ComfyUIClient::new(config.ws_url.clone()),
            api.clone(),
            TrackerConfig::from(&config),
        );
        let resolver = ArtifactResolver::from_config(api.clone(), &config);

        Self {
            config,
            defaults: GenerationDefaults::default(),
            loras,
            translator,
            api,
            tracker,
            resolver,
        }
    }

    pub fn with_defaults(mut self, defaults: GenerationDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn config(&self) -> &ComfyConfig {
        &self.config
    }

    pub fn defaults(&self) -> &GenerationDefaults {
        &self.defaults
    }

    pub fn loras(&self) -> &LoraCatalog {
        &self.loras
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    /// A preview channel sized from configuration.
    pub fn preview_channel(&self) -> (PreviewSink, mpsc::Receiver<PreviewFrame>) {
        preview_channel(self.config.preview_channel_capacity)
    }

    /// Stop whatever ComfyUI is executing right now.
    pub async fn interrupt(&self) -> Result<(), PipelineError> {
        self.api.interrupt().await?;
        tracing::info!("Interrupt sent");
        Ok(())
    }

    /// Translate if asked; an absent negative prompt takes the default,
    /// an empty one stays empty.
    pub(crate) fn prompts(&self, positive: &str, negative: Option<&str>, translate: bool) -> Prompts {
        let negative = negative.unwrap_or(&self.defaults.negative_prompt);
        if !translate {
            return Prompts {
                positive: positive.to_string(),
                negative: negative.to_string(),
            };
        }

        let prompts = Prompts {
            positive: self.translator.translate(positive),
            negative: if negative.is_empty() {
                String::new()
            } else {
                self.translator.translate(negative)
            },
        };
        tracing::debug!(positive = %prompts.positive, negative = %prompts.negative, "Prompts translated");
        prompts
    }

    /// Resolve a preset alias, or take `name` as a LoRA filename.
    pub(crate) fn lora_selection(&self, name: Option<&str>, strength: Option<f64>) -> Option<LoraSelection> {
        let name = name.map(str::trim).filter(|n| !n.is_empty())?;
        let selection = match self.loras.get(name) {
            Some(preset) => LoraSelection {
                filename: preset.filename.clone(),
                strength: strength.unwrap_or_else(|| preset.strength()),
            },
            None => LoraSelection {
                filename: name.to_string(),
                strength: strength.unwrap_or(DEFAULT_LORA_STRENGTH),
            },
        };
        Some(selection)
    }

    pub(crate) fn seed(&self, seed: Option<i64>) -> i64 {
        match seed.unwrap_or(self.defaults.seed) {
            s if s < 0 => i64::from(rand::random::<u32>()),
            s => s,
        }
    }

    /// Load and patch `descriptor`'s template, submit it, wait for its
    /// output nodes, and resolve the first image among them.
    pub async fn run(
        &self,
        descriptor: &WorkflowDescriptor,
        patch: WorkflowPatch,
        options: RunOptions,
    ) -> Result<GenerationOutcome, PipelineError> {
        let workflow = load_and_patch(&self.config.workflow_dir, descriptor, &patch).await?;

        let session = Session::new();
        let prompt_id = self.api.submit_workflow(&workflow, session.client_id()).await?;
        let job = Job::new(
            prompt_id.clone(),
            WatchSet::new(descriptor.output_node_ids.iter().cloned()),
        );

        let tracking = self
            .tracker
            .track(
                &session,
                &job,
                TrackOptions {
                    deadline: options.deadline,
                    cancel_on_ready: true,
                    preview: options.preview,
                },
            )
            .await;

        let image = descriptor
            .output_node_ids
            .iter()
            .find_map(|node| tracking.first_image(node))
            .cloned();
        let artifact = match image {
            Some(image) => Some(self.resolver.resolve(&image).await),
            None => {
                tracing::warn!(
                    prompt_id = %prompt_id,
                    workflow = %descriptor.name,
                    wait_outcome = ?tracking.wait_outcome,
                    "No output image",
                );
                None
            }
        };

        Ok(GenerationOutcome {
            prompt_id,
            tracking,
            artifact,
        })
    }
}
