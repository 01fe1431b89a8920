//! LoRA preset catalogue.
//!
//! Presets are read once at startup from a JSON array and handed to the
//! generation modes by reference.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::CoreError;

/// Strength applied when a preset does not recommend one.
pub const DEFAULT_LORA_STRENGTH: f64 = 0.7;

/// One named LoRA style.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoraPreset {
    /// Short user-facing name, e.g. `"pixel-art"`.
    pub alias: String,
    /// LoRA file name as ComfyUI knows it.
    pub filename: String,
    #[serde(default)]
    pub recommended_strength: Option<f64>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl LoraPreset {
    pub fn strength(&self) -> f64 {
        self.recommended_strength.unwrap_or(DEFAULT_LORA_STRENGTH)
    }
}

/// Presets indexed by alias, preserving file order for listing.
#[derive(Debug, Clone, Default)]
pub struct LoraCatalog {
    presets: Vec<LoraPreset>,
    by_alias: HashMap<String, usize>,
}

impl LoraCatalog {
    pub fn new(presets: Vec<LoraPreset>) -> Self {
        let by_alias = presets
            .iter()
            .enumerate()
            .map(|(i, p)| (p.alias.clone(), i))
            .collect();
        Self { presets, by_alias }
    }

    /// Parse a catalogue file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let presets: Vec<LoraPreset> =
            serde_json::from_str(&raw).map_err(|source| CoreError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(presets))
    }

    /// Like [`load`](Self::load), but a missing or malformed file yields an
    /// empty catalogue instead of an error.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(catalog) => {
                tracing::info!(count = catalog.len(), path = %path.display(), "Loaded LoRA presets");
                catalog
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not load LoRA presets, continuing without them");
                Self::default()
            }
        }
    }

    pub fn get(&self, alias: &str) -> Option<&LoraPreset> {
        self.by_alias.get(alias).map(|&i| &self.presets[i])
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.presets.iter().map(|p| p.alias.as_str())
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}
