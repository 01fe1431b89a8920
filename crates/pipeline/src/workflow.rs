//! Workflow templates: loading `<name>.json` and overriding node inputs.
//!
//! Templates are ComfyUI API-format exports, a JSON object keyed by node
//! id where each node has `class_type` and `inputs`. A [`WorkflowPatch`]
//! merges per-node input overrides into a loaded template.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use nesupixel_core::error::CoreError;
use nesupixel_core::workflow::WorkflowDescriptor;
use serde_json::{Map, Value};

use crate::error::PipelineError;

/// Input overrides keyed by node id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowPatch {
    overrides: BTreeMap<String, Map<String, Value>>,
}

impl WorkflowPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override input `key` of `node_id`.
    pub fn set(mut self, node_id: &str, key: &str, value: impl Into<Value>) -> Self {
        self.overrides
            .entry(node_id.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
        self
    }

    /// Overrides for one node, if any.
    pub fn node(&self, node_id: &str) -> Option<&Map<String, Value>> {
        self.overrides.get(node_id)
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Merge the overrides into `workflow` and return how many nodes were
    /// patched. Node ids missing from the template are skipped; existing
    /// inputs not named in the patch are left alone.
    pub fn apply(&self, workflow: &mut Value) -> usize {
        let mut patched = 0;
        for (node_id, inputs) in &self.overrides {
            let Some(node) = workflow.get_mut(node_id).and_then(Value::as_object_mut) else {
                tracing::debug!(node_id = %node_id, "Patch targets a node absent from the template");
                continue;
            };

            let target = node
                .entry("inputs")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(target) = target.as_object_mut() {
                target.extend(inputs.iter().map(|(k, v)| (k.clone(), v.clone())));
                patched += 1;
            }
        }
        patched
    }
}

/// Path of the template for `name` inside `workflow_dir`.
pub fn workflow_path(workflow_dir: &Path, name: &str) -> PathBuf {
    workflow_dir.join(format!("{name}.json"))
}

/// Read and parse a workflow template.
pub async fn load_workflow(workflow_dir: &Path, name: &str) -> Result<Value, PipelineError> {
    let path = workflow_path(workflow_dir, name);
    let raw = tokio::fs::read_to_string(&path).await.map_err(|source| CoreError::Io {
        path: path.clone(),
        source,
    })?;
    let workflow: Value =
        serde_json::from_str(&raw).map_err(|source| CoreError::Json { path, source })?;

    if !workflow.is_object() {
        return Err(PipelineError::InvalidWorkflow { name: name.into() });
    }
    Ok(workflow)
}

/// Load the template for `descriptor` and apply `patch` to it.
pub async fn load_and_patch(
    workflow_dir: &Path,
    descriptor: &WorkflowDescriptor,
    patch: &WorkflowPatch,
) -> Result<Value, PipelineError> {
    let mut workflow = load_workflow(workflow_dir, &descriptor.name).await?;
    let patched = patch.apply(&mut workflow);
    tracing::debug!(workflow = %descriptor.name, patched, "Workflow patched");
    Ok(workflow)
}
