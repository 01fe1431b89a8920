/// A workflow template and the nodes whose outputs a mode reads back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowDescriptor {
    /// Template file stem, resolved as `<workflow_dir>/<name>.json`.
    pub name: String,
    /// Node ids whose outputs are the final results.
    pub output_node_ids: Vec<String>,
}

impl WorkflowDescriptor {
    pub fn new(name: impl Into<String>, output_node_ids: &[&str]) -> Self {
        Self {
            name: name.into(),
            output_node_ids: output_node_ids.iter().map(|s| s.to_string()).collect(),
        }
    }
}
