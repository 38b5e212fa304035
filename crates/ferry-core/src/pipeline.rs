/// Read-only context of the collection pipeline that produced an item.
///
/// Queues and in-flight items hold this through a weak back-reference so a
/// config reload can swap the pipeline instance without touching payloads
/// (see [`crate::sender::QueueRegistry::set_pipeline_for_items`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineContext {
    /// Pipeline configuration name.
    pub name: String,
    /// Destination project.
    pub project: String,
    /// Destination logstore.
    pub logstore: String,
}

impl PipelineContext {
    pub fn new(
        name: impl Into<String>,
        project: impl Into<String>,
        logstore: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            project: project.into(),
            logstore: logstore.into(),
        }
    }
}
