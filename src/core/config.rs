// ============================================================================
// batch-observe - Pipeline Options
// Per-pipeline configuration
// ============================================================================

/// Label used in log output when none is configured.
pub const DEFAULT_LABEL: &str = "pipeline";

/// What an update pipeline does when every change in a batch was reverted
/// before the flush ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyFlushPolicy {
    /// Skip the callback; the completion signal still resolves.
    #[default]
    Skip,
    /// Invoke the callback with an empty change map.
    Invoke,
}

/// Options for creating a pipeline.
///
/// # Example
///
/// ```
/// use batch_observe::{EmptyFlushPolicy, PipelineOptions};
///
/// let options = PipelineOptions::default()
///     .label("layout")
///     .empty_flush(EmptyFlushPolicy::Invoke);
///
/// assert_eq!(options.label, "layout");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Name attached to every log event the pipeline emits.
    pub label: &'static str,
    /// Behaviour for batches that end up empty.
    pub empty_flush: EmptyFlushPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL,
            empty_flush: EmptyFlushPolicy::default(),
        }
    }
}

impl PipelineOptions {
    /// Set the name used in the pipeline's log events.
    pub fn label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Set what happens when every change in a batch was reverted.
    pub fn empty_flush(mut self, policy: EmptyFlushPolicy) -> Self {
        self.empty_flush = policy;
        self
    }
}
