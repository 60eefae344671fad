// ============================================================================
// batch-observe - Primitives Module
// Observed properties and the pipelines that batch their writes
// ============================================================================

pub mod callback;
pub mod property;
pub mod update;

// Re-export for convenience
pub use callback::{CallbackPipeline, Condition};
pub use property::{Property, PropertyObserver, WriteHook};
pub use update::{ChangedProperties, PropertyChange, UpdatePipeline};
