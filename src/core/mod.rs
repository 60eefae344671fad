// ============================================================================
// batch-observe - Core Module
// Identity, values, errors and options shared by every pipeline
// ============================================================================

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used items
pub use config::{EmptyFlushPolicy, PipelineOptions};
pub use error::{UpdateError, UpdateResult};
pub use types::{AnyValue, DetectFn, PropertyKey, TargetId};
