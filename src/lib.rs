// ============================================================================
// batch-observe - Same-Tick Write Coalescing for Reactive State
// ============================================================================
//
// Several synchronous writes to observed properties of one object are folded
// into a single asynchronous update that carries only the net changes.
// Batches live in the pipeline, keyed by target identity, and flush through
// an explicit single-threaded executor.
// ============================================================================

#[macro_use]
mod macros;

pub mod core;
pub mod primitives;
pub mod reactivity;

// Re-export core items at crate root for ergonomic access
pub use crate::core::config::{EmptyFlushPolicy, PipelineOptions, DEFAULT_LABEL};
pub use crate::core::error::{UpdateError, UpdateResult};
pub use crate::core::types::{AnyValue, DetectFn, PropertyKey, TargetId};

// Re-export primitives at crate root
pub use crate::primitives::callback::{CallbackPipeline, Condition};
pub use crate::primitives::property::{Property, PropertyObserver, WriteHook};
pub use crate::primitives::update::{ChangedProperties, PropertyChange, UpdatePipeline};

// Re-export reactivity items
pub use crate::reactivity::equality::{
    always_changed, changed_by, default_detector, never_changed, not_equal, not_equal_slice,
    safe_not_equal_f32, safe_not_equal_f64,
};
pub use crate::reactivity::scheduling::{
    CompletionSignal, Executor, IntoCompletion, Scheduler, UpdateFuture,
};

// =============================================================================
// TESTS
// =============================================================================
