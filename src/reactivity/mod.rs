// ============================================================================
// batch-observe - Reactivity Module
// Change detection, tick batching, and flush scheduling
// ============================================================================

pub mod batching;
pub mod equality;
pub mod scheduling;

// Re-export detectors
pub use equality::{
    always_changed, changed_by, default_detector, never_changed, not_equal, not_equal_slice,
    safe_not_equal_f32, safe_not_equal_f64,
};

// Re-export scheduling types
pub use scheduling::{CompletionSignal, Executor, IntoCompletion, Scheduler, UpdateFuture};
