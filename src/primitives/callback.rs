// ============================================================================
// batch-observe - Callback Pipeline
// Coalesce update requests into at most one callback per target per tick
// ============================================================================

use std::fmt;
use std::rc::Rc;

use crate::core::config::PipelineOptions;
use crate::reactivity::batching::TickBatcher;
use crate::reactivity::scheduling::{CompletionSignal, IntoCompletion, Scheduler};

/// Predicate checked when the flush runs, not when it is requested.
pub type Condition = Box<dyn FnOnce() -> bool>;

/// Generic once-per-tick callback coalescer.
///
/// Every `request_update` for a target within one tick contributes a
/// condition. The flush evaluates them and invokes the callback once if any
/// holds. Its completion signal resolves either way.
///
/// # Example
///
/// ```
/// use batch_observe::{CallbackPipeline, Executor};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let mut executor = Executor::new();
/// let renders = Rc::new(Cell::new(0));
/// let pipeline = CallbackPipeline::new(executor.scheduler(), {
///     let renders = renders.clone();
///     move |_view: &Rc<String>| renders.set(renders.get() + 1)
/// });
///
/// let view = Rc::new(String::from("sidebar"));
/// pipeline.request_update(&view);
/// pipeline.request_update_if(&view, || false);
///
/// executor.block_on(pipeline.when_update_complete(&view)).unwrap();
/// assert_eq!(renders.get(), 1);
/// ```
pub struct CallbackPipeline<T: 'static> {
    batcher: TickBatcher<T, Vec<Condition>>,
}

impl<T: 'static> Clone for CallbackPipeline<T> {
    fn clone(&self) -> Self {
        Self {
            batcher: self.batcher.clone(),
        }
    }
}

impl<T: 'static> CallbackPipeline<T> {
    /// Create a pipeline that flushes through `scheduler`.
    pub fn new<R, F>(scheduler: impl Scheduler + 'static, callback: F) -> Self
    where
        R: IntoCompletion,
        F: Fn(&Rc<T>) -> R + 'static,
    {
        Self::with_options(scheduler, PipelineOptions::default(), callback)
    }

    /// Create a pipeline with explicit options.
    ///
    /// The empty-flush policy has no effect here; the conditions decide.
    pub fn with_options<R, F>(
        scheduler: impl Scheduler + 'static,
        options: PipelineOptions,
        callback: F,
    ) -> Self
    where
        R: IntoCompletion,
        F: Fn(&Rc<T>) -> R + 'static,
    {
        let label = options.label;
        let on_flush = move |target: &Rc<T>, conditions: Vec<Condition>| {
            let requested = conditions.len();
            if conditions.into_iter().any(|condition| condition()) {
                callback(target).into_completion()
            } else {
                tracing::trace!(
                    pipeline = label,
                    requested,
                    "no condition held, skipping callback"
                );
                None
            }
        };
        Self {
            batcher: TickBatcher::new(label, scheduler, on_flush),
        }
    }

    /// Request an unconditional update of `target` this tick.
    pub fn request_update(&self, target: &Rc<T>) {
        self.request_update_if(target, || true);
    }

    /// Request an update of `target` that only counts if `condition` holds
    /// at flush time.
    pub fn request_update_if(&self, target: &Rc<T>, condition: impl FnOnce() -> bool + 'static) {
        let condition: Condition = Box::new(condition);
        // Hand the condition back if the target is idle, then open with it.
        let mut carry = Some(condition);
        self.batcher
            .with_pending(target, |conditions| conditions.extend(carry.take()));
        if let Some(condition) = carry {
            self.batcher.open(target, vec![condition]);
        }
    }

    /// Wait for the flush currently pending on `target`.
    ///
    /// Resolves immediately if nothing is pending.
    pub fn when_update_complete(&self, target: &Rc<T>) -> CompletionSignal {
        self.batcher.when_complete(target)
    }

    /// Whether a flush for `target` is scheduled and has not started.
    pub fn has_pending_update(&self, target: &Rc<T>) -> bool {
        self.batcher.is_pending(target)
    }
}

impl<T: 'static> fmt::Debug for CallbackPipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackPipeline")
            .field("label", &self.batcher.label())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
