// ============================================================================
// batch-observe - Ergonomic Macros
// ============================================================================

/// Helper macro to clone variables into a move closure.
///
/// Pipeline callbacks are `'static`, so anything they share with the caller
/// (counters, logs, other pipelines) has to be cloned in first.
///
/// # Usage
///
/// ```rust
/// use batch_observe::{cloned, CallbackPipeline, Executor};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let mut executor = Executor::new();
/// let runs = Rc::new(Cell::new(0));
///
/// // Use:
/// let pipeline = CallbackPipeline::new(
///     executor.scheduler(),
///     cloned!(runs => move |_: &Rc<()>| runs.set(runs.get() + 1)),
/// );
///
/// let target = Rc::new(());
/// pipeline.request_update(&target);
/// executor.run_until_idle();
/// assert_eq!(runs.get(), 1);
/// ```
#[macro_export]
macro_rules! cloned {
    ($($n:ident),+ => $e:expr) => {
        {
            $( let $n = $n.clone(); )+
            $e
        }
    };
}
