// ============================================================================
// batch-observe - Flush Scheduling
// The explicit task queue that stands in for a microtask boundary
// ============================================================================
//
// Writes are handled synchronously. A pipeline that opens a batch hands one
// flush task to its Scheduler, and nothing runs until the owner of the
// executor drives it. Every write made before that point lands in the batch.
//
// Key pieces:
// - Scheduler: the seam pipelines enqueue flush tasks through
// - Executor: a single-threaded LocalPool with a FIFO task order
// - CompletionSignal: a cloneable future resolved when one flush finishes
// ============================================================================

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{self, FutureExt, LocalBoxFuture, Shared};
use futures::task::{LocalSpawnExt, SpawnError};

use crate::core::error::{UpdateError, UpdateResult};

/// Deferred completion of an update callback.
pub type UpdateFuture = LocalBoxFuture<'static, UpdateResult>;

// =============================================================================
// SCHEDULER
// =============================================================================

/// Something that can run a pipeline's flush task later on this thread.
///
/// Tasks must run in the order they were scheduled, and never inside the
/// `schedule` call itself.
pub trait Scheduler {
    /// Enqueue a flush task.
    fn schedule(&self, task: LocalBoxFuture<'static, ()>) -> Result<(), SpawnError>;
}

impl Scheduler for LocalSpawner {
    fn schedule(&self, task: LocalBoxFuture<'static, ()>) -> Result<(), SpawnError> {
        self.spawn_local(task)
    }
}

// =============================================================================
// EXECUTOR
// =============================================================================

/// Single-threaded executor that drives flush tasks.
///
/// # Example
///
/// ```
/// use batch_observe::{CallbackPipeline, Executor};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let mut executor = Executor::new();
/// let calls = Rc::new(Cell::new(0));
/// let pipeline = CallbackPipeline::new(executor.scheduler(), {
///     let calls = calls.clone();
///     move |_target: &Rc<()>| calls.set(calls.get() + 1)
/// });
///
/// let target = Rc::new(());
/// pipeline.request_update(&target);
/// pipeline.request_update(&target);
/// assert_eq!(calls.get(), 0);
///
/// executor.run_until_idle();
/// assert_eq!(calls.get(), 1);
/// ```
pub struct Executor {
    pool: LocalPool,
}

impl Executor {
    pub fn new() -> Self {
        Self {
            pool: LocalPool::new(),
        }
    }

    /// A handle pipelines use to enqueue their flushes on this executor.
    pub fn scheduler(&self) -> LocalSpawner {
        self.pool.spawner()
    }

    /// Run every queued flush, including flushes scheduled by the ones that
    /// ran, until nothing can make progress.
    pub fn run_until_idle(&mut self) {
        self.pool.run_until_stalled();
    }

    /// Run queued flushes until `future` resolves.
    ///
    /// Typically used to wait on a completion signal.
    pub fn block_on<F: Future>(&mut self, future: F) -> F::Output {
        self.pool.run_until(future)
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor").finish_non_exhaustive()
    }
}

// =============================================================================
// COMPLETION SIGNAL
// =============================================================================

/// Awaitable token for one flush cycle.
///
/// Resolves once the flush's callback and any deferred work it returned have
/// finished. Clones all observe the same result.
#[derive(Clone)]
pub struct CompletionSignal {
    inner: Shared<LocalBoxFuture<'static, UpdateResult>>,
}

impl CompletionSignal {
    /// A signal for a flush that has not run yet, plus the handle that
    /// resolves it.
    pub(crate) fn pending() -> (Completer, Self) {
        let (tx, rx) = oneshot::channel();
        let inner = rx
            .map(|result| result.unwrap_or(Err(UpdateError::Abandoned)))
            .boxed_local()
            .shared();
        (Completer { tx }, Self { inner })
    }

    /// A signal that is already complete. Returned for idle targets.
    pub fn resolved() -> Self {
        Self {
            inner: future::ready(Ok(())).boxed_local().shared(),
        }
    }
}

impl Future for CompletionSignal {
    type Output = UpdateResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("result", &self.inner.peek())
            .finish()
    }
}

/// Resolving half of a [`CompletionSignal`]. Dropping it unresolved makes the
/// signal report [`UpdateError::Abandoned`].
pub(crate) struct Completer {
    tx: oneshot::Sender<UpdateResult>,
}

impl Completer {
    /// Resolve the signal. Returns the result back if nobody holds the
    /// signal any more.
    pub fn complete(self, result: UpdateResult) -> Result<(), UpdateResult> {
        self.tx.send(result)
    }
}

// =============================================================================
// CALLBACK RETURN VALUES
// =============================================================================

/// Values a pipeline callback may return.
///
/// - `()` finishes immediately and successfully
/// - [`UpdateResult`] finishes immediately, possibly with a failure
/// - [`UpdateFuture`] is awaited before the completion signal resolves
pub trait IntoCompletion {
    /// `None` means the callback already finished successfully.
    fn into_completion(self) -> Option<UpdateFuture>;
}

impl IntoCompletion for () {
    fn into_completion(self) -> Option<UpdateFuture> {
        None
    }
}

impl IntoCompletion for UpdateResult {
    fn into_completion(self) -> Option<UpdateFuture> {
        match self {
            Ok(()) => None,
            Err(err) => Some(future::ready(Err(err)).boxed_local()),
        }
    }
}

impl IntoCompletion for UpdateFuture {
    fn into_completion(self) -> Option<UpdateFuture> {
        Some(self)
    }
}

// =============================================================================
// TESTS
// =============================================================================
