// ============================================================================
// batch-observe - Tick Batching
// Collect per-target state during a tick, flush it exactly once
// ============================================================================
//
// TickBatcher is the primitive both pipelines are built on. For each target
// it holds at most one open slot: some pending state S plus the completion
// signal for the flush that will consume it. Opening a slot schedules that
// flush; the flush detaches the slot before handing S to the pipeline's
// flush handler, so anything the handler does to the target opens a new slot
// instead of leaking into the one being delivered.
//
//   IDLE --open--> PENDING --flush task runs--> FLUSHING --> IDLE
// ============================================================================

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use futures::FutureExt;

use crate::core::types::TargetId;
use crate::reactivity::scheduling::{CompletionSignal, Completer, Scheduler, UpdateFuture};

/// Consumes a detached slot. Returning `None` means there is nothing left to
/// wait for.
type FlushHandler<T, S> = Box<dyn Fn(&Rc<T>, S) -> Option<UpdateFuture>>;

struct Slot<S> {
    pending: S,
    signal: CompletionSignal,
}

struct BatcherShared<T: 'static, S: 'static> {
    label: &'static str,
    scheduler: Box<dyn Scheduler>,
    slots: RefCell<HashMap<TargetId, Slot<S>>>,
    on_flush: FlushHandler<T, S>,
}

/// Once-per-tick coalescer keyed by target identity.
pub(crate) struct TickBatcher<T: 'static, S: 'static> {
    shared: Rc<BatcherShared<T, S>>,
}

impl<T: 'static, S: 'static> Clone for TickBatcher<T, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T: 'static, S: 'static> TickBatcher<T, S> {
    pub fn new(
        label: &'static str,
        scheduler: impl Scheduler + 'static,
        on_flush: impl Fn(&Rc<T>, S) -> Option<UpdateFuture> + 'static,
    ) -> Self {
        Self {
            shared: Rc::new(BatcherShared {
                label,
                scheduler: Box::new(scheduler),
                slots: RefCell::new(HashMap::new()),
                on_flush: Box::new(on_flush),
            }),
        }
    }

    pub fn label(&self) -> &'static str {
        self.shared.label
    }

    /// Whether a flush is scheduled for `target` and has not started yet.
    pub fn is_pending(&self, target: &Rc<T>) -> bool {
        self.shared.slots.borrow().contains_key(&TargetId::of(target))
    }

    /// Run `f` against the open slot's state, if there is one.
    ///
    /// `f` must not call back into this batcher.
    pub fn with_pending<R>(&self, target: &Rc<T>, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        let mut slots = self.shared.slots.borrow_mut();
        slots
            .get_mut(&TargetId::of(target))
            .map(|slot| f(&mut slot.pending))
    }

    /// Signal for the flush currently pending on `target`, or an already
    /// resolved one when the target is idle.
    pub fn when_complete(&self, target: &Rc<T>) -> CompletionSignal {
        self.shared
            .slots
            .borrow()
            .get(&TargetId::of(target))
            .map(|slot| slot.signal.clone())
            .unwrap_or_else(CompletionSignal::resolved)
    }

    /// Open a slot for `target` holding `pending` and schedule its flush.
    ///
    /// Does nothing if a slot is already open; callers check first.
    pub fn open(&self, target: &Rc<T>, pending: S) {
        let id = TargetId::of(target);
        let (completer, signal) = CompletionSignal::pending();
        {
            let mut slots = self.shared.slots.borrow_mut();
            if slots.contains_key(&id) {
                debug_assert!(false, "slot already open for {id}");
                return;
            }
            slots.insert(id, Slot { pending, signal });
        }

        tracing::debug!(pipeline = self.shared.label, target = %id, "scheduling flush");

        let task = flush(Rc::clone(&self.shared), Rc::clone(target), completer);
        if let Err(err) = self.shared.scheduler.schedule(task.boxed_local()) {
            // The completer went down with the refused task, so anyone
            // awaiting the signal sees it as abandoned.
            self.shared.slots.borrow_mut().remove(&id);
            tracing::warn!(
                pipeline = self.shared.label,
                target = %id,
                error = %err,
                "flush could not be scheduled"
            );
        }
    }
}

/// The scheduled flush for one slot.
async fn flush<T: 'static, S: 'static>(
    shared: Rc<BatcherShared<T, S>>,
    target: Rc<T>,
    completer: Completer,
) {
    let id = TargetId::of(&target);

    // Detach first: the handler may write to the target again.
    let detached = shared.slots.borrow_mut().remove(&id);
    let Some(Slot { pending, signal }) = detached else {
        return;
    };
    drop(signal);

    tracing::debug!(pipeline = shared.label, target = %id, "flushing");

    let result = match (shared.on_flush)(&target, pending) {
        Some(deferred) => deferred.await,
        None => Ok(()),
    };

    if let Err(Err(err)) = completer.complete(result) {
        tracing::warn!(
            pipeline = shared.label,
            target = %id,
            error = %err,
            "update failed with no caller awaiting completion"
        );
    }
}

// =============================================================================
// TESTS
// =============================================================================
