// ============================================================================
// batch-observe - Type Definitions
// Target identity, property keys and type-erased values
// ============================================================================

use std::any::{Any, TypeId};
use std::fmt;
use std::rc::Rc;

// =============================================================================
// TARGET IDENTITY
// =============================================================================

/// Identity of an observed target.
///
/// Targets are shared as `Rc<T>`; the identity is the address of the
/// allocation. A pipeline only keeps an entry keyed by this id while a flush
/// is pending, and the pending flush task holds a strong `Rc<T>`, so the
/// address can't be reused while the id is live.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(usize);

impl TargetId {
    /// Identity of the given target.
    pub fn of<T>(target: &Rc<T>) -> Self {
        Self(Rc::as_ptr(target) as *const () as usize)
    }
}

impl fmt::Debug for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetId({:#x})", self.0)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// =============================================================================
// PROPERTY KEYS & VALUES
// =============================================================================

/// Name of a managed property.
pub type PropertyKey = &'static str;

/// A type-erased property value captured in a batch.
///
/// Values are captured once per qualifying write and shared between the
/// pending batch and the change map handed to the update callback.
pub type AnyValue = Rc<dyn Any>;

/// Plain function form of a change detector.
///
/// Returns `true` when `new` counts as a real change from `old`.
pub type DetectFn<V> = fn(&V, &V) -> bool;

/// Type-erased change detector stored in a pipeline's property registry.
pub(crate) type ErasedDetector = Rc<dyn Fn(&dyn Any, &dyn Any) -> bool>;

/// Erase a typed detector.
///
/// Values of any other type count as changed; the registry checks the value
/// type before a detector is ever reached, so that arm is unreachable in
/// practice.
pub(crate) fn erase_detector<V: 'static>(
    detect: impl Fn(&V, &V) -> bool + 'static,
) -> ErasedDetector {
    Rc::new(move |old: &dyn Any, new: &dyn Any| {
        match (old.downcast_ref::<V>(), new.downcast_ref::<V>()) {
            (Some(old), Some(new)) => detect(old, new),
            _ => true,
        }
    })
}

/// A detector registered for one property key.
#[derive(Clone)]
pub(crate) struct Registration {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub detect: ErasedDetector,
}

impl Registration {
    pub fn new<V: 'static>(detect: impl Fn(&V, &V) -> bool + 'static) -> Self {
        Self {
            type_id: TypeId::of::<V>(),
            type_name: std::any::type_name::<V>(),
            detect: erase_detector(detect),
        }
    }

    pub fn accepts<V: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<V>()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
