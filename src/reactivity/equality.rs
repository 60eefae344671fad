// ============================================================================
// batch-observe - Change Detectors
// Predicates deciding whether a write counts as a real change
// ============================================================================
//
// A detector answers "is `new` different from `old`?". It is consulted when a
// key first enters a batch and again on every later write to that key in the
// same batch, where `old` is the batch baseline. Detectors must be pure.
// ============================================================================

use crate::core::types::DetectFn;

// =============================================================================
// DEFAULT DETECTOR
// =============================================================================

/// Default detector: the values differ under `PartialEq`.
///
/// # Example
/// ```
/// use batch_observe::reactivity::equality::not_equal;
///
/// assert!(not_equal(&"a", &"b"));
/// assert!(!not_equal(&42, &42));
/// ```
pub fn not_equal<V: PartialEq>(old: &V, new: &V) -> bool {
    old != new
}

// =============================================================================
// FLOATING POINT
// =============================================================================

/// NaN-aware detector for f64: NaN followed by NaN is not a change.
///
/// # Example
/// ```
/// use batch_observe::reactivity::equality::safe_not_equal_f64;
///
/// assert!(safe_not_equal_f64(&1.0, &2.0));
/// assert!(!safe_not_equal_f64(&f64::NAN, &f64::NAN));
/// assert!(safe_not_equal_f64(&f64::NAN, &1.0));
/// ```
pub fn safe_not_equal_f64(old: &f64, new: &f64) -> bool {
    if old.is_nan() {
        return !new.is_nan();
    }
    old != new
}

/// NaN-aware detector for f32.
pub fn safe_not_equal_f32(old: &f32, new: &f32) -> bool {
    if old.is_nan() {
        return !new.is_nan();
    }
    old != new
}

// =============================================================================
// SEQUENCES
// =============================================================================

/// Element-wise detector for slices and vectors.
pub fn not_equal_slice<T: PartialEq>(old: &[T], new: &[T]) -> bool {
    old.len() != new.len() || old.iter().zip(new).any(|(a, b)| a != b)
}

// =============================================================================
// FIXED ANSWERS
// =============================================================================

/// Every write is a change, even writing the same value again.
///
/// A key using this detector can never be reverted out of a batch.
pub fn always_changed<V>(_old: &V, _new: &V) -> bool {
    true
}

/// No write is ever a change. The key is effectively unmanaged.
pub fn never_changed<V>(_old: &V, _new: &V) -> bool {
    false
}

// =============================================================================
// PROJECTIONS
// =============================================================================

/// Detect changes of a projection of the value only.
///
/// # Example
/// ```
/// use batch_observe::reactivity::equality::changed_by;
///
/// #[derive(Clone)]
/// struct User { id: u32, name: String }
///
/// let by_id = changed_by(|u: &User| u.id);
/// let a = User { id: 1, name: "Ada".into() };
/// let b = User { id: 1, name: "Grace".into() };
/// assert!(!by_id(&a, &b));
/// ```
pub fn changed_by<V, F, R>(project: F) -> impl Fn(&V, &V) -> bool
where
    F: Fn(&V) -> R,
    R: PartialEq,
{
    move |old: &V, new: &V| project(old) != project(new)
}

/// The default detector as a plain function pointer.
pub fn default_detector<V: PartialEq + 'static>() -> DetectFn<V> {
    not_equal
}

// =============================================================================
// TESTS
// =============================================================================
