// ============================================================================
// batch-observe - Observed Property
// A value cell that reports every write to its hooks before committing
// ============================================================================

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::core::types::PropertyKey;

/// Hook invoked with `(old, new)` for every write to a property.
///
/// Returns `false` once it has nothing left to observe; the property then
/// detaches it.
pub type WriteHook<V> = Rc<dyn Fn(&V, &V) -> bool>;

// =============================================================================
// PROPERTY OBSERVER
// =============================================================================

/// Anything that can report writes to a named property.
///
/// Hooks run synchronously, once per write, before the new value is
/// committed. Every attached hook fires on every write.
pub trait PropertyObserver<V> {
    /// Name of the observed property.
    fn key(&self) -> PropertyKey;

    /// Add a hook. It stays attached until it returns `false`.
    fn register_write_hook(&self, hook: WriteHook<V>);
}

// =============================================================================
// PROPERTY<V>
// =============================================================================

/// A named, observed field of a target.
///
/// Targets hold their managed state in `Property` fields and are shared as
/// `Rc<T>`; pipelines attach to a field with `observe_property`.
///
/// # Example
///
/// ```
/// use batch_observe::{Property, PropertyObserver};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let name = Property::new("name", String::from("a"));
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// name.register_write_hook(Rc::new({
///     let seen = seen.clone();
///     move |old: &String, new: &String| {
///         seen.borrow_mut().push(format!("{old}->{new}"));
///         true
///     }
/// }));
///
/// name.set("b".into());
/// assert_eq!(name.get(), "b");
/// assert_eq!(*seen.borrow(), vec!["a->b"]);
/// ```
pub struct Property<V> {
    key: PropertyKey,
    value: RefCell<V>,
    hooks: RefCell<Vec<WriteHook<V>>>,
}

impl<V> Property<V> {
    /// Create a property. The initial value is not reported to any hook.
    pub fn new(key: PropertyKey, value: V) -> Self {
        Self {
            key,
            value: RefCell::new(value),
            hooks: RefCell::new(Vec::new()),
        }
    }

    /// Get the current value (cloning).
    pub fn get(&self) -> V
    where
        V: Clone,
    {
        self.value.borrow().clone()
    }

    /// Access the current value without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        f(&self.value.borrow())
    }

    /// Write a new value.
    ///
    /// Every hook sees the outgoing and incoming values, then the new value
    /// is committed. Hooks may read the property but must not write it.
    /// Hooks that report they are done are detached afterwards.
    pub fn set(&self, value: V) {
        // Collect first so a hook registering another hook can't trip the borrow.
        let hooks: Vec<WriteHook<V>> = self.hooks.borrow().clone();
        let mut detached = Vec::new();
        {
            let current = self.value.borrow();
            for hook in &hooks {
                if !hook(&current, &value) {
                    detached.push(Rc::clone(hook));
                }
            }
        }
        if !detached.is_empty() {
            self.hooks
                .borrow_mut()
                .retain(|hook| !detached.iter().any(|done| Rc::ptr_eq(hook, done)));
        }
        *self.value.borrow_mut() = value;
    }

    /// Modify the value in place. Reported to hooks like a `set`.
    ///
    /// # Example
    ///
    /// ```
    /// use batch_observe::Property;
    ///
    /// let count = Property::new("count", 1);
    /// count.update(|n| *n += 1);
    /// assert_eq!(count.get(), 2);
    /// ```
    pub fn update(&self, f: impl FnOnce(&mut V))
    where
        V: Clone,
    {
        let mut next = self.get();
        f(&mut next);
        self.set(next);
    }

    /// Number of hooks attached.
    pub fn hook_count(&self) -> usize {
        self.hooks.borrow().len()
    }
}

impl<V> PropertyObserver<V> for Property<V> {
    fn key(&self) -> PropertyKey {
        self.key
    }

    fn register_write_hook(&self, hook: WriteHook<V>) {
        self.hooks.borrow_mut().push(hook);
    }
}

impl<V: fmt::Debug> fmt::Debug for Property<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("key", &self.key)
            .field("value", &*self.value.borrow())
            .field("hooks", &self.hook_count())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
