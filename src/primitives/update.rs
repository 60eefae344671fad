// ============================================================================
// batch-observe - Update Pipeline
// Property-aware batching: deliver only net changes, once per tick
// ============================================================================
//
// Each managed property key has one change detector. A write to a managed
// property either:
// - opens a batch for the target (first qualifying write this tick),
// - refreshes the latest value of a key already in the batch, or
// - removes the key again when the write returns it to the batch baseline.
//
// The flush hands the surviving keys to the update callback. A batch whose
// keys were all reverted is skipped unless the pipeline is configured to
// invoke the callback for empty batches.
// ============================================================================

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::core::config::{EmptyFlushPolicy, PipelineOptions};
use crate::core::types::{AnyValue, ErasedDetector, PropertyKey, Registration, TargetId};
use crate::primitives::property::PropertyObserver;
use crate::reactivity::batching::TickBatcher;
use crate::reactivity::equality::not_equal;
use crate::reactivity::scheduling::{CompletionSignal, IntoCompletion, Scheduler};

// =============================================================================
// CHANGE RECORDS
// =============================================================================

/// Pending change of one key: the value before the batch opened and the most
/// recent qualifying write.
#[derive(Clone)]
struct ChangeRecord {
    old_value: AnyValue,
    latest_value: AnyValue,
}

/// Keys changed on one target since its batch opened, in first-write order.
#[derive(Default)]
struct PendingBatch {
    records: Vec<(PropertyKey, ChangeRecord)>,
}

impl PendingBatch {
    fn single(key: PropertyKey, record: ChangeRecord) -> Self {
        Self {
            records: vec![(key, record)],
        }
    }

    fn position(&self, key: PropertyKey) -> Option<usize> {
        self.records.iter().position(|(k, _)| *k == key)
    }

    /// Baseline of `key` if the key is in the batch.
    fn baseline(&self, key: PropertyKey) -> Option<AnyValue> {
        self.position(key)
            .map(|i| Rc::clone(&self.records[i].1.old_value))
    }

    fn insert(&mut self, key: PropertyKey, record: ChangeRecord) {
        match self.position(key) {
            Some(i) => self.records[i].1 = record,
            None => self.records.push((key, record)),
        }
    }

    fn set_latest(&mut self, key: PropertyKey, value: AnyValue) {
        if let Some(i) = self.position(key) {
            self.records[i].1.latest_value = value;
        }
    }

    fn remove(&mut self, key: PropertyKey) {
        if let Some(i) = self.position(key) {
            self.records.remove(i);
        }
    }

    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn into_changes(self) -> ChangedProperties {
        ChangedProperties {
            entries: self
                .records
                .into_iter()
                .map(|(key, record)| {
                    (
                        key,
                        PropertyChange {
                            old_value: record.old_value,
                            value: record.latest_value,
                        },
                    )
                })
                .collect(),
        }
    }
}

// =============================================================================
// DELIVERED CHANGES
// =============================================================================

/// Net change of one property over a batch.
#[derive(Clone)]
pub struct PropertyChange {
    old_value: AnyValue,
    value: AnyValue,
}

impl PropertyChange {
    /// Value immediately before the first qualifying write of the batch.
    ///
    /// `None` if `V` is not the property's type.
    pub fn old_value<V: 'static>(&self) -> Option<&V> {
        self.old_value.downcast_ref()
    }

    /// Value of the last write before the flush.
    pub fn value<V: 'static>(&self) -> Option<&V> {
        self.value.downcast_ref()
    }
}

impl fmt::Debug for PropertyChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyChange").finish_non_exhaustive()
    }
}

/// The properties delivered to an update callback.
///
/// Contains exactly the keys whose last write still differed from their
/// baseline when the flush ran, in the order they first changed.
#[derive(Clone, Default)]
pub struct ChangedProperties {
    entries: Vec<(PropertyKey, PropertyChange)>,
}

impl ChangedProperties {
    /// Number of changed properties.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no property changed. Only seen with `EmptyFlushPolicy::Invoke`.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` changed.
    pub fn contains(&self, key: PropertyKey) -> bool {
        self.get(key).is_some()
    }

    /// The change recorded for `key`.
    pub fn get(&self, key: PropertyKey) -> Option<&PropertyChange> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, change)| change)
    }

    /// Typed shorthand for `get(key)?.old_value()`.
    pub fn old_value<V: 'static>(&self, key: PropertyKey) -> Option<&V> {
        self.get(key)?.old_value()
    }

    /// Typed shorthand for `get(key)?.value()`.
    pub fn value<V: 'static>(&self, key: PropertyKey) -> Option<&V> {
        self.get(key)?.value()
    }

    /// Changed keys, in the order they first changed.
    pub fn keys(&self) -> impl Iterator<Item = PropertyKey> + '_ {
        self.entries.iter().map(|(key, _)| *key)
    }

    /// Changed keys with their changes, in the order they first changed.
    pub fn iter(&self) -> impl Iterator<Item = (PropertyKey, &PropertyChange)> {
        self.entries.iter().map(|(key, change)| (*key, change))
    }
}

impl fmt::Debug for ChangedProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

// =============================================================================
// UPDATE PIPELINE
// =============================================================================

/// Identifies one hooked property on one target: the property's address
/// plus the target it reports for.
type HookSite = (usize, TargetId);

struct UpdateInner<T: 'static> {
    registry: RefCell<HashMap<PropertyKey, Registration>>,
    // A site's entry is live while its hook is still attached.
    hooked: RefCell<HashMap<HookSite, Weak<()>>>,
    batcher: TickBatcher<T, PendingBatch>,
}

/// Property-aware batching pipeline.
///
/// Same-tick writes to managed properties of a target are folded into one
/// pending batch; the update callback receives the net changes once, after
/// the writes. Several pipelines may observe the same target, even the same
/// property, without seeing each other's batches.
///
/// # Example
///
/// ```
/// use batch_observe::{ChangedProperties, Executor, Property, UpdatePipeline};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// struct Card {
///     title: Property<String>,
/// }
///
/// let mut executor = Executor::new();
/// let delivered = Rc::new(RefCell::new(Vec::new()));
/// let pipeline = UpdatePipeline::new(executor.scheduler(), {
///     let delivered = delivered.clone();
///     move |_card: &Rc<Card>, changes: ChangedProperties| {
///         delivered.borrow_mut().push(changes.value::<String>("title").cloned());
///     }
/// });
///
/// let card = Rc::new(Card { title: Property::new("title", "a".to_string()) });
/// pipeline.observe_property(&card, &card.title);
///
/// card.title.set("b".into());
/// card.title.set("c".into());
/// executor.block_on(pipeline.when_update_complete(&card)).unwrap();
///
/// assert_eq!(*delivered.borrow(), vec![Some("c".to_string())]);
/// ```
pub struct UpdatePipeline<T: 'static> {
    inner: Rc<UpdateInner<T>>,
}

impl<T: 'static> Clone for UpdatePipeline<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> UpdatePipeline<T> {
    /// Create a pipeline that flushes through `scheduler`.
    pub fn new<R, F>(scheduler: impl Scheduler + 'static, update: F) -> Self
    where
        R: IntoCompletion,
        F: Fn(&Rc<T>, ChangedProperties) -> R + 'static,
    {
        Self::with_options(scheduler, PipelineOptions::default(), update)
    }

    /// Create a pipeline with explicit options.
    pub fn with_options<R, F>(
        scheduler: impl Scheduler + 'static,
        options: PipelineOptions,
        update: F,
    ) -> Self
    where
        R: IntoCompletion,
        F: Fn(&Rc<T>, ChangedProperties) -> R + 'static,
    {
        let PipelineOptions { label, empty_flush } = options;
        let on_flush = move |target: &Rc<T>, batch: PendingBatch| {
            if batch.is_empty() && empty_flush == EmptyFlushPolicy::Skip {
                tracing::debug!(pipeline = label, "every change reverted, skipping update");
                return None;
            }
            update(target, batch.into_changes()).into_completion()
        };
        Self {
            inner: Rc::new(UpdateInner {
                registry: RefCell::new(HashMap::new()),
                hooked: RefCell::new(HashMap::new()),
                batcher: TickBatcher::new(label, scheduler, on_flush),
            }),
        }
    }

    fn label(&self) -> &'static str {
        self.inner.batcher.label()
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Manage `key` with the default detector (`PartialEq` inequality).
    ///
    /// Writes still have to be reported through
    /// [`request_property_update`](Self::request_property_update) or a hook.
    /// Returns whether `key` is now managed with values of type `V`.
    pub fn register_property<V>(&self, key: PropertyKey) -> bool
    where
        V: PartialEq + 'static,
    {
        self.register_property_with(key, not_equal::<V>)
    }

    /// Manage `key` with a custom detector.
    ///
    /// The first registration of a key wins; later ones are ignored. Returns
    /// `false` if `key` is already managed with another value type.
    pub fn register_property_with<V: 'static>(
        &self,
        key: PropertyKey,
        detector: impl Fn(&V, &V) -> bool + 'static,
    ) -> bool {
        let mut registry = self.inner.registry.borrow_mut();
        match registry.get(key) {
            Some(existing) if existing.accepts::<V>() => {
                tracing::trace!(pipeline = self.label(), key, "property already registered");
                true
            }
            Some(existing) => {
                tracing::warn!(
                    pipeline = self.label(),
                    key,
                    registered = existing.type_name,
                    requested = std::any::type_name::<V>(),
                    "property already registered with another type"
                );
                false
            }
            None => {
                registry.insert(key, Registration::new(detector));
                true
            }
        }
    }

    /// Register `property` with the default detector and route its writes on
    /// `target` into this pipeline.
    ///
    /// Returns `false`, without hooking anything, when the key is already
    /// managed with another value type.
    pub fn observe_property<V, P>(&self, target: &Rc<T>, property: &P) -> bool
    where
        V: Clone + PartialEq + 'static,
        P: PropertyObserver<V> + ?Sized,
    {
        self.observe_property_with(target, property, not_equal::<V>)
    }

    /// Like [`observe_property`](Self::observe_property) with a custom
    /// detector.
    ///
    /// Each property is hooked at most once per target, so observing it
    /// again is a no-op. The hook holds the target and the pipeline weakly:
    /// a property never keeps its owner or the pipeline alive, and the hook
    /// detaches once either is gone.
    pub fn observe_property_with<V, P>(
        &self,
        target: &Rc<T>,
        property: &P,
        detector: impl Fn(&V, &V) -> bool + 'static,
    ) -> bool
    where
        V: Clone + 'static,
        P: PropertyObserver<V> + ?Sized,
    {
        let key = property.key();
        if !self.register_property_with(key, detector) {
            return false;
        }

        let site = (
            (property as *const P).cast::<()>() as usize,
            TargetId::of(target),
        );
        let attached = Rc::new(());
        {
            let mut hooked = self.inner.hooked.borrow_mut();
            hooked.retain(|_, live| live.strong_count() > 0);
            if hooked.contains_key(&site) {
                tracing::trace!(pipeline = self.label(), key, "property already observed");
                return true;
            }
            hooked.insert(site, Rc::downgrade(&attached));
        }

        let pipeline: Weak<UpdateInner<T>> = Rc::downgrade(&self.inner);
        let owner: Weak<T> = Rc::downgrade(target);
        property.register_write_hook(Rc::new(move |old: &V, new: &V| {
            // Lives exactly as long as this hook stays on the property.
            let _attached = &attached;
            let (Some(inner), Some(target)) = (pipeline.upgrade(), owner.upgrade()) else {
                return false;
            };
            UpdatePipeline { inner }.request_property_update(&target, key, old, new);
            true
        }));
        true
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Report a write of `key` on `target` from `old_value` to `new_value`.
    ///
    /// Never suspends. Writes to keys this pipeline doesn't manage are
    /// ignored.
    pub fn request_property_update<V>(
        &self,
        target: &Rc<T>,
        key: PropertyKey,
        old_value: &V,
        new_value: &V,
    ) where
        V: Clone + 'static,
    {
        let Some(detect) = self.detector_for::<V>(key) else {
            return;
        };
        let label = self.label();
        let batcher = &self.inner.batcher;
        let new_any: &dyn Any = new_value;

        // Detectors run with no pipeline state borrowed.
        match batcher.with_pending(target, |batch| batch.baseline(key)) {
            Some(Some(baseline)) => {
                if detect(&*baseline, new_any) {
                    let latest: AnyValue = Rc::new(new_value.clone());
                    batcher.with_pending(target, |batch| batch.set_latest(key, latest));
                    tracing::trace!(pipeline = label, key, "updated pending value");
                } else {
                    batcher.with_pending(target, |batch| batch.remove(key));
                    tracing::trace!(pipeline = label, key, "reverted to baseline");
                }
            }
            Some(None) => {
                if detect(old_value, new_any) {
                    let record = ChangeRecord::new(old_value, new_value);
                    batcher.with_pending(target, |batch| batch.insert(key, record));
                    tracing::trace!(pipeline = label, key, "added to pending batch");
                }
            }
            None => {
                if detect(old_value, new_any) {
                    let record = ChangeRecord::new(old_value, new_value);
                    tracing::trace!(
                        pipeline = label,
                        key,
                        target = %TargetId::of(target),
                        "opening batch"
                    );
                    batcher.open(target, PendingBatch::single(key, record));
                }
            }
        }
    }

    fn detector_for<V: 'static>(&self, key: PropertyKey) -> Option<ErasedDetector> {
        let registry = self.inner.registry.borrow();
        let Some(registration) = registry.get(key) else {
            tracing::trace!(pipeline = self.label(), key, "ignoring unmanaged property");
            return None;
        };
        if !registration.accepts::<V>() {
            tracing::warn!(
                pipeline = self.label(),
                key,
                registered = registration.type_name,
                written = std::any::type_name::<V>(),
                "ignoring write with mismatched value type"
            );
            return None;
        }
        Some(Rc::clone(&registration.detect))
    }

    // =========================================================================
    // COMPLETION
    // =========================================================================

    /// Wait for the flush currently pending on `target`, including any
    /// deferred work the update callback returns.
    ///
    /// Resolves immediately if nothing is pending.
    pub fn when_update_complete(&self, target: &Rc<T>) -> CompletionSignal {
        self.inner.batcher.when_complete(target)
    }

    /// Whether `target` has an open batch waiting for its flush.
    pub fn has_pending_update(&self, target: &Rc<T>) -> bool {
        self.inner.batcher.is_pending(target)
    }

    /// Whether `key` is managed by this pipeline.
    pub fn is_registered(&self, key: PropertyKey) -> bool {
        self.inner.registry.borrow().contains_key(key)
    }
}

impl ChangeRecord {
    fn new<V: Clone + 'static>(old_value: &V, new_value: &V) -> Self {
        Self {
            old_value: Rc::new(old_value.clone()),
            latest_value: Rc::new(new_value.clone()),
        }
    }
}

impl<T: 'static> fmt::Debug for UpdatePipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<PropertyKey> = self.inner.registry.borrow().keys().copied().collect();
        keys.sort_unstable();
        f.debug_struct("UpdatePipeline")
            .field("label", &self.label())
            .field("properties", &keys)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{UpdateError, UpdateResult};
    use crate::primitives::property::Property;
    use crate::reactivity::equality::safe_not_equal_f64;
    use crate::reactivity::scheduling::{Executor, UpdateFuture};
    use futures::FutureExt;
    use std::cell::Cell;

    struct Widget {
        foo: Property<String>,
        bar: Property<String>,
    }

    impl Widget {
        fn new(foo: &str, bar: &str) -> Rc<Self> {
            Rc::new(Self {
                foo: Property::new("foo", foo.to_string()),
                bar: Property::new("bar", bar.to_string()),
            })
        }
    }

    type Calls = Rc<RefCell<Vec<ChangedProperties>>>;

    fn recording_pipeline(executor: &Executor) -> (UpdatePipeline<Widget>, Calls) {
        let calls: Calls = Rc::new(RefCell::new(Vec::new()));
        let pipeline = UpdatePipeline::new(executor.scheduler(), {
            let calls = calls.clone();
            move |_: &Rc<Widget>, changes: ChangedProperties| calls.borrow_mut().push(changes)
        });
        (pipeline, calls)
    }

    fn observed_widget(pipeline: &UpdatePipeline<Widget>) -> Rc<Widget> {
        let widget = Widget::new("a", "b");
        pipeline.observe_property(&widget, &widget.foo);
        pipeline.observe_property(&widget, &widget.bar);
        widget
    }

    fn change(changes: &ChangedProperties, key: PropertyKey) -> Option<(String, String)> {
        Some((
            changes.old_value::<String>(key)?.clone(),
            changes.value::<String>(key)?.clone(),
        ))
    }

    fn pair(old: &str, new: &str) -> Option<(String, String)> {
        Some((old.to_string(), new.to_string()))
    }

    #[test]
    fn passes_all_updated_properties() {
        let mut executor = Executor::new();
        let (pipeline, calls) = recording_pipeline(&executor);
        let widget = observed_widget(&pipeline);

        widget.foo.set("c".into());
        widget.bar.set("d".into());
        assert!(calls.borrow().is_empty());

        executor.block_on(pipeline.when_update_complete(&widget)).unwrap();
        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(change(&calls[0], "foo"), pair("a", "c"));
        assert_eq!(change(&calls[0], "bar"), pair("b", "d"));
        assert_eq!(calls[0].keys().collect::<Vec<_>>(), vec!["foo", "bar"]);
    }

    #[test]
    fn passes_latest_value() {
        let mut executor = Executor::new();
        let (pipeline, calls) = recording_pipeline(&executor);
        let widget = observed_widget(&pipeline);

        widget.foo.set("b".into());
        widget.foo.set("c".into());

        executor.block_on(pipeline.when_update_complete(&widget)).unwrap();
        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 1);
        assert_eq!(change(&calls[0], "foo"), pair("a", "c"));
    }

    #[test]
    fn reverted_property_is_dropped() {
        let mut executor = Executor::new();
        let (pipeline, calls) = recording_pipeline(&executor);
        let widget = observed_widget(&pipeline);

        widget.foo.set("c".into());
        widget.bar.set("d".into());
        widget.foo.set("a".into());

        executor.block_on(pipeline.when_update_complete(&widget)).unwrap();
        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].contains("foo"));
        assert_eq!(change(&calls[0], "bar"), pair("b", "d"));
    }

    #[test]
    fn fully_reverted_batch_skips_callback() {
        let mut executor = Executor::new();
        let (pipeline, calls) = recording_pipeline(&executor);
        let widget = observed_widget(&pipeline);

        widget.foo.set("b".into());
        widget.foo.set("a".into());
        // The batch stays open until its flush
        assert!(pipeline.has_pending_update(&widget));

        assert_eq!(
            executor.block_on(pipeline.when_update_complete(&widget)),
            Ok(())
        );
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn reverted_key_can_reenter() {
        let mut executor = Executor::new();
        let (pipeline, calls) = recording_pipeline(&executor);
        let widget = observed_widget(&pipeline);

        widget.foo.set("b".into());
        widget.foo.set("a".into());
        widget.foo.set("z".into());

        executor.run_until_idle();
        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(change(&calls[0], "foo"), pair("a", "z"));
    }

    #[test]
    fn same_value_write_does_not_open_batch() {
        let executor = Executor::new();
        let (pipeline, _calls) = recording_pipeline(&executor);
        let widget = observed_widget(&pipeline);

        widget.foo.set("a".into());
        assert!(!pipeline.has_pending_update(&widget));
    }

    #[test]
    fn empty_flush_policy_invoke() {
        let mut executor = Executor::new();
        let calls: Calls = Rc::new(RefCell::new(Vec::new()));
        let pipeline = UpdatePipeline::with_options(
            executor.scheduler(),
            PipelineOptions::default().empty_flush(EmptyFlushPolicy::Invoke),
            {
                let calls = calls.clone();
                move |_: &Rc<Widget>, changes: ChangedProperties| calls.borrow_mut().push(changes)
            },
        );
        let widget = observed_widget(&pipeline);

        widget.foo.set("b".into());
        widget.foo.set("a".into());

        executor.block_on(pipeline.when_update_complete(&widget)).unwrap();
        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].is_empty());
    }

    #[test]
    fn unmanaged_property_is_ignored() {
        let executor = Executor::new();
        let (pipeline, _calls) = recording_pipeline(&executor);
        let widget = Widget::new("a", "b");
        pipeline.observe_property(&widget, &widget.foo);

        pipeline.request_property_update(&widget, "baz", &1, &2);
        assert!(!pipeline.has_pending_update(&widget));
        assert!(!pipeline.is_registered("baz"));
    }

    #[test]
    fn mismatched_type_is_ignored() {
        let executor = Executor::new();
        let (pipeline, _calls) = recording_pipeline(&executor);
        let widget = observed_widget(&pipeline);

        pipeline.request_property_update(&widget, "foo", &1u8, &2u8);
        assert!(!pipeline.has_pending_update(&widget));
    }

    #[test]
    fn first_registration_wins() {
        let mut executor = Executor::new();
        let (pipeline, calls) = recording_pipeline(&executor);
        pipeline.register_property_with("foo", |_: &String, _: &String| true);
        let widget = observed_widget(&pipeline);

        // The always-changed detector stays in charge: same-value writes count
        widget.foo.set("a".into());
        executor.run_until_idle();
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn manual_reporting_without_hooks() {
        let mut executor = Executor::new();
        let (pipeline, calls) = recording_pipeline(&executor);
        pipeline.register_property::<String>("foo");
        let widget = Widget::new("a", "b");

        pipeline.request_property_update(&widget, "foo", &"a".to_string(), &"b".to_string());
        pipeline.request_property_update(&widget, "foo", &"b".to_string(), &"c".to_string());

        executor.run_until_idle();
        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(change(&calls[0], "foo"), pair("a", "c"));
    }

    #[test]
    fn custom_detector_controls_revert() {
        struct Gauge {
            level: Property<f64>,
        }

        let mut executor = Executor::new();
        let calls = Rc::new(Cell::new(0));
        let pipeline = UpdatePipeline::new(executor.scheduler(), {
            let calls = calls.clone();
            move |_: &Rc<Gauge>, _: ChangedProperties| calls.set(calls.get() + 1)
        });
        let gauge = Rc::new(Gauge {
            level: Property::new("level", f64::NAN),
        });
        pipeline.observe_property_with(&gauge, &gauge.level, safe_not_equal_f64);

        // NaN -> 1.0 -> NaN reverts under the NaN-aware detector
        gauge.level.set(1.0);
        gauge.level.set(f64::NAN);

        executor.run_until_idle();
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn write_during_update_starts_fresh_batch() {
        let mut executor = Executor::new();
        let calls: Calls = Rc::new(RefCell::new(Vec::new()));
        let pipeline = UpdatePipeline::new(executor.scheduler(), {
            let calls = calls.clone();
            move |widget: &Rc<Widget>, changes: ChangedProperties| {
                let first = calls.borrow().is_empty();
                calls.borrow_mut().push(changes);
                if first {
                    // Derived write made in reaction to the first delivery
                    widget.bar.set("derived".into());
                }
            }
        });
        let widget = observed_widget(&pipeline);

        widget.foo.set("c".into());
        executor.run_until_idle();

        let calls = calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].keys().collect::<Vec<_>>(), vec!["foo"]);
        assert_eq!(change(&calls[1], "bar"), pair("b", "derived"));
    }

    #[test]
    fn independent_pipelines_on_same_property() {
        let mut executor = Executor::new();
        let (p1, calls1) = recording_pipeline(&executor);
        let (p2, calls2) = recording_pipeline(&executor);
        let widget = Widget::new("a", "b");
        p1.observe_property(&widget, &widget.foo);
        p2.observe_property(&widget, &widget.foo);
        p2.observe_property(&widget, &widget.bar);

        widget.foo.set("b".into());
        widget.bar.set("x".into());

        let (r1, r2) = executor.block_on(futures::future::join(
            p1.when_update_complete(&widget),
            p2.when_update_complete(&widget),
        ));
        assert!(r1.is_ok() && r2.is_ok());

        let (calls1, calls2) = (calls1.borrow(), calls2.borrow());
        assert_eq!(calls1.len(), 1);
        assert_eq!(calls2.len(), 1);
        assert_eq!(calls1[0].keys().collect::<Vec<_>>(), vec!["foo"]);
        assert_eq!(calls2[0].keys().collect::<Vec<_>>(), vec!["foo", "bar"]);
    }

    #[test]
    fn deferred_update_failure_reaches_waiter() {
        let mut executor = Executor::new();
        let pipeline = UpdatePipeline::new(executor.scheduler(), {
            move |_: &Rc<Widget>, changes: ChangedProperties| -> UpdateFuture {
                async move {
                    if changes.contains("bar") {
                        Err(UpdateError::failed("bar is read-only"))
                    } else {
                        Ok(())
                    }
                }
                .boxed_local()
            }
        });
        let widget = observed_widget(&pipeline);

        widget.foo.set("x".into());
        assert_eq!(
            executor.block_on(pipeline.when_update_complete(&widget)),
            Ok(())
        );

        widget.bar.set("y".into());
        assert_eq!(
            executor.block_on(pipeline.when_update_complete(&widget)),
            Err(UpdateError::Failed("bar is read-only".into()))
        );
    }

    #[test]
    fn sync_result_callback() {
        let mut executor = Executor::new();
        let pipeline = UpdatePipeline::new(
            executor.scheduler(),
            |_: &Rc<Widget>, _: ChangedProperties| -> UpdateResult { Err(UpdateError::Abandoned) },
        );
        let widget = observed_widget(&pipeline);

        widget.foo.set("x".into());
        assert_eq!(
            executor.block_on(pipeline.when_update_complete(&widget)),
            Err(UpdateError::Abandoned)
        );
    }

    #[test]
    fn hooks_do_not_keep_target_alive() {
        let executor = Executor::new();
        let (pipeline, _calls) = recording_pipeline(&executor);
        let widget = observed_widget(&pipeline);
        let weak = Rc::downgrade(&widget);

        drop(widget);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn dropped_pipeline_stops_observing() {
        let mut executor = Executor::new();
        let (pipeline, calls) = recording_pipeline(&executor);
        let widget = observed_widget(&pipeline);

        drop(pipeline);
        widget.foo.set("z".into());
        executor.run_until_idle();
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn observing_twice_hooks_once() {
        let mut executor = Executor::new();
        let (pipeline, calls) = recording_pipeline(&executor);
        let widget = Widget::new("a", "b");
        assert!(pipeline.observe_property(&widget, &widget.foo));
        assert!(pipeline.observe_property(&widget, &widget.foo));
        assert_eq!(widget.foo.hook_count(), 1);

        widget.foo.set("b".into());
        widget.foo.set("a".into());
        executor.run_until_idle();
        assert!(calls.borrow().is_empty());

        widget.foo.set("c".into());
        executor.run_until_idle();
        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(change(&calls[0], "foo"), pair("a", "c"));
    }

    #[test]
    fn same_property_on_other_target_is_hooked() {
        let executor = Executor::new();
        let (pipeline, _calls) = recording_pipeline(&executor);
        let first = Widget::new("a", "b");
        let second = Widget::new("a", "b");

        // A shared property reporting for two owners gets one hook per owner
        assert!(pipeline.observe_property(&first, &first.foo));
        assert!(pipeline.observe_property(&second, &first.foo));
        assert_eq!(first.foo.hook_count(), 2);
    }

    #[test]
    fn conflicting_type_is_not_observed() {
        let mut executor = Executor::new();
        let (pipeline, calls) = recording_pipeline(&executor);
        assert!(pipeline.register_property::<u8>("foo"));
        let widget = Widget::new("a", "b");

        assert!(!pipeline.observe_property(&widget, &widget.foo));
        assert_eq!(widget.foo.hook_count(), 0);
        assert!(pipeline.is_registered("foo"));

        widget.foo.set("z".into());
        executor.run_until_idle();
        assert!(!pipeline.has_pending_update(&widget));
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn register_reports_conflicting_type() {
        let executor = Executor::new();
        let (pipeline, _calls) = recording_pipeline(&executor);

        assert!(pipeline.register_property::<String>("foo"));
        assert!(pipeline.register_property::<String>("foo"));
        assert!(!pipeline.register_property::<u8>("foo"));
    }

    #[test]
    fn hooks_of_dropped_pipeline_are_detached() {
        let executor = Executor::new();
        let (pipeline, _calls) = recording_pipeline(&executor);
        let widget = observed_widget(&pipeline);
        assert_eq!(widget.foo.hook_count(), 1);

        drop(pipeline);
        widget.foo.set("z".into());
        assert_eq!(widget.foo.hook_count(), 0);
        assert_eq!(widget.bar.hook_count(), 1);
    }

    #[test]
    fn debug_lists_registered_keys() {
        let executor = Executor::new();
        let (pipeline, _calls) = recording_pipeline(&executor);
        let _widget = observed_widget(&pipeline);

        let out = format!("{pipeline:?}");
        assert!(out.contains("\"bar\", \"foo\""));
    }
}
