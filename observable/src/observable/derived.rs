use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::{
    Accessor, ChangeContext, Equality, Observable, ObservableError, ObservableId, ObservableNode, Observer, ObserverId, ObserverRef,
    change::{ChangeHandling, ChangeOptions},
    context::{Tracker, run_with_accessor},
    observable::debug_name,
    observer::ObserverSet,
    tracking::{Dependencies, FlagGuard},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DerivedState {
    /// Never computed, or no longer observed. Holds no value and no dependencies.
    Initial,
    /// A dependency might have changed; confirm before recomputing
    DependenciesMightHaveChanged,
    /// A dependency changed; the cached value must be recomputed
    Stale,
    UpToDate,
}

/// Configuration for [`Derived::with_options`]
pub struct DerivedOptions<T, S = ()> {
    equality: Equality<T>,
    changes: ChangeOptions<S>,
    debug_name: Option<String>,
}

impl<T: PartialEq + 'static> Default for DerivedOptions<T> {
    fn default() -> Self { Self::new(Equality::partial_eq()) }
}

impl<T: 'static> DerivedOptions<T> {
    pub fn new(equality: Equality<T>) -> Self { Self { equality, changes: ChangeOptions::none(), debug_name: None } }
}

impl<T: 'static, S: 'static> DerivedOptions<T, S> {
    pub fn debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }

    pub fn equality(mut self, equality: Equality<T>) -> Self {
        self.equality = equality;
        self
    }

    /// Accumulate changes into a summary of type `S2`, handed to the next computation.
    /// Replaces any previously configured `will_handle_change`.
    pub fn change_summary<S2: 'static>(self, create: impl Fn() -> S2 + 'static) -> DerivedOptions<T, S2> {
        DerivedOptions { equality: self.equality, changes: ChangeOptions::with_summary(create), debug_name: self.debug_name }
    }

    /// Decide per change whether the derived value should be invalidated, recording it in the summary
    pub fn will_handle_change(mut self, will_handle_change: impl Fn(&ChangeContext<'_>, &mut S) -> bool + 'static) -> Self {
        self.changes.will_handle_change = Some(Box::new(will_handle_change));
        self
    }
}

/// The value side of a derived observable, erased over the change summary type
trait DerivedValue<T> {
    fn try_get(&self) -> Result<T, ObservableError>;
    fn is_computing(&self) -> bool;
    fn observer_count(&self) -> usize;
}

struct Inner<T, S> {
    id: ObservableId,
    observer_id: ObserverId,
    me: Weak<Inner<T, S>>,
    name: Option<String>,
    compute: Box<dyn Fn(&Accessor, S) -> T>,
    equality: Equality<T>,
    changes: ChangeHandling<S>,
    state: Cell<DerivedState>,
    update_count: Cell<usize>,
    computing: Cell<bool>,
    dependencies: Dependencies,
    observers: ObserverSet,
    /// Observers removed during an update, still owed their `end_update`
    removed_observers: RefCell<Vec<ObserverRef>>,
    value: RefCell<Option<T>>,
}

/// A lazily computed, cached observable.
///
/// The computation runs on first read and re-runs only when a dependency it actually read has
/// changed. While nobody observes a derived value it keeps no cache and no dependencies: every read
/// recomputes from scratch, and nothing is retained between reads.
///
/// # Example
/// ```
/// use ankurah_observable::*;
///
/// let a = Settable::new(1);
/// let b = Settable::new(2);
/// let sum = {
///     let (a, b) = (a.clone(), b.clone());
///     Derived::new(move || a.get() + b.get())
/// };
/// assert_eq!(sum.get(), 3);
/// b.set(5);
/// assert_eq!(sum.get(), 6);
/// ```
pub struct Derived<T> {
    node: Rc<dyn ObservableNode>,
    value: Rc<dyn DerivedValue<T>>,
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self { Self { node: self.node.clone(), value: self.value.clone() } }
}

impl<T: Clone + 'static> Derived<T> {
    /// Derive a value from the observables `compute` reads through [`Observable::get`]
    pub fn new(compute: impl Fn() -> T + 'static) -> Self
    where T: PartialEq {
        Self::with_options(DerivedOptions::default(), move |_, _| compute())
    }

    /// Derive a value from the observables read through the accessor passed to `compute`.
    /// Reads through [`Observable::get`] inside `compute` are tracked as well.
    pub fn with_options<S: 'static>(options: DerivedOptions<T, S>, compute: impl Fn(&Accessor, S) -> T + 'static) -> Self {
        let inner = Rc::new_cyclic(|me| Inner {
            id: ObservableId::new(),
            observer_id: ObserverId::new(),
            me: me.clone(),
            name: options.debug_name,
            compute: Box::new(compute),
            equality: options.equality,
            changes: options.changes.into_handling(),
            state: Cell::new(DerivedState::Initial),
            update_count: Cell::new(0),
            computing: Cell::new(false),
            dependencies: Dependencies::new(),
            observers: ObserverSet::new(),
            removed_observers: RefCell::new(Vec::new()),
            value: RefCell::new(None),
        });
        Self { node: inner.clone(), value: inner }
    }

    /// Current value without tracking, or [`ObservableError::CyclicDependency`] if read from its own computation
    pub fn try_get(&self) -> Result<T, ObservableError> { self.value.try_get() }

    /// Like [`Observable::read`], returning the cycle error instead of panicking
    pub fn try_read(&self, accessor: &Accessor) -> Result<T, ObservableError> {
        // Checked before tracking, so a self-read never subscribes the derived to itself
        if self.value.is_computing() {
            return Err(ObservableError::CyclicDependency { name: self.node.debug_name() });
        }
        accessor.try_track(self.node.clone(), || self.value.try_get())?
    }

    pub fn observer_count(&self) -> usize { self.value.observer_count() }

    pub fn debug_name(&self) -> String { self.node.debug_name() }
}

impl<T: Clone + 'static> Observable<T> for Derived<T> {
    fn node(&self) -> Rc<dyn ObservableNode> { self.node.clone() }

    fn peek(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(e) => e.raise(),
        }
    }

    fn read(&self, accessor: &Accessor) -> T {
        match self.try_read(accessor) {
            Ok(value) => value,
            Err(e) => e.raise(),
        }
    }
}

impl<T: std::fmt::Debug + Clone + 'static> std::fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived").field("name", &self.node.debug_name()).field("observers", &self.observer_count()).finish()
    }
}

impl<T: Clone + 'static, S: 'static> Inner<T, S> {
    fn cycle_error(&self) -> ObservableError { ObservableError::CyclicDependency { name: self.debug_name() } }

    /// Bring the cached value up to date, confirming possible changes with the dependencies first.
    /// A computation that invalidates its own dependencies is run again.
    fn ensure_up_to_date(&self) {
        loop {
            if self.state.get() == DerivedState::DependenciesMightHaveChanged {
                for dependency in self.dependencies.nodes() {
                    // A confirmed change arrives as handle_change and marks us stale
                    dependency.update();
                    if self.state.get() == DerivedState::Stale {
                        break;
                    }
                }
            }
            if self.state.get() == DerivedState::DependenciesMightHaveChanged {
                self.state.set(DerivedState::UpToDate);
            }
            if self.state.get() == DerivedState::UpToDate {
                return;
            }
            self.recompute();
            if self.state.get() == DerivedState::UpToDate || self.me.strong_count() == 0 {
                return;
            }
        }
    }

    fn recompute(&self) {
        let Some(me) = self.me.upgrade() else { return };
        let had_value = self.value.borrow().is_some();
        // Changes arriving while computing mark the state stale again
        self.state.set(DerivedState::UpToDate);
        trace!("Derived({}) recomputing", self.debug_name());

        let summary = self.changes.take_summary();
        let accessor = Accessor::new(self.me.clone());
        let computed = {
            let _computing = FlagGuard::raise(&self.computing);
            let run = AssertUnwindSafe(|| {
                self.dependencies.run_tracked(self.observer_id, || run_with_accessor(Some(&accessor), || (self.compute)(&accessor, summary)))
            });
            match catch_unwind(run) {
                Ok(value) => value,
                Err(payload) => {
                    // Without a previous value there is nothing for observers to compare against
                    self.state.set(if had_value { DerivedState::Stale } else { DerivedState::Initial });
                    resume_unwind(payload)
                }
            }
        };

        let previous = self.value.replace(Some(computed));
        let changed = match (previous.as_ref(), self.value.borrow().as_ref()) {
            (Some(previous), Some(current)) => !self.equality.eq(previous, current),
            _ => true,
        };
        drop(previous);

        if had_value && changed {
            let node: Rc<dyn ObservableNode> = me;
            for observer in self.observers.snapshot() {
                observer.handle_change(&*node, None);
            }
        }
    }

    /// One-off computation for reads while unobserved
    fn compute_uncached(&self) -> T {
        trace!("Derived({}) computing without observers", self.debug_name());
        let summary = self.changes.fresh_summary();
        let accessor = Accessor::untracked();
        let _computing = FlagGuard::raise(&self.computing);
        run_with_accessor(None, || (self.compute)(&accessor, summary))
    }

    /// Observers dropped without unsubscribing are pruned here; losing the last one releases the cache
    fn is_observed(&self) -> bool {
        if !self.observers.is_empty() {
            return true;
        }
        if self.state.get() != DerivedState::Initial || !self.dependencies.is_empty() {
            self.on_last_observer_removed();
        }
        false
    }

    fn on_last_observer_removed(&self) {
        debug!("Derived({}) lost its last observer, dropping cached value", self.debug_name());
        self.state.set(DerivedState::Initial);
        let value = self.value.replace(None);
        drop(value);
        self.dependencies.clear(self.observer_id);
    }
}

impl<T: Clone + 'static, S: 'static> DerivedValue<T> for Inner<T, S> {
    fn try_get(&self) -> Result<T, ObservableError> {
        if self.computing.get() {
            return Err(self.cycle_error());
        }
        if !self.is_observed() {
            return Ok(self.compute_uncached());
        }
        self.ensure_up_to_date();
        self.value.borrow().clone().ok_or_else(|| self.cycle_error())
    }

    fn is_computing(&self) -> bool { self.computing.get() }

    fn observer_count(&self) -> usize {
        if self.computing.get() || self.is_observed() { self.observers.len() } else { 0 }
    }
}

impl<T: Clone + 'static, S: 'static> ObservableNode for Inner<T, S> {
    fn observable_id(&self) -> ObservableId { self.id }

    fn debug_name(&self) -> String { debug_name("Derived", &self.name, self.id) }

    fn add_observer(&self, observer: ObserverRef) {
        let needs_begin = !self.observers.contains(observer.id()) && self.update_count.get() > 0;
        if !self.observers.insert(observer.clone()) || !needs_begin {
            return;
        }
        // Re-added during the same update: the pending end_update is still owed, so no second begin
        let mut removed = self.removed_observers.borrow_mut();
        if let Some(index) = removed.iter().position(|o| o.id() == observer.id()) {
            removed.remove(index);
            return;
        }
        drop(removed);
        if let Some(observer) = observer.upgrade() {
            observer.begin_update(self);
        }
    }

    fn remove_observer(&self, observer: ObserverId) {
        let Some(removed) = self.observers.remove(observer) else { return };
        if self.update_count.get() > 0 {
            self.removed_observers.borrow_mut().push(removed);
        }
        if self.observers.is_empty() {
            self.on_last_observer_removed();
        }
    }

    fn update(&self) {
        if self.computing.get() || !self.is_observed() {
            return;
        }
        self.ensure_up_to_date();
    }
}

impl<T: Clone + 'static, S: 'static> Observer for Inner<T, S> {
    fn observer_id(&self) -> ObserverId { self.observer_id }

    fn begin_update(&self, _observable: &dyn ObservableNode) {
        let count = self.update_count.get() + 1;
        self.update_count.set(count);
        let first = count == 1;
        if self.state.get() == DerivedState::UpToDate {
            self.state.set(DerivedState::DependenciesMightHaveChanged);
            // Observers already received begin_update from the first dependency
            if !first {
                for observer in self.observers.snapshot() {
                    observer.handle_possible_change(self);
                }
            }
        }
        if first {
            for observer in self.observers.snapshot() {
                observer.begin_update(self);
            }
        }
    }

    fn end_update(&self, _observable: &dyn ObservableNode) {
        let count = self.update_count.get().saturating_sub(1);
        self.update_count.set(count);
        if count > 0 {
            return;
        }
        for observer in self.observers.snapshot() {
            observer.end_update(self);
        }
        let removed = std::mem::take(&mut *self.removed_observers.borrow_mut());
        for observer in removed.iter().filter_map(ObserverRef::upgrade) {
            observer.end_update(self);
        }
    }

    fn handle_possible_change(&self, observable: &dyn ObservableNode) {
        if self.state.get() == DerivedState::UpToDate && self.dependencies.is_tracked(observable.observable_id()) {
            self.state.set(DerivedState::DependenciesMightHaveChanged);
            for observer in self.observers.snapshot() {
                observer.handle_possible_change(self);
            }
        }
    }

    fn handle_change(&self, observable: &dyn ObservableNode, change: Option<&dyn Any>) {
        if !self.dependencies.is_tracked(observable.observable_id()) {
            return;
        }
        let accepted = self.changes.will_handle(&self.debug_name(), &ChangeContext::new(observable, change));
        let state = self.state.get();
        let was_up_to_date = state == DerivedState::UpToDate;
        if accepted && (was_up_to_date || state == DerivedState::DependenciesMightHaveChanged) {
            self.state.set(DerivedState::Stale);
            if was_up_to_date {
                for observer in self.observers.snapshot() {
                    observer.handle_possible_change(self);
                }
            }
        }
    }
}

impl<T: Clone + 'static, S: 'static> Tracker for Inner<T, S> {
    fn subscribe(&self, dependency: Rc<dyn ObservableNode>) -> Result<(), ObservableError> {
        if !self.computing.get() {
            let name = debug_name("Derived", &self.name, self.id);
            return Err(ObservableError::AccessorMisuse { name });
        }
        self.dependencies.subscribe(ObserverRef::from_weak(self.observer_id, self.me.clone()), dependency);
        Ok(())
    }

    fn record(&self, dependency: ObservableId) { self.dependencies.record(dependency) }
}

impl<T, S> Drop for Inner<T, S> {
    fn drop(&mut self) { self.dependencies.clear(self.observer_id) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Settable, autorun, keep_observed, update};

    /// Records every protocol call it receives
    struct Recorder {
        id: ObserverId,
        calls: RefCell<Vec<String>>,
    }

    impl Recorder {
        fn new() -> Rc<Self> { Rc::new(Self { id: ObserverId::new(), calls: RefCell::new(Vec::new()) }) }
        fn take(&self) -> Vec<String> { self.calls.borrow_mut().drain(..).collect() }
    }

    impl Observer for Recorder {
        fn observer_id(&self) -> ObserverId { self.id }
        fn begin_update(&self, _: &dyn ObservableNode) { self.calls.borrow_mut().push("begin".into()) }
        fn end_update(&self, _: &dyn ObservableNode) { self.calls.borrow_mut().push("end".into()) }
        fn handle_possible_change(&self, _: &dyn ObservableNode) { self.calls.borrow_mut().push("possible".into()) }
        fn handle_change(&self, _: &dyn ObservableNode, change: Option<&dyn Any>) {
            let change = change.and_then(|c| c.downcast_ref::<&'static str>()).copied().unwrap_or("-");
            self.calls.borrow_mut().push(format!("change:{change}"));
        }
    }

    fn counted_sum(a: &Settable<i32>, b: &Settable<i32>) -> (Derived<i32>, Rc<Cell<usize>>) {
        let computations = Rc::new(Cell::new(0));
        let sum = {
            let (a, b, computations) = (a.clone(), b.clone(), computations.clone());
            Derived::new(move || {
                computations.set(computations.get() + 1);
                a.get() + b.get()
            })
        };
        (sum, computations)
    }

    #[test]
    fn test_unobserved_reads_recompute() {
        let a = Settable::new(1);
        let b = Settable::new(2);
        let (sum, computations) = counted_sum(&a, &b);

        assert_eq!(sum.get(), 3);
        assert_eq!(sum.get(), 3);
        assert_eq!(computations.get(), 2);
        // nothing is subscribed while unobserved
        assert_eq!(a.observer_count(), 0);
    }

    #[test]
    fn test_observed_value_is_cached() {
        let a = Settable::new(1);
        let b = Settable::new(2);
        let (sum, computations) = counted_sum(&a, &b);
        let keep = keep_observed(&sum);

        assert_eq!(sum.get(), 3);
        assert_eq!(sum.get(), 3);
        assert_eq!(computations.get(), 1);
        assert_eq!(a.observer_count(), 1);

        update(|_| {
            a.set(10);
            b.set(20);
        });
        assert_eq!(sum.get(), 30);
        assert_eq!(computations.get(), 2);

        // dropping the last observer releases the cache and the subscriptions
        drop(keep);
        assert_eq!(sum.observer_count(), 0);
        assert_eq!(a.observer_count(), 0);
        assert_eq!(sum.get(), 30);
        assert_eq!(computations.get(), 3);
    }

    #[test]
    fn test_equal_result_does_not_propagate() {
        let value = Settable::new(3);
        let parity = value.map(|v| v % 2);
        let runs = Rc::new(Cell::new(0));
        let _autorun = {
            let (parity, runs) = (parity.clone(), runs.clone());
            autorun(move |reader| {
                parity.read(reader);
                runs.set(runs.get() + 1);
            })
        };
        assert_eq!(runs.get(), 1);

        value.set(5);
        assert_eq!(runs.get(), 1);
        value.set(6);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_self_read_is_a_cycle() {
        let slot: Rc<RefCell<Option<Derived<i32>>>> = Rc::new(RefCell::new(None));
        let derived = {
            let slot = slot.clone();
            Derived::with_options(DerivedOptions::default().debug_name("selfish"), move |reader, _| match slot.borrow().as_ref() {
                Some(me) => me.try_read(reader).map(|v| v + 1).unwrap_or(-1),
                None => 0,
            })
        };
        *slot.borrow_mut() = Some(derived.clone());

        assert_eq!(derived.get(), -1);
        let _keep = keep_observed(&derived);
        assert_eq!(derived.get(), -1);
        // it never subscribed to itself
        assert_eq!(derived.observer_count(), 1);

        slot.borrow_mut().take();
    }

    #[test]
    fn test_stale_accessor_is_misuse() {
        let value = Settable::new(1);
        let escaped: Rc<RefCell<Option<Accessor>>> = Rc::new(RefCell::new(None));
        let derived = {
            let (value, escaped) = (value.clone(), escaped.clone());
            Derived::with_options(DerivedOptions::default(), move |reader, _| {
                *escaped.borrow_mut() = Some(reader.clone());
                value.read(reader)
            })
        };
        let _keep = keep_observed(&derived);
        assert_eq!(derived.get(), 1);

        let accessor = escaped.borrow_mut().take();
        let result = accessor.map(|accessor| accessor.try_track(value.node(), || value.peek()));
        assert!(matches!(result, Some(Err(ObservableError::AccessorMisuse { .. }))));
    }

    #[test]
    fn test_possible_change_forwarded_to_observers() {
        let a = Settable::new(1);
        let b = Settable::new(2);
        let (sum, _) = counted_sum(&a, &b);
        let recorder = Recorder::new();
        sum.node().add_observer(ObserverRef::new(&recorder));
        assert_eq!(sum.get(), 3);

        update(|_| {
            a.set(10);
            assert_eq!(recorder.take(), ["begin"]);
            // recomputing inside the update confirms the change
            assert_eq!(sum.get(), 12);
            assert_eq!(recorder.take(), ["change:-"]);
            // a second dependency starts updating: observers only learn it might change again
            b.set(20);
            assert_eq!(recorder.take(), ["possible"]);
        });
        assert_eq!(recorder.take(), ["end"]);
        assert_eq!(sum.get(), 30);
    }

    #[test]
    fn test_observers_joining_and_leaving_mid_update() {
        let value = Settable::new(1);
        let doubled = value.map(|v| v * 2);
        let _keep = keep_observed(&doubled);
        assert_eq!(doubled.get(), 2);

        let leaving = Recorder::new();
        let returning = Recorder::new();
        let joining = Recorder::new();
        doubled.node().add_observer(ObserverRef::new(&leaving));
        doubled.node().add_observer(ObserverRef::new(&returning));

        update(|_| {
            value.set(2);
            assert_eq!(leaving.take(), ["begin"]);
            assert_eq!(returning.take(), ["begin"]);

            // caught up with the update already in progress
            doubled.node().add_observer(ObserverRef::new(&joining));
            assert_eq!(joining.take(), ["begin"]);

            // still owed the end of the update it saw begin
            doubled.node().remove_observer(leaving.id);

            // the owed end stands in for a second begin
            doubled.node().remove_observer(returning.id);
            doubled.node().add_observer(ObserverRef::new(&returning));
            assert!(returning.take().is_empty());
        });
        assert_eq!(leaving.take(), ["end"]);
        assert_eq!(returning.take(), ["end"]);
        assert_eq!(joining.take(), ["end"]);
    }

    #[test]
    fn test_dropped_observer_releases_cache() {
        let a = Settable::new(1);
        let b = Settable::new(2);
        let (sum, computations) = counted_sum(&a, &b);
        let recorder = Recorder::new();
        sum.node().add_observer(ObserverRef::new(&recorder));
        assert_eq!(sum.get(), 3);
        assert_eq!(sum.get(), 3);
        assert_eq!(computations.get(), 1);
        assert_eq!(a.observer_count(), 1);

        // gone without unsubscribing
        drop(recorder);
        assert_eq!(sum.observer_count(), 0);
        assert_eq!(a.observer_count(), 0);
        assert_eq!(b.observer_count(), 0);
        assert_eq!(sum.get(), 3);
        assert_eq!(computations.get(), 2);
    }

    #[test]
    fn test_failed_first_compute_is_not_a_change() {
        let failing = Settable::new(true);
        let derived = {
            let failing = failing.clone();
            Derived::new(move || if failing.get() { panic!("not ready") } else { 1 })
        };
        let recorder = Recorder::new();
        derived.node().add_observer(ObserverRef::new(&recorder));
        assert!(catch_unwind(AssertUnwindSafe(|| derived.get())).is_err());

        failing.set(false);
        assert_eq!(recorder.take(), ["begin", "end"]);
        assert_eq!(derived.get(), 1);
        // the first value ever stored is not reported as a change
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_chained_derived_computes_once() {
        let value = Settable::new(1);
        let incremented = value.map(|v| v + 1);
        let computations = Rc::new(Cell::new(0));
        let total = {
            let (value, incremented, computations) = (value.clone(), incremented.clone(), computations.clone());
            Derived::new(move || {
                computations.set(computations.get() + 1);
                value.get() + incremented.get()
            })
        };
        let _keep = keep_observed(&total);
        assert_eq!(total.get(), 3);
        assert_eq!(computations.get(), 1);

        value.set(5);
        assert_eq!(total.get(), 11);
        assert_eq!(computations.get(), 2);
        assert_eq!(total.get(), 11);
        assert_eq!(computations.get(), 2);
    }
}
