use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::ObservableNode;

/// A unique identifier for an observer, used for set membership.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObserverId(usize);

impl ObserverId {
    pub fn new() -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ObserverId {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

/// The contract every consumer of an observable implements.
///
/// These methods are called by the engine only, never by application code.
/// `begin_update` is always paired with exactly one later `end_update` for the same observable.
/// Neither `handle_possible_change` nor `handle_change` may read the observable back.
pub trait Observer {
    fn observer_id(&self) -> ObserverId;

    /// An update that might affect `observable` has started
    fn begin_update(&self, observable: &dyn ObservableNode);

    /// The update window opened by the matching `begin_update` has closed
    fn end_update(&self, observable: &dyn ObservableNode);

    /// `observable` might have changed, but the change is not confirmed
    fn handle_possible_change(&self, observable: &dyn ObservableNode);

    /// `observable` has changed. `change` is the optional reason attached by the producer
    fn handle_change(&self, observable: &dyn ObservableNode, change: Option<&dyn Any>);
}

/// A non-owning reference to an observer. Observables never keep their observers alive.
#[derive(Clone)]
pub struct ObserverRef {
    id: ObserverId,
    observer: Weak<dyn Observer>,
}

impl ObserverRef {
    pub fn new<O: Observer + 'static>(observer: &Rc<O>) -> Self {
        let weak: Weak<O> = Rc::downgrade(observer);
        Self { id: observer.observer_id(), observer: weak }
    }

    pub(crate) fn from_weak<O: Observer + 'static>(id: ObserverId, observer: Weak<O>) -> Self { Self { id, observer } }

    pub fn id(&self) -> ObserverId { self.id }

    pub fn upgrade(&self) -> Option<Rc<dyn Observer>> { self.observer.upgrade() }
}

impl std::fmt::Debug for ObserverRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRef").field("id", &self.id).field("alive", &(self.observer.strong_count() > 0)).finish()
    }
}

/// Insertion-ordered set of observers, keyed by [`ObserverId`].
///
/// Callers iterate over a [`snapshot`](Self::snapshot) so no borrow is held while observers run.
#[derive(Default)]
pub(crate) struct ObserverSet(RefCell<Vec<ObserverRef>>);

impl ObserverSet {
    pub fn new() -> Self { Self(RefCell::new(Vec::new())) }

    /// Returns false if the observer was already present
    pub fn insert(&self, observer: ObserverRef) -> bool {
        let mut observers = self.0.borrow_mut();
        if observers.iter().any(|o| o.id == observer.id) {
            return false;
        }
        observers.push(observer);
        true
    }

    pub fn remove(&self, id: ObserverId) -> Option<ObserverRef> {
        let mut observers = self.0.borrow_mut();
        let index = observers.iter().position(|o| o.id == id)?;
        Some(observers.remove(index))
    }

    pub fn contains(&self, id: ObserverId) -> bool { self.0.borrow().iter().any(|o| o.id == id) }

    /// Number of live observers. Entries whose observer was dropped are pruned.
    pub fn len(&self) -> usize {
        let mut observers = self.0.borrow_mut();
        observers.retain(|o| o.observer.strong_count() > 0);
        observers.len()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Upgraded copies of the live observers, in insertion order
    pub fn snapshot(&self) -> Vec<Rc<dyn Observer>> { self.0.borrow().iter().filter_map(|o| o.upgrade()).collect() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObservableId;

    struct Noop(ObserverId);
    impl Observer for Noop {
        fn observer_id(&self) -> ObserverId { self.0 }
        fn begin_update(&self, _: &dyn ObservableNode) {}
        fn end_update(&self, _: &dyn ObservableNode) {}
        fn handle_possible_change(&self, _: &dyn ObservableNode) {}
        fn handle_change(&self, _: &dyn ObservableNode, _: Option<&dyn Any>) {}
    }

    #[test]
    fn test_observer_set_membership() {
        let a = Rc::new(Noop(ObserverId::new()));
        let b = Rc::new(Noop(ObserverId::new()));
        let set = ObserverSet::new();

        assert!(set.insert(ObserverRef::new(&a)));
        assert!(!set.insert(ObserverRef::new(&a)));
        assert!(set.insert(ObserverRef::new(&b)));
        assert_eq!(set.len(), 2);

        let ids: Vec<_> = set.snapshot().iter().map(|o| o.observer_id()).collect();
        assert_eq!(ids, vec![a.0, b.0]);

        assert!(set.remove(a.0).is_some());
        assert!(set.remove(a.0).is_none());
        assert!(!set.contains(a.0));
        assert!(set.contains(b.0));
    }

    #[test]
    fn test_dropped_observers_are_pruned() {
        let set = ObserverSet::new();
        {
            let transient = Rc::new(Noop(ObserverId::new()));
            set.insert(ObserverRef::new(&transient));
            assert_eq!(set.len(), 1);
        }
        assert!(set.is_empty());
        assert!(set.snapshot().is_empty());
        // ids are never reused
        assert_ne!(ObservableId::new(), ObservableId::new());
    }
}
