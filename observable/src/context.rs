use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use crate::{ObservableError, ObservableId, ObservableNode};

/// Implemented by consumers that record the observables they read during a run
pub(crate) trait Tracker {
    /// Subscribe to `dependency` before its value is read
    fn subscribe(&self, dependency: Rc<dyn ObservableNode>) -> Result<(), ObservableError>;

    /// The value of `dependency` was read; from now on its changes concern the current run
    fn record(&self, dependency: ObservableId);
}

/// A handle to the consumer that is currently running.
///
/// Passing an accessor to [`Observable::read`](crate::Observable::read) registers the read observable
/// as a dependency of that consumer. Accessors do not keep their consumer alive; an accessor whose
/// consumer was dropped reads untracked.
#[derive(Clone)]
pub struct Accessor {
    tracker: Option<Weak<dyn Tracker>>,
}

impl Accessor {
    pub(crate) fn new<K: Tracker + 'static>(tracker: Weak<K>) -> Self {
        let tracker: Weak<dyn Tracker> = tracker;
        Self { tracker: Some(tracker) }
    }

    /// An accessor that never registers dependencies
    pub fn untracked() -> Self { Self { tracker: None } }

    pub fn is_tracking(&self) -> bool { self.tracker.as_ref().is_some_and(|t| t.strong_count() > 0) }

    /// Read `dependency` through `read`, registering it with the consumer this accessor belongs to.
    ///
    /// The consumer subscribes before `read` runs, so no change is missed, but only counts the
    /// dependency once `read` has returned: changes reported while reading are part of the value read.
    pub fn try_track<R>(&self, dependency: Rc<dyn ObservableNode>, read: impl FnOnce() -> R) -> Result<R, ObservableError> {
        let Some(tracker) = self.tracker.as_ref().and_then(Weak::upgrade) else { return Ok(read()) };
        let id = dependency.observable_id();
        tracker.subscribe(dependency)?;
        let value = read();
        tracker.record(id);
        Ok(value)
    }

    /// Like [`try_track`](Self::try_track), but panics on misuse
    pub fn track<R>(&self, dependency: Rc<dyn ObservableNode>, read: impl FnOnce() -> R) -> R {
        match self.try_track(dependency, read) {
            Ok(value) => value,
            Err(e) => e.raise(),
        }
    }
}

impl std::fmt::Debug for Accessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessor").field("tracking", &self.is_tracking()).finish()
    }
}

// Thread-local stack of ambient accessors. `None` entries suspend tracking for nested runs.
thread_local! {
    static ACCESSOR_STACK: RefCell<Vec<Option<Accessor>>> = const { RefCell::new(Vec::new()) };
}

/// Manages the ambient accessor stack used by [`Observable::get`](crate::Observable::get)
pub struct CurrentAccessor {}

impl CurrentAccessor {
    /// The accessor installed by the innermost active run, if any
    pub fn get() -> Option<Accessor> { ACCESSOR_STACK.with(|stack| stack.borrow().last().cloned().flatten()) }

    /// Number of nested runs currently installed (for testing/debugging)
    pub fn depth() -> usize { ACCESSOR_STACK.with(|stack| stack.borrow().len()) }

    fn push(accessor: Option<Accessor>) { ACCESSOR_STACK.with(|stack| stack.borrow_mut().push(accessor)) }

    fn pop() { ACCESSOR_STACK.with(|stack| stack.borrow_mut().pop()); }
}

/// Pops the accessor on drop so the stack is restored even if the run panics
struct StackGuard;

impl Drop for StackGuard {
    fn drop(&mut self) { CurrentAccessor::pop() }
}

/// Install `accessor` as the ambient accessor for the dynamic extent of `run`.
///
/// `None` runs `run` untracked. The previous accessor is restored afterwards.
pub fn run_with_accessor<R>(accessor: Option<&Accessor>, run: impl FnOnce() -> R) -> R {
    CurrentAccessor::push(accessor.cloned());
    let _guard = StackGuard;
    run()
}

/// Run `run` without registering any dependency with the current consumer
pub fn no_auto_tracking<R>(run: impl FnOnce() -> R) -> R { run_with_accessor(None, run) }
