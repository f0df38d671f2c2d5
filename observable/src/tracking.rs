use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::{ObservableId, ObservableNode, ObserverId, ObserverRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    /// Read by the previous run, not (yet) by the current one
    Previous,
    /// Subscribed, value not read back yet
    Reading,
    Read,
}

struct DependencyEntry {
    node: Rc<dyn ObservableNode>,
    status: Status,
}

/// The dependency set of a consumer, rebuilt with mark-and-sweep on every run.
///
/// Entries are kept in the order the last run finished reading them, so dependencies read first
/// (typically guards) are confirmed first. A dependency only counts as tracked once its value was
/// read: changes it reports while being read are already part of that value.
/// A consumer owns its dependencies; the dependencies only hold weak references back.
#[derive(Default)]
pub(crate) struct Dependencies(RefCell<Vec<DependencyEntry>>);

impl Dependencies {
    pub fn new() -> Self { Self(RefCell::new(Vec::new())) }

    /// Subscribe `observer` to `node` ahead of reading it. Must be followed by [`record`](Self::record).
    pub fn subscribe(&self, observer: ObserverRef, node: Rc<dyn ObservableNode>) {
        // No borrow is held, subscribing may call back into the observer
        node.add_observer(observer);
        let id = node.observable_id();
        let mut entries = self.0.borrow_mut();
        if !entries.iter().any(|entry| entry.node.observable_id() == id) {
            entries.push(DependencyEntry { node, status: Status::Reading });
        }
    }

    /// `id` was read by the current run
    pub fn record(&self, id: ObservableId) {
        let mut entries = self.0.borrow_mut();
        let Some(index) = entries.iter().position(|entry| entry.node.observable_id() == id) else { return };
        if entries[index].status == Status::Read {
            return;
        }
        let mut entry = entries.remove(index);
        entry.status = Status::Read;
        entries.push(entry);
    }

    /// Read during the current (or last) run
    pub fn is_tracked(&self, id: ObservableId) -> bool {
        self.0.borrow().iter().any(|entry| entry.status == Status::Read && entry.node.observable_id() == id)
    }

    pub fn len(&self) -> usize { self.0.borrow().iter().filter(|entry| entry.status == Status::Read).count() }

    /// Holds no subscription at all
    pub fn is_empty(&self) -> bool { self.0.borrow().is_empty() }

    /// Snapshot of the tracked dependencies, in read order
    pub fn nodes(&self) -> Vec<Rc<dyn ObservableNode>> {
        self.0.borrow().iter().filter(|entry| entry.status == Status::Read).map(|entry| entry.node.clone()).collect()
    }

    /// Run `run` as a tracked run of `owner`: every existing entry is marked as previous first, and any
    /// entry not read again by the end of the run is swept and unsubscribed, even if `run` panics.
    pub fn run_tracked<R>(&self, owner: ObserverId, run: impl FnOnce() -> R) -> R {
        self.mark_all_previous();
        let _sweep = SweepGuard { dependencies: self, owner };
        run()
    }

    /// Drop every dependency and unsubscribe `owner` from them
    pub fn clear(&self, owner: ObserverId) {
        let entries = std::mem::take(&mut *self.0.borrow_mut());
        for entry in entries {
            entry.node.remove_observer(owner);
        }
    }

    fn mark_all_previous(&self) {
        for entry in self.0.borrow_mut().iter_mut() {
            entry.status = Status::Previous;
        }
    }

    fn sweep(&self, owner: ObserverId) {
        let swept: Vec<Rc<dyn ObservableNode>> = {
            let mut entries = self.0.borrow_mut();
            let (kept, swept): (Vec<DependencyEntry>, Vec<DependencyEntry>) =
                std::mem::take(&mut *entries).into_iter().partition(|entry| entry.status == Status::Read);
            *entries = kept;
            swept.into_iter().map(|entry| entry.node).collect()
        };
        // Unsubscribing may cascade into upstream nodes, so no borrow is held here
        for node in swept {
            node.remove_observer(owner);
        }
    }
}

struct SweepGuard<'a> {
    dependencies: &'a Dependencies,
    owner: ObserverId,
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) { self.dependencies.sweep(self.owner) }
}

/// Raises a flag for the lifetime of the guard, lowering it again on drop (including unwinding)
pub(crate) struct FlagGuard<'a>(&'a Cell<bool>);

impl<'a> FlagGuard<'a> {
    pub fn raise(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) { self.0.set(false) }
}
