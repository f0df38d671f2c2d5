use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

/// A callback registered with an [`EventSource`]
pub type Listener<E> = Rc<dyn Fn(&E)>;

/// Anything that can deliver events of type `E` to registered listeners.
///
/// This is the seam the event adapters ([`ObservableFromEvent`](crate::ObservableFromEvent),
/// [`ObservableSignalFromEvent`](crate::ObservableSignalFromEvent)) subscribe through.
pub trait EventSource<E> {
    /// Register `listener`. The listener stays registered until the returned guard is dropped.
    fn listen(&self, listener: Listener<E>) -> ListenerGuard;
}

impl<E, S: EventSource<E> + ?Sized> EventSource<E> for Rc<S> {
    fn listen(&self, listener: Listener<E>) -> ListenerGuard { (**self).listen(listener) }
}

/// A subscription handle. Dropping it unsubscribes.
#[must_use = "dropping a ListenerGuard unsubscribes immediately"]
pub struct ListenerGuard(Option<Box<dyn FnOnce()>>);

impl ListenerGuard {
    /// A guard running `unlisten` when dropped
    pub fn new(unlisten: impl FnOnce() + 'static) -> Self { Self(Some(Box::new(unlisten))) }

    /// A guard with nothing to undo
    pub fn noop() -> Self { Self(None) }

    /// Unsubscribe now
    pub fn unlisten(mut self) {
        if let Some(unlisten) = self.0.take() {
            unlisten()
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(unlisten) = self.0.take() {
            unlisten()
        }
    }
}

impl std::fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("ListenerGuard").field("active", &self.0.is_some()).finish() }
}

struct Inner<E> {
    listeners: RefCell<BTreeMap<usize, Listener<E>>>,
    next_id: Cell<usize>,
}

/// A synchronous, single-threaded event emitter - the simplest [`EventSource`].
///
/// Listeners are called in registration order. Cloning an `Emitter` shares its listeners.
pub struct Emitter<E>(Rc<Inner<E>>);

impl<E> Clone for Emitter<E> {
    fn clone(&self) -> Self { Self(Rc::clone(&self.0)) }
}

impl<E: 'static> Default for Emitter<E> {
    fn default() -> Self { Self::new() }
}

impl<E: 'static> Emitter<E> {
    pub fn new() -> Self { Self(Rc::new(Inner { listeners: RefCell::new(BTreeMap::new()), next_id: Cell::new(0) })) }

    /// Deliver `event` to every listener
    pub fn emit(&self, event: &E) {
        // Clone the listeners so none are borrowed while callbacks run (they may listen or unlisten)
        let listeners: Vec<Listener<E>> = self.0.listeners.borrow().values().cloned().collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize { self.0.listeners.borrow().len() }
}

impl<E: 'static> EventSource<E> for Emitter<E> {
    fn listen(&self, listener: Listener<E>) -> ListenerGuard {
        let id = self.0.next_id.get();
        self.0.next_id.set(id + 1);
        self.0.listeners.borrow_mut().insert(id, listener);

        // The guard does not keep the emitter alive
        let inner: Weak<Inner<E>> = Rc::downgrade(&self.0);
        ListenerGuard::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.listeners.borrow_mut().remove(&id);
            }
        })
    }
}

impl<E> std::fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter").field("listeners", &self.0.listeners.borrow().len()).finish()
    }
}
