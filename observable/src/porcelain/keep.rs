use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::{Disposable, Observable, ObservableNode, Observer, ObserverId, ObserverRef};

/// An observer that ignores every notification. Its only effect is being counted.
struct Anchor(ObserverId);

impl Observer for Anchor {
    fn observer_id(&self) -> ObserverId { self.0 }
    fn begin_update(&self, _: &dyn ObservableNode) {}
    fn end_update(&self, _: &dyn ObservableNode) {}
    fn handle_possible_change(&self, _: &dyn ObservableNode) {}
    fn handle_change(&self, _: &dyn ObservableNode, _: Option<&dyn Any>) {}
}

/// Keeps an observable observed until disposed or dropped
#[must_use = "dropping KeepObserved releases the observable immediately"]
pub struct KeepObserved {
    node: Rc<dyn ObservableNode>,
    anchor: RefCell<Option<Rc<Anchor>>>,
}

/// Keep `observable` observed, so a derived value stays cached and an event adapter stays
/// subscribed even while nothing else observes it.
pub fn keep_observed<T>(observable: &impl Observable<T>) -> KeepObserved {
    let node = observable.node();
    let anchor = Rc::new(Anchor(ObserverId::new()));
    node.add_observer(ObserverRef::new(&anchor));
    KeepObserved { node, anchor: RefCell::new(Some(anchor)) }
}

impl KeepObserved {
    pub fn dispose(&self) {
        let anchor = self.anchor.borrow_mut().take();
        if let Some(anchor) = anchor {
            self.node.remove_observer(anchor.0);
        }
    }

    pub fn is_disposed(&self) -> bool { self.anchor.borrow().is_none() }
}

impl Disposable for KeepObserved {
    fn dispose(&self) { KeepObserved::dispose(self) }
}

impl Drop for KeepObserved {
    fn drop(&mut self) { self.dispose() }
}

impl std::fmt::Debug for KeepObserved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepObserved").field("observable", &self.node.debug_name()).field("disposed", &self.is_disposed()).finish()
    }
}
