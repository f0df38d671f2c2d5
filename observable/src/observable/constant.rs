use std::rc::Rc;

use crate::{Accessor, Observable, ObservableId, ObservableNode, ObserverId, ObserverRef, observable::debug_name};

struct Inner<T> {
    id: ObservableId,
    value: T,
}

/// An observable that never changes. Reading it registers no dependency.
pub struct Constant<T>(Rc<Inner<T>>);

impl<T> Clone for Constant<T> {
    fn clone(&self) -> Self { Self(Rc::clone(&self.0)) }
}

impl<T: 'static> Constant<T> {
    pub fn new(value: T) -> Self { Self(Rc::new(Inner { id: ObservableId::new(), value })) }
}

impl<T: Clone + 'static> Observable<T> for Constant<T> {
    fn node(&self) -> Rc<dyn ObservableNode> { self.0.clone() }

    fn peek(&self) -> T { self.0.value.clone() }

    fn read(&self, _accessor: &Accessor) -> T { self.peek() }
}

impl<T: 'static> ObservableNode for Inner<T> {
    fn observable_id(&self) -> ObservableId { self.id }

    fn debug_name(&self) -> String { debug_name("Constant", &None, self.id) }

    fn add_observer(&self, _observer: ObserverRef) {}

    fn remove_observer(&self, _observer: ObserverId) {}
}

impl<T: std::fmt::Debug> std::fmt::Debug for Constant<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_tuple("Constant").field(&self.0.value).finish() }
}
