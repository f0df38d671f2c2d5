use std::any::Any;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::{Observable, ObservableId, ObservableNode, ObserverId, ObserverRef, UpdateScope, observable::debug_name, observer::ObserverSet, scope::update};

struct Inner<C> {
    id: ObservableId,
    name: Option<String>,
    observers: ObserverSet,
    _change: PhantomData<C>,
}

/// A value-less observable whose only purpose is to notify.
///
/// Every trigger notifies every observer, there is no equality suppression.
/// The payload type `C` lets a trigger explain what happened.
pub struct ObservableSignal<C = ()>(Rc<Inner<C>>);

impl<C> Clone for ObservableSignal<C> {
    fn clone(&self) -> Self { Self(Rc::clone(&self.0)) }
}

impl ObservableSignal {
    pub fn new() -> Self { Self::create(None) }

    pub fn named(name: &str) -> Self { Self::create(Some(name)) }
}

impl Default for ObservableSignal {
    fn default() -> Self { Self::new() }
}

impl<C: 'static> ObservableSignal<C> {
    /// Create a signal whose triggers may carry a payload of type `C`
    pub fn create(name: Option<&str>) -> Self {
        Self(Rc::new(Inner { id: ObservableId::new(), name: name.map(str::to_string), observers: ObserverSet::new(), _change: PhantomData }))
    }

    pub fn trigger(&self) { update(|scope| self.trigger_in(scope, None)) }

    pub fn trigger_with_change(&self, change: C) { update(|scope| self.trigger_in(scope, Some(change))) }

    /// Notify every observer within an explicit scope
    pub fn trigger_in(&self, scope: &UpdateScope, change: Option<C>) {
        let me: Rc<dyn ObservableNode> = self.0.clone();
        let change = change.as_ref().map(|change| change as &dyn Any);
        for observer in self.0.observers.snapshot() {
            scope.push(&observer, me.clone());
            observer.handle_change(&*me, change);
        }
    }

    pub fn observer_count(&self) -> usize { self.0.observers.len() }
}

impl<C: 'static> Observable<()> for ObservableSignal<C> {
    fn node(&self) -> Rc<dyn ObservableNode> { self.0.clone() }

    fn peek(&self) {}
}

impl<C: 'static> ObservableNode for Inner<C> {
    fn observable_id(&self) -> ObservableId { self.id }

    fn debug_name(&self) -> String { debug_name("ObservableSignal", &self.name, self.id) }

    fn add_observer(&self, observer: ObserverRef) { self.observers.insert(observer); }

    fn remove_observer(&self, observer: ObserverId) { self.observers.remove(observer); }
}

impl<C> std::fmt::Debug for ObservableSignal<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("ObservableSignal").field("id", &self.0.id).finish() }
}
