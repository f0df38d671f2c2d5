use std::any::Any;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::{
    Equality, Observable, ObservableId, ObservableNode, ObserverId, ObserverRef, UpdateScope, observable::debug_name,
    observer::ObserverSet, scope::update, value::ValueCell,
};

struct Inner<T, C> {
    id: ObservableId,
    name: Option<String>,
    value: ValueCell<T>,
    equality: Equality<T>,
    observers: ObserverSet,
    _change: PhantomData<C>,
}

/// A mutable leaf value - the only observable that originates changes from outside the graph.
///
/// `C` is the type of the optional change payload that explains why the value changed.
/// Cloning a `Settable` shares the same underlying value.
///
/// # Example
/// ```
/// use ankurah_observable::*;
///
/// let count = Settable::new(1);
/// count.set(2);
/// assert_eq!(count.get(), 2);
/// ```
pub struct Settable<T, C = ()>(Rc<Inner<T, C>>);

impl<T, C> Clone for Settable<T, C> {
    fn clone(&self) -> Self { Self(Rc::clone(&self.0)) }
}

impl<T: 'static> Settable<T> {
    /// Create a settable value which suppresses `set` calls with an equal (`PartialEq`) value
    pub fn new(value: T) -> Self
    where T: PartialEq {
        Self::create(None, value, Equality::partial_eq())
    }

    pub fn named(name: &str, value: T) -> Self
    where T: PartialEq {
        Self::create(Some(name), value, Equality::partial_eq())
    }

    pub fn with_equality(value: T, equality: Equality<T>) -> Self { Self::create(None, value, equality) }
}

impl<T: 'static, C: 'static> Settable<T, C> {
    /// Create a settable value whose changes may carry a payload of type `C`
    pub fn create(name: Option<&str>, value: T, equality: Equality<T>) -> Self {
        Self(Rc::new(Inner {
            id: ObservableId::new(),
            name: name.map(str::to_string),
            value: ValueCell::new(value),
            equality,
            observers: ObserverSet::new(),
            _change: PhantomData,
        }))
    }

    /// Set the value within the ambient update scope (or a new one)
    pub fn set(&self, value: T) { update(|scope| self.set_in(scope, value, None)) }

    /// Set the value with a change payload. Observers are notified even if the value is equal.
    pub fn set_with_change(&self, value: T, change: C) { update(|scope| self.set_in(scope, value, Some(change))) }

    /// Set the value within an explicit scope.
    ///
    /// Without a change payload an equal value is a no-op: observers are not called at all.
    pub fn set_in(&self, scope: &UpdateScope, value: T, change: Option<C>) {
        if change.is_none() && self.0.value.with(|current| self.0.equality.eq(current, &value)) {
            return;
        }
        self.0.value.set(value);

        let me: Rc<dyn ObservableNode> = self.0.clone();
        let change = change.as_ref().map(|change| change as &dyn Any);
        for observer in self.0.observers.snapshot() {
            scope.push(&observer, me.clone());
            observer.handle_change(&*me, change);
        }
    }

    /// Calls a closure with a borrow of the current value - not tracked by the current context
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R { self.0.value.with(f) }

    pub fn observer_count(&self) -> usize { self.0.observers.len() }
}

impl<T: Clone + 'static, C: 'static> Observable<T> for Settable<T, C> {
    fn node(&self) -> Rc<dyn ObservableNode> { self.0.clone() }

    fn peek(&self) -> T { self.0.value.value() }
}

impl<T: 'static, C: 'static> ObservableNode for Inner<T, C> {
    fn observable_id(&self) -> ObservableId { self.id }

    fn debug_name(&self) -> String { debug_name("Settable", &self.name, self.id) }

    fn add_observer(&self, observer: ObserverRef) { self.observers.insert(observer); }

    fn remove_observer(&self, observer: ObserverId) { self.observers.remove(observer); }
}

impl<T: std::fmt::Debug, C> std::fmt::Debug for Settable<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settable").field("id", &self.0.id).field("value", &self.0.value).finish()
    }
}

impl<T: std::fmt::Display, C> std::fmt::Display for Settable<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.0.value.with(|v| write!(f, "{}", v)) }
}
