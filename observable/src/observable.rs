pub mod constant;
pub mod derived;
pub mod from_event;
pub mod settable;
pub mod signal;

pub use constant::*;
pub use derived::*;
pub use from_event::*;
pub use settable::*;
pub use signal::*;

use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{Accessor, CurrentAccessor, ObserverId, ObserverRef};

/// A unique identifier for an observable node.
/// Identifiers are allocated in creation order and never reused.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObservableId(usize);

impl ObservableId {
    pub fn new() -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ObservableId {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Display for ObservableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

/// Core trait for observables - provides the subscription surface without regard to the value type.
/// This is the trait the engine works with; it must stay dyn object safe.
pub trait ObservableNode {
    fn observable_id(&self) -> ObservableId;

    /// Human readable name for logs and error messages
    fn debug_name(&self) -> String;

    /// Subscribe `observer`. Adding an observer that is already present is a no-op.
    fn add_observer(&self, observer: ObserverRef);

    /// Unsubscribe an observer. Removing an absent observer is a no-op.
    fn remove_observer(&self, observer: ObserverId);

    /// Pull confirmation: bring a lazily computed value up to date so that a real change is reported
    /// to observers through `handle_change`. Leaf observables have nothing to confirm.
    fn update(&self) {}
}

/// A trackable value.
///
/// [`get`](Self::get) registers the observable with the ambient accessor (if any run is in progress),
/// [`read`](Self::read) registers it with an explicit accessor, and [`peek`](Self::peek) never tracks.
pub trait Observable<T> {
    /// The type-erased node backing this observable
    fn node(&self) -> Rc<dyn ObservableNode>;

    /// Current value, without registering a dependency
    fn peek(&self) -> T;

    fn observable_id(&self) -> ObservableId { self.node().observable_id() }

    /// Current value, registered as a dependency of the consumer `accessor` belongs to.
    /// The subscription happens before the value is read so that a change caused by the read is not missed.
    fn read(&self, accessor: &Accessor) -> T { accessor.track(self.node(), || self.peek()) }

    /// Current value, tracked by the ambient accessor if there is one
    fn get(&self) -> T {
        match CurrentAccessor::get() {
            Some(accessor) => self.read(&accessor),
            None => self.peek(),
        }
    }

    /// A derived observable projecting this one through `project`
    fn map<U, F>(&self, project: F) -> Derived<U>
    where
        Self: Clone + Sized + 'static,
        T: 'static,
        U: Clone + PartialEq + 'static,
        F: Fn(T) -> U + 'static,
    {
        let source = self.clone();
        Derived::with_options(DerivedOptions::default(), move |reader, _| project(source.read(reader)))
    }
}

/// Per-instance equality used to suppress notifications for values that did not change
pub struct Equality<T: ?Sized>(Rc<dyn Fn(&T, &T) -> bool>);

impl<T: ?Sized> Clone for Equality<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T: ?Sized + 'static> Equality<T> {
    /// Compare with a custom function
    pub fn by(eq: impl Fn(&T, &T) -> bool + 'static) -> Self { Self(Rc::new(eq)) }

    /// Treat every new value as a change
    pub fn never() -> Self { Self(Rc::new(|_: &T, _: &T| false)) }

    pub fn eq(&self, a: &T, b: &T) -> bool { (self.0)(a, b) }
}

impl<T: ?Sized + PartialEq + 'static> Equality<T> {
    pub fn partial_eq() -> Self { Self(Rc::new(|a: &T, b: &T| a == b)) }
}

impl<T: ?Sized + PartialEq + 'static> Default for Equality<T> {
    fn default() -> Self { Self::partial_eq() }
}

pub(crate) fn debug_name(kind: &str, name: &Option<String>, id: ObservableId) -> String {
    match name {
        Some(name) => name.clone(),
        None => format!("{kind}#{id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality() {
        let default: Equality<i32> = Equality::default();
        assert!(default.eq(&1, &1));
        assert!(!default.eq(&1, &2));

        let never: Equality<i32> = Equality::never();
        assert!(!never.eq(&1, &1));

        let case_insensitive = Equality::by(|a: &String, b: &String| a.eq_ignore_ascii_case(b));
        assert!(case_insensitive.eq(&"Buffy".to_string(), &"BUFFY".to_string()));
    }

    #[test]
    fn test_map() {
        let age = Settable::new(29);
        let retired = age.map(|age| age > 65);
        assert!(!retired.get());
        age.set(70);
        assert!(retired.get());
    }
}
