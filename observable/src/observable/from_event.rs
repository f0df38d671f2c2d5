use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::{
    Equality, EventSource, ListenerGuard, Observable, ObservableId, ObservableNode, ObserverId, ObserverRef, UpdateScope, observable::debug_name,
    observer::ObserverSet, scope::update,
};

/// Chooses the scope event notifications are pushed into. `None` runs them in a fresh scope.
pub type ScopeProvider = Rc<dyn Fn() -> Option<UpdateScope>>;

/// Configuration for [`ObservableFromEvent::with_options`]
pub struct FromEventOptions<T> {
    equality: Equality<T>,
    scope_provider: ScopeProvider,
    debug_name: Option<String>,
}

impl<T: PartialEq + 'static> Default for FromEventOptions<T> {
    fn default() -> Self { Self::new(Equality::partial_eq()) }
}

impl<T: 'static> FromEventOptions<T> {
    pub fn new(equality: Equality<T>) -> Self { Self { equality, scope_provider: Rc::new(UpdateScope::current), debug_name: None } }

    pub fn debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }

    pub fn equality(mut self, equality: Equality<T>) -> Self {
        self.equality = equality;
        self
    }

    /// Replace the default provider, which uses the ambient scope if there is one
    pub fn scope_provider(mut self, provider: impl Fn() -> Option<UpdateScope> + 'static) -> Self {
        self.scope_provider = Rc::new(provider);
        self
    }
}

/// Push every observer of `node` into a scope and deliver `change`
fn notify_observers(observers: &ObserverSet, node: Rc<dyn ObservableNode>, provider: &ScopeProvider, change: Option<&dyn Any>) {
    let notify = |scope: &UpdateScope| {
        for observer in observers.snapshot() {
            scope.push(&observer, node.clone());
            observer.handle_change(&*node, change);
        }
    };
    match provider() {
        Some(scope) => notify(&scope),
        None => update(|scope| notify(scope)),
    }
}

trait EventValue<T> {
    fn peek(&self) -> T;
    fn observer_count(&self) -> usize;
    fn is_subscribed(&self) -> bool;
}

struct Inner<E, T> {
    id: ObservableId,
    me: Weak<Inner<E, T>>,
    name: Option<String>,
    source: Rc<dyn EventSource<E>>,
    project: Box<dyn Fn(Option<&E>) -> T>,
    equality: Equality<T>,
    scope_provider: ScopeProvider,
    observers: ObserverSet,
    subscription: RefCell<Option<ListenerGuard>>,
    value: RefCell<Option<T>>,
}

/// Bridges a push-style [`EventSource`] into the graph.
///
/// `project` computes the value, given the event that just fired (or `None` when the value is
/// needed before any event). The source is only listened to while the observable is observed;
/// unobserved reads call `project(None)` directly.
pub struct ObservableFromEvent<T> {
    node: Rc<dyn ObservableNode>,
    value: Rc<dyn EventValue<T>>,
}

impl<T> Clone for ObservableFromEvent<T> {
    fn clone(&self) -> Self { Self { node: self.node.clone(), value: self.value.clone() } }
}

impl<T: Clone + 'static> ObservableFromEvent<T> {
    pub fn new<E: 'static>(source: impl EventSource<E> + 'static, project: impl Fn(Option<&E>) -> T + 'static) -> Self
    where T: PartialEq {
        Self::with_options(source, project, FromEventOptions::default())
    }

    pub fn with_options<E: 'static>(
        source: impl EventSource<E> + 'static,
        project: impl Fn(Option<&E>) -> T + 'static,
        options: FromEventOptions<T>,
    ) -> Self {
        let inner = Rc::new_cyclic(|me| Inner {
            id: ObservableId::new(),
            me: me.clone(),
            name: options.debug_name,
            source: Rc::new(source),
            project: Box::new(project),
            equality: options.equality,
            scope_provider: options.scope_provider,
            observers: ObserverSet::new(),
            subscription: RefCell::new(None),
            value: RefCell::new(None),
        });
        Self { node: inner.clone(), value: inner }
    }

    pub fn observer_count(&self) -> usize { self.value.observer_count() }

    /// Whether the event source is currently being listened to
    pub fn is_subscribed(&self) -> bool { self.value.is_subscribed() }
}

impl<T: Clone + 'static> Observable<T> for ObservableFromEvent<T> {
    fn node(&self) -> Rc<dyn ObservableNode> { self.node.clone() }

    fn peek(&self) -> T { self.value.peek() }
}

impl<E: 'static, T: Clone + 'static> Inner<E, T> {
    fn handle_event(&self, event: Option<&E>) {
        let next = (self.project)(event);
        let (had_value, changed) = match self.value.borrow().as_ref() {
            Some(current) => (true, !self.equality.eq(current, &next)),
            None => (false, true),
        };
        if !changed {
            return;
        }
        let previous = self.value.replace(Some(next));
        drop(previous);

        // Observers never saw a value before the first one, so there is nothing to report
        if had_value {
            let Some(me) = self.me.upgrade() else { return };
            notify_observers(&self.observers, me, &self.scope_provider, None);
        }
    }

    fn subscribe(&self) {
        let me = self.me.clone();
        let guard = self.source.listen(Rc::new(move |event: &E| {
            if let Some(inner) = me.upgrade() {
                inner.handle_event(Some(event))
            }
        }));
        debug!("ObservableFromEvent({}) subscribed to its source", self.debug_name());
        *self.subscription.borrow_mut() = Some(guard);
    }

    fn unsubscribe(&self) {
        let guard = self.subscription.borrow_mut().take();
        let value = self.value.borrow_mut().take();
        drop((guard, value));
        debug!("ObservableFromEvent({}) unsubscribed from its source", self.debug_name());
    }
}

impl<E: 'static, T: Clone + 'static> EventValue<T> for Inner<E, T> {
    fn peek(&self) -> T {
        if !self.is_subscribed() {
            return (self.project)(None);
        }
        if self.value.borrow().is_none() {
            self.handle_event(None);
        }
        match self.value.borrow().as_ref() {
            Some(value) => value.clone(),
            None => (self.project)(None),
        }
    }

    fn observer_count(&self) -> usize { self.observers.len() }

    fn is_subscribed(&self) -> bool { self.subscription.borrow().is_some() }
}

impl<E: 'static, T: Clone + 'static> ObservableNode for Inner<E, T> {
    fn observable_id(&self) -> ObservableId { self.id }

    fn debug_name(&self) -> String { debug_name("ObservableFromEvent", &self.name, self.id) }

    fn add_observer(&self, observer: ObserverRef) {
        if self.observers.insert(observer) && !self.is_subscribed() {
            self.subscribe();
        }
    }

    fn remove_observer(&self, observer: ObserverId) {
        if self.observers.remove(observer).is_some() && self.observers.is_empty() {
            self.unsubscribe();
        }
    }
}

struct SignalInner<E> {
    id: ObservableId,
    me: Weak<SignalInner<E>>,
    name: Option<String>,
    source: Rc<dyn EventSource<E>>,
    scope_provider: ScopeProvider,
    observers: ObserverSet,
    subscription: RefCell<Option<ListenerGuard>>,
}

/// A signal that fires on every event of an [`EventSource`], passing the event as the change payload.
///
/// Like [`ObservableFromEvent`], the source is only listened to while observed.
pub struct ObservableSignalFromEvent<E>(Rc<SignalInner<E>>);

impl<E> Clone for ObservableSignalFromEvent<E> {
    fn clone(&self) -> Self { Self(Rc::clone(&self.0)) }
}

impl<E: 'static> ObservableSignalFromEvent<E> {
    pub fn new(source: impl EventSource<E> + 'static) -> Self { Self::build(None, Rc::new(source), Rc::new(UpdateScope::current)) }

    pub fn named(name: &str, source: impl EventSource<E> + 'static) -> Self {
        Self::build(Some(name.to_string()), Rc::new(source), Rc::new(UpdateScope::current))
    }

    pub fn with_scope_provider(source: impl EventSource<E> + 'static, provider: impl Fn() -> Option<UpdateScope> + 'static) -> Self {
        Self::build(None, Rc::new(source), Rc::new(provider))
    }

    fn build(name: Option<String>, source: Rc<dyn EventSource<E>>, scope_provider: ScopeProvider) -> Self {
        Self(Rc::new_cyclic(|me| SignalInner {
            id: ObservableId::new(),
            me: me.clone(),
            name,
            source,
            scope_provider,
            observers: ObserverSet::new(),
            subscription: RefCell::new(None),
        }))
    }

    pub fn is_subscribed(&self) -> bool { self.0.subscription.borrow().is_some() }
}

impl<E: 'static> Observable<()> for ObservableSignalFromEvent<E> {
    fn node(&self) -> Rc<dyn ObservableNode> { self.0.clone() }

    fn peek(&self) {}
}

impl<E: 'static> SignalInner<E> {
    fn handle_event(&self, event: &E) {
        let Some(me) = self.me.upgrade() else { return };
        notify_observers(&self.observers, me, &self.scope_provider, Some(event as &dyn Any));
    }
}

impl<E: 'static> ObservableNode for SignalInner<E> {
    fn observable_id(&self) -> ObservableId { self.id }

    fn debug_name(&self) -> String { debug_name("ObservableSignalFromEvent", &self.name, self.id) }

    fn add_observer(&self, observer: ObserverRef) {
        if !self.observers.insert(observer) || self.subscription.borrow().is_some() {
            return;
        }
        let me = self.me.clone();
        let guard = self.source.listen(Rc::new(move |event: &E| {
            if let Some(inner) = me.upgrade() {
                inner.handle_event(event)
            }
        }));
        debug!("ObservableSignalFromEvent({}) subscribed to its source", self.debug_name());
        *self.subscription.borrow_mut() = Some(guard);
    }

    fn remove_observer(&self, observer: ObserverId) {
        if self.observers.remove(observer).is_some() && self.observers.is_empty() {
            let guard = self.subscription.borrow_mut().take();
            drop(guard);
            debug!("ObservableSignalFromEvent({}) unsubscribed from its source", self.debug_name());
        }
    }
}
