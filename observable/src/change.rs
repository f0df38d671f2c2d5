use std::any::Any;
use std::cell::RefCell;

use tracing::error;

use crate::{Observable, ObservableId, ObservableNode, error::panic_message};

/// Describes a single confirmed change delivered to a consumer
pub struct ChangeContext<'a> {
    observable: &'a dyn ObservableNode,
    change: Option<&'a dyn Any>,
}

impl<'a> ChangeContext<'a> {
    pub(crate) fn new(observable: &'a dyn ObservableNode, change: Option<&'a dyn Any>) -> Self { Self { observable, change } }

    pub fn observable_id(&self) -> ObservableId { self.observable.observable_id() }

    pub fn debug_name(&self) -> String { self.observable.debug_name() }

    /// Whether this change came from `observable`
    pub fn did_change<T>(&self, observable: &impl Observable<T>) -> bool { self.observable.observable_id() == observable.observable_id() }

    /// The change payload, if the producer attached one of type `C`
    pub fn change<C: 'static>(&self) -> Option<&'a C> { self.change.and_then(|change| change.downcast_ref::<C>()) }
}

type WillHandleChange<S> = Box<dyn Fn(&ChangeContext<'_>, &mut S) -> bool>;

/// Change summary configuration shared by derived observables and autoruns.
///
/// A summary is created fresh at the start of every run, updated by `will_handle_change` while
/// changes arrive, and handed to the next run by value.
pub(crate) struct ChangeHandling<S> {
    create: Box<dyn Fn() -> S>,
    will_handle_change: Option<WillHandleChange<S>>,
    summary: RefCell<Option<S>>,
}

impl<S> ChangeHandling<S> {
    pub fn new(create: Box<dyn Fn() -> S>, will_handle_change: Option<WillHandleChange<S>>) -> Self {
        let summary = RefCell::new(Some(create()));
        Self { create, will_handle_change, summary }
    }

    /// Swap in a fresh summary and return the one accumulated since the previous run
    pub fn take_summary(&self) -> S {
        let fresh = (self.create)();
        self.summary.replace(Some(fresh)).unwrap_or_else(|| (self.create)())
    }

    /// A summary for a one-off run that does not consume the accumulated one
    pub fn fresh_summary(&self) -> S { (self.create)() }

    /// Ask `will_handle_change` whether the consumer should react. A panicking callback is logged
    /// and treated as accepting the change.
    pub fn will_handle(&self, owner: &str, context: &ChangeContext<'_>) -> bool {
        let Some(will_handle_change) = self.will_handle_change.as_ref() else { return true };
        let mut summary = self.summary.borrow_mut();
        let Some(summary) = summary.as_mut() else { return true };
        let call = std::panic::AssertUnwindSafe(|| will_handle_change(context, summary));
        match std::panic::catch_unwind(call) {
            Ok(accepted) => accepted,
            Err(payload) => {
                error!("will_handle_change of {} panicked: {}", owner, panic_message(&*payload));
                true
            }
        }
    }
}

/// Options shared by [`DerivedOptions`](crate::DerivedOptions) and [`AutorunOptions`](crate::AutorunOptions)
pub(crate) struct ChangeOptions<S> {
    pub create_change_summary: Box<dyn Fn() -> S>,
    pub will_handle_change: Option<WillHandleChange<S>>,
}

impl ChangeOptions<()> {
    pub fn none() -> Self { Self { create_change_summary: Box::new(|| ()), will_handle_change: None } }
}

impl<S> ChangeOptions<S> {
    pub fn with_summary(create: impl Fn() -> S + 'static) -> Self { Self { create_change_summary: Box::new(create), will_handle_change: None } }

    pub fn into_handling(self) -> ChangeHandling<S> { ChangeHandling::new(self.create_change_summary, self.will_handle_change) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ObservableSignal, Settable};

    #[test]
    fn test_change_context() {
        let signal: ObservableSignal<&'static str> = ObservableSignal::create(None);
        let other = Settable::new(0);
        let node = signal.node();
        let payload: &'static str = "clicked";
        let context = ChangeContext::new(&*node, Some(&payload as &dyn Any));

        assert!(context.did_change(&signal));
        assert!(!context.did_change(&other));
        assert_eq!(context.change::<&'static str>(), Some(&"clicked"));
        assert_eq!(context.change::<i32>(), None);
    }

    #[test]
    fn test_summary_handoff() {
        let mut options: ChangeOptions<Vec<u32>> = ChangeOptions::with_summary(Vec::new);
        options.will_handle_change = Some(Box::new(|context: &ChangeContext<'_>, summary: &mut Vec<u32>| {
            summary.push(*context.change::<u32>().unwrap_or(&0));
            true
        }));
        let handling = options.into_handling();
        let signal: ObservableSignal<u32> = ObservableSignal::create(None);
        let node = signal.node();

        assert!(handling.will_handle("test", &ChangeContext::new(&*node, Some(&1u32 as &dyn Any))));
        assert!(handling.will_handle("test", &ChangeContext::new(&*node, Some(&2u32 as &dyn Any))));
        assert_eq!(handling.take_summary(), vec![1, 2]);
        assert_eq!(handling.take_summary(), Vec::<u32>::new());
    }

    #[test]
    fn test_panicking_callback_accepts() {
        let failing = |_: &ChangeContext<'_>, _: &mut ()| -> bool { panic!("callback failed") };
        let options = ChangeOptions { create_change_summary: Box::new(|| ()), will_handle_change: Some(Box::new(failing)) };
        let handling = options.into_handling();
        let signal: ObservableSignal = ObservableSignal::new();
        let node = signal.node();
        assert!(handling.will_handle("test", &ChangeContext::new(&*node, None)));
    }
}
