use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt::Display;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::rc::{Rc, Weak};

use tracing::{debug, error, trace};

use crate::{
    Accessor, ChangeContext, Disposable, ObservableError, ObservableId, ObservableNode, Observer, ObserverId, ObserverRef,
    change::{ChangeHandling, ChangeOptions},
    context::{Tracker, run_with_accessor},
    error::panic_message,
    tracking::{Dependencies, FlagGuard},
};

/// The outcome of one run of an autorun body: `()` or `Result<(), E>`
pub trait RunResult {
    fn into_run_result(self) -> Result<(), String>;
}

impl RunResult for () {
    fn into_run_result(self) -> Result<(), String> { Ok(()) }
}

impl<E: Display> RunResult for Result<(), E> {
    fn into_run_result(self) -> Result<(), String> { self.map_err(|e| e.to_string()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AutorunState {
    DependenciesMightHaveChanged,
    Stale,
    UpToDate,
}

/// Configuration for [`Autorun::with_options`]
pub struct AutorunOptions<S = ()> {
    changes: ChangeOptions<S>,
    debug_name: Option<String>,
}

impl AutorunOptions {
    pub fn new() -> Self { Self { changes: ChangeOptions::none(), debug_name: None } }
}

impl Default for AutorunOptions {
    fn default() -> Self { Self::new() }
}

impl<S: 'static> AutorunOptions<S> {
    pub fn debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }

    /// Accumulate changes into a summary of type `S2`, handed to the next run of the body.
    /// Replaces any previously configured `will_handle_change`.
    pub fn change_summary<S2: 'static>(self, create: impl Fn() -> S2 + 'static) -> AutorunOptions<S2> {
        AutorunOptions { changes: ChangeOptions::with_summary(create), debug_name: self.debug_name }
    }

    /// Decide per change whether the body should run again, recording it in the summary
    pub fn will_handle_change(mut self, will_handle_change: impl Fn(&ChangeContext<'_>, &mut S) -> bool + 'static) -> Self {
        self.changes.will_handle_change = Some(Box::new(will_handle_change));
        self
    }
}

type Body<S> = Box<dyn FnMut(&Accessor, S) -> Result<(), String>>;

/// Operations on an autorun, erased over its change summary type
trait AutorunHandle {
    fn dispose(&self);
    fn is_disposed(&self) -> bool;
    fn debug_name(&self) -> String;
    fn dependency_count(&self) -> usize;
}

struct Inner<S> {
    id: ObserverId,
    me: Weak<Inner<S>>,
    name: Option<String>,
    /// Taken out while the body runs, and dropped on disposal
    body: RefCell<Option<Body<S>>>,
    changes: ChangeHandling<S>,
    state: Cell<AutorunState>,
    update_count: Cell<usize>,
    running: Cell<bool>,
    driving: Cell<bool>,
    disposed: Cell<bool>,
    dependencies: Dependencies,
}

/// A side-effecting body that runs immediately, and again whenever an observable it read has
/// changed. Re-runs happen once the outermost update scope of the change has finished.
///
/// The autorun is disposed by [`dispose`](Self::dispose) or when the last handle is dropped.
///
/// # Example
/// ```
/// use ankurah_observable::*;
/// use std::{cell::RefCell, rc::Rc};
///
/// let name = Settable::new("Buffy".to_string());
/// let greetings = Rc::new(RefCell::new(Vec::new()));
/// let _autorun = {
///     let (name, greetings) = (name.clone(), greetings.clone());
///     autorun(move |reader| greetings.borrow_mut().push(format!("Hello {}", name.read(reader))))
/// };
/// name.set("Willow".to_string());
/// assert_eq!(*greetings.borrow(), vec!["Hello Buffy", "Hello Willow"]);
/// ```
#[must_use = "dropping an Autorun disposes it"]
#[derive(Clone)]
pub struct Autorun {
    handle: Rc<dyn AutorunHandle>,
}

/// A non-owning reference to an [`Autorun`], usable from inside its own body
#[derive(Clone)]
pub struct WeakAutorun {
    handle: Weak<dyn AutorunHandle>,
}

/// Create an autorun tracking what `body` reads, through the accessor or through [`Observable::get`](crate::Observable::get).
///
/// Panics if the first run fails.
pub fn autorun<R: RunResult>(mut body: impl FnMut(&Accessor) -> R + 'static) -> Autorun {
    Autorun::with_options(AutorunOptions::new(), move |reader, _| body(reader))
}

impl Autorun {
    /// Like [`autorun`], but returns a failed first run as [`ObservableError::RunFailed`]
    pub fn try_new<R: RunResult>(mut body: impl FnMut(&Accessor) -> R + 'static) -> Result<Self, ObservableError> {
        Self::try_with_options(AutorunOptions::new(), move |reader, _| body(reader))
    }

    pub fn with_options<S: 'static, R: RunResult>(options: AutorunOptions<S>, body: impl FnMut(&Accessor, S) -> R + 'static) -> Self {
        match Self::try_with_options(options, body) {
            Ok(autorun) => autorun,
            Err(e) => e.raise(),
        }
    }

    /// Run `body` once, then keep it running reactively.
    ///
    /// If the first run fails the autorun is disposed: an error is returned, a panic is resumed.
    pub fn try_with_options<S: 'static, R: RunResult>(
        options: AutorunOptions<S>,
        mut body: impl FnMut(&Accessor, S) -> R + 'static,
    ) -> Result<Self, ObservableError> {
        let inner = Rc::new_cyclic(|me| Inner {
            id: ObserverId::new(),
            me: me.clone(),
            name: options.debug_name,
            body: RefCell::new(Some(Box::new(move |reader: &Accessor, summary: S| body(reader, summary).into_run_result()))),
            changes: options.changes.into_handling(),
            state: Cell::new(AutorunState::Stale),
            update_count: Cell::new(0),
            running: Cell::new(false),
            driving: Cell::new(false),
            disposed: Cell::new(false),
            dependencies: Dependencies::new(),
        });

        let first = {
            // Changes made by the first run itself are picked up by drive() below
            let _driving = FlagGuard::raise(&inner.driving);
            catch_unwind(AssertUnwindSafe(|| inner.run()))
        };
        match first {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                inner.dispose();
                return Err(ObservableError::RunFailed { name: inner.debug_name(), message });
            }
            Err(payload) => {
                inner.dispose();
                resume_unwind(payload)
            }
        }
        inner.drive();
        Ok(Self { handle: inner })
    }

    /// Stop reacting and release every subscription. Idempotent.
    pub fn dispose(&self) { self.handle.dispose() }

    pub fn is_disposed(&self) -> bool { self.handle.is_disposed() }

    pub fn debug_name(&self) -> String { self.handle.debug_name() }

    /// Number of observables read during the last run
    pub fn dependency_count(&self) -> usize { self.handle.dependency_count() }

    pub fn downgrade(&self) -> WeakAutorun { WeakAutorun { handle: Rc::downgrade(&self.handle) } }
}

impl Disposable for Autorun {
    fn dispose(&self) { self.handle.dispose() }
}

impl std::fmt::Debug for Autorun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Autorun").field("name", &self.handle.debug_name()).field("disposed", &self.handle.is_disposed()).finish()
    }
}

impl WeakAutorun {
    /// A reference that never upgrades
    pub fn new() -> Self {
        let handle: Weak<Inner<()>> = Weak::new();
        Self { handle }
    }

    pub fn upgrade(&self) -> Option<Autorun> { self.handle.upgrade().map(|handle| Autorun { handle }) }

    /// Dispose the autorun if it is still alive
    pub fn dispose(&self) {
        if let Some(handle) = self.handle.upgrade() {
            handle.dispose()
        }
    }
}

impl Default for WeakAutorun {
    fn default() -> Self { Self::new() }
}

/// Puts the body back after a run, unless the autorun was disposed meanwhile
struct BodySlot<'a, S> {
    slot: &'a RefCell<Option<Body<S>>>,
    disposed: &'a Cell<bool>,
    body: Option<Body<S>>,
}

impl<S> Drop for BodySlot<'_, S> {
    fn drop(&mut self) {
        if !self.disposed.get() {
            *self.slot.borrow_mut() = self.body.take();
        }
    }
}

impl<S> Inner<S> {
    fn debug_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("Autorun#{}", self.id),
        }
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        debug!("Autorun({}) disposed", self.debug_name());
        self.dependencies.clear(self.id);
        // Releases whatever the body captured. A running body is dropped by its BodySlot instead.
        let body = self.body.borrow_mut().take();
        drop(body);
    }
}

impl<S: 'static> Inner<S> {
    /// Run the body once under this autorun's accessor
    fn run(&self) -> Result<(), String> {
        if self.disposed.get() {
            return Ok(());
        }
        let body = self.body.borrow_mut().take();
        let mut slot = BodySlot { slot: &self.body, disposed: &self.disposed, body };
        if slot.body.is_none() {
            return Ok(());
        }

        self.state.set(AutorunState::UpToDate);
        trace!("Autorun({}) running", self.debug_name());
        let summary = self.changes.take_summary();
        let accessor = Accessor::new(self.me.clone());
        let _running = FlagGuard::raise(&self.running);
        self.dependencies.run_tracked(self.id, || {
            run_with_accessor(Some(&accessor), || match slot.body.as_mut() {
                Some(body) => body(&accessor, summary),
                None => Ok(()),
            })
        })
    }

    /// Re-run until up to date. Failures of reactive runs are logged, not propagated.
    fn drive(&self) {
        if self.driving.get() || self.running.get() {
            return;
        }
        let _driving = FlagGuard::raise(&self.driving);
        loop {
            if self.disposed.get() {
                return;
            }
            if self.state.get() == AutorunState::DependenciesMightHaveChanged {
                // In read order: a guard read first may make later dependencies irrelevant
                let confirmed = catch_unwind(AssertUnwindSafe(|| {
                    for dependency in self.dependencies.nodes() {
                        dependency.update();
                        if self.state.get() == AutorunState::Stale {
                            break;
                        }
                    }
                }));
                if let Err(payload) = confirmed {
                    error!("Autorun({}) dependency failed to update: {}", self.debug_name(), panic_message(&*payload));
                    self.state.set(AutorunState::Stale);
                }
            }
            if self.state.get() == AutorunState::DependenciesMightHaveChanged {
                self.state.set(AutorunState::UpToDate);
            }
            if self.state.get() == AutorunState::UpToDate {
                return;
            }
            match catch_unwind(AssertUnwindSafe(|| self.run())) {
                Ok(Ok(())) => {}
                Ok(Err(message)) => error!("Autorun({}) failed: {}", self.debug_name(), message),
                Err(payload) => error!("Autorun({}) panicked: {}", self.debug_name(), panic_message(&*payload)),
            }
        }
    }
}

impl<S: 'static> AutorunHandle for Inner<S> {
    fn dispose(&self) { Inner::dispose(self) }

    fn is_disposed(&self) -> bool { self.disposed.get() }

    fn debug_name(&self) -> String { Inner::debug_name(self) }

    fn dependency_count(&self) -> usize { self.dependencies.len() }
}

impl<S: 'static> Observer for Inner<S> {
    fn observer_id(&self) -> ObserverId { self.id }

    fn begin_update(&self, _observable: &dyn ObservableNode) {
        if self.state.get() == AutorunState::UpToDate {
            self.state.set(AutorunState::DependenciesMightHaveChanged);
        }
        self.update_count.set(self.update_count.get() + 1);
    }

    fn end_update(&self, _observable: &dyn ObservableNode) {
        let count = self.update_count.get().saturating_sub(1);
        self.update_count.set(count);
        if count == 0 {
            // Hold a strong reference, the body may drop the last handle
            if let Some(me) = self.me.upgrade() {
                me.drive();
            }
        }
    }

    fn handle_possible_change(&self, observable: &dyn ObservableNode) {
        if self.state.get() == AutorunState::UpToDate && self.dependencies.is_tracked(observable.observable_id()) {
            self.state.set(AutorunState::DependenciesMightHaveChanged);
        }
    }

    fn handle_change(&self, observable: &dyn ObservableNode, change: Option<&dyn Any>) {
        if !self.dependencies.is_tracked(observable.observable_id()) {
            return;
        }
        if self.changes.will_handle(&self.debug_name(), &ChangeContext::new(observable, change)) {
            self.state.set(AutorunState::Stale);
        }
    }
}

impl<S: 'static> Tracker for Inner<S> {
    fn subscribe(&self, dependency: Rc<dyn ObservableNode>) -> Result<(), ObservableError> {
        if self.disposed.get() {
            return Ok(());
        }
        if !self.running.get() {
            return Err(ObservableError::AccessorMisuse { name: self.debug_name() });
        }
        self.dependencies.subscribe(ObserverRef::from_weak(self.id, self.me.clone()), dependency);
        Ok(())
    }

    fn record(&self, dependency: ObservableId) {
        if !self.disposed.get() {
            self.dependencies.record(dependency);
        }
    }
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) { self.dispose() }
}
