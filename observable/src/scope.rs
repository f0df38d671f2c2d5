use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use tracing::warn;

use crate::{ObservableNode, Observer, error::panic_message};

/// A batching boundary.
///
/// [`push`](Self::push) calls `begin_update` immediately and defers the matching `end_update`
/// until the scope is disposed. No dependent re-executes while the scope is open, so consumers only
/// ever observe the state left behind by the whole batch.
///
/// Cloning an `UpdateScope` shares the same queue. The scope is disposed explicitly with
/// [`dispose`](Self::dispose), or when the last handle is dropped.
#[derive(Clone)]
pub struct UpdateScope(Rc<Inner>);

struct Pending {
    observer: Weak<dyn Observer>,
    observable: Rc<dyn ObservableNode>,
}

struct Inner {
    queue: RefCell<Vec<Pending>>,
    disposed: Cell<bool>,
}

thread_local! {
    static CURRENT_SCOPE: RefCell<Option<UpdateScope>> = const { RefCell::new(None) };
}

impl UpdateScope {
    pub fn new() -> Self { Self(Rc::new(Inner { queue: RefCell::new(Vec::new()), disposed: Cell::new(false) })) }

    /// The ambient scope, if a call to [`update`] is in progress on this thread
    pub fn current() -> Option<UpdateScope> { CURRENT_SCOPE.with(|current| current.borrow().clone()) }

    pub fn is_disposed(&self) -> bool { self.0.disposed.get() }

    /// Begin an update of `observable` for `observer`, deferring the matching `end_update`
    pub fn push(&self, observer: &Rc<dyn Observer>, observable: Rc<dyn ObservableNode>) {
        observer.begin_update(&*observable);
        if self.0.disposed.get() {
            // Nothing left to defer to
            observer.end_update(&*observable);
            return;
        }
        self.0.queue.borrow_mut().push(Pending { observer: Rc::downgrade(observer), observable });
    }

    /// Call every deferred `end_update` exactly once, in the order the updates were pushed.
    /// Updates pushed while flushing are flushed too. Idempotent.
    pub fn dispose(&self) {
        if self.0.disposed.get() {
            return;
        }
        self.0.flush(false);
    }
}

impl Default for UpdateScope {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for UpdateScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateScope").field("pending", &self.0.queue.borrow().len()).field("disposed", &self.0.disposed.get()).finish()
    }
}

impl Inner {
    fn flush(&self, guarded: bool) {
        loop {
            let batch = std::mem::take(&mut *self.queue.borrow_mut());
            if batch.is_empty() {
                break;
            }
            for pending in batch {
                let Some(observer) = pending.observer.upgrade() else { continue };
                if guarded {
                    let end = std::panic::AssertUnwindSafe(|| observer.end_update(&*pending.observable));
                    if let Err(payload) = std::panic::catch_unwind(end) {
                        warn!("end_update of {} panicked during unwinding: {}", pending.observable.debug_name(), panic_message(&*payload));
                    }
                } else {
                    observer.end_update(&*pending.observable);
                }
            }
        }
        self.disposed.set(true);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.disposed.get() {
            return;
        }
        if std::thread::panicking() {
            warn!("update scope dropped while panicking; flushing pending updates");
            self.flush(true);
        } else {
            self.flush(false);
        }
    }
}

/// Restores the previous ambient scope on drop
struct AmbientGuard(Option<UpdateScope>);

impl AmbientGuard {
    fn install(scope: UpdateScope) -> Self { Self(CURRENT_SCOPE.with(|current| current.borrow_mut().replace(scope))) }
}

impl Drop for AmbientGuard {
    fn drop(&mut self) {
        let previous = self.0.take();
        CURRENT_SCOPE.with(|current| *current.borrow_mut() = previous);
    }
}

/// Run `run` inside an update scope.
///
/// Reuses the ambient scope if one is active, so nested `set`/`trigger` calls batch together.
/// Otherwise a new scope is installed for the extent of `run` and disposed afterwards, at which
/// point dependents are notified.
pub fn update<R>(run: impl FnOnce(&UpdateScope) -> R) -> R {
    if let Some(scope) = UpdateScope::current() {
        return run(&scope);
    }
    let scope = UpdateScope::new();
    let result = {
        let _ambient = AmbientGuard::install(scope.clone());
        run(&scope)
    };
    scope.dispose();
    result
}

/// Run `run` with `scope` installed as the ambient scope. The scope is not disposed.
pub fn update_in<R>(scope: &UpdateScope, run: impl FnOnce(&UpdateScope) -> R) -> R {
    let _ambient = AmbientGuard::install(scope.clone());
    run(scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Observable, Settable};

    #[test]
    fn test_update_reuses_ambient_scope() {
        assert!(UpdateScope::current().is_none());
        update(|outer| {
            let outer = outer.clone();
            update(|inner| {
                assert!(Rc::ptr_eq(&outer.0, &inner.0));
            });
            assert!(!outer.is_disposed());
        });
        assert!(UpdateScope::current().is_none());
    }

    #[test]
    fn test_explicit_scope_defers_until_dispose() {
        let value = Settable::new(1);
        let doubled = value.map(|v| v * 2);
        let _keep = crate::keep_observed(&doubled);
        assert_eq!(doubled.get(), 2);

        let scope = UpdateScope::new();
        value.set_in(&scope, 5, None);
        // the value is stored immediately
        assert_eq!(value.get(), 5);
        scope.dispose();
        assert!(scope.is_disposed());
        assert_eq!(doubled.get(), 10);

        // disposing again is a no-op
        scope.dispose();
    }

    #[test]
    fn test_dropping_scope_flushes() {
        let value = Settable::new(1);
        {
            let scope = UpdateScope::new();
            update_in(&scope, |_| {
                value.set(2);
                value.set(3);
            });
        }
        assert!(UpdateScope::current().is_none());
        assert_eq!(value.get(), 3);
    }
}
