use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use tokio::sync::{oneshot, watch};

use crate::{Derived, DerivedOptions, Equality, Observable, WaitError, WeakAutorun, autorun};

/// A cooperative cancellation signal, shareable across tasks and threads
#[derive(Clone)]
pub struct CancellationToken(Arc<watch::Sender<bool>>);

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self(Arc::new(sender))
    }

    pub fn cancel(&self) { self.0.send_replace(true); }

    pub fn is_cancelled(&self) -> bool { *self.0.borrow() }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        let mut receiver = self.0.subscribe();
        // The sender lives as long as self, so this only returns once cancelled
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("CancellationToken").field("cancelled", &self.is_cancelled()).finish() }
}

/// What [`wait_for_state`] evaluates for every value of the observed observable
#[derive(Debug, Clone)]
pub struct WaitState<T, E> {
    pub is_finished: bool,
    pub error: Option<E>,
    pub state: T,
}

/// Wait until `observable` reaches a state matching `predicate`.
///
/// Resolves with the first matching value, or fails with [`WaitError::Failed`] as soon as
/// `is_error` returns an error for the observed value. If the value already matches, this
/// resolves without waiting. Cancelling the token fails the wait with [`WaitError::Cancelled`].
/// All subscriptions are released once the wait resolves, or when the future is dropped.
pub async fn wait_for_state<T, E, O>(
    observable: &O,
    predicate: impl Fn(&T) -> bool + 'static,
    is_error: impl Fn(&T) -> Option<E> + 'static,
    cancellation: Option<&CancellationToken>,
) -> Result<T, WaitError<E>>
where
    O: Observable<T> + Clone + 'static,
    T: Clone + 'static,
    E: Clone + 'static,
{
    if cancellation.is_some_and(CancellationToken::is_cancelled) {
        return Err(WaitError::Cancelled);
    }

    let states = {
        let source = observable.clone();
        Derived::with_options(DerivedOptions::new(Equality::never()), move |reader, _| {
            let state = source.read(reader);
            WaitState { is_finished: predicate(&state), error: is_error(&state), state }
        })
    };

    let (sender, mut receiver) = oneshot::channel::<Result<T, WaitError<E>>>();
    let resolved = Rc::new(Cell::new(false));
    let me = Rc::new(RefCell::new(WeakAutorun::new()));
    let runner = {
        let (resolved, me) = (resolved.clone(), me.clone());
        let mut sender = Some(sender);
        autorun(move |reader| {
            let WaitState { is_finished, error, state } = states.read(reader);
            if !is_finished && error.is_none() {
                return;
            }
            if let Some(sender) = sender.take() {
                let _ = sender.send(match error {
                    Some(error) => Err(WaitError::Failed(error)),
                    None => Ok(state),
                });
            }
            resolved.set(true);
            // A no-op during the first run; handled right after construction instead
            me.borrow().dispose();
        })
    };
    *me.borrow_mut() = runner.downgrade();
    if resolved.get() {
        runner.dispose();
    }

    let received = match cancellation {
        Some(token) => tokio::select! {
            biased;
            received = &mut receiver => received,
            _ = token.cancelled() => {
                runner.dispose();
                return Err(WaitError::Cancelled);
            }
        },
        None => (&mut receiver).await,
    };
    runner.dispose();
    // The sender is only dropped without sending if the autorun went away
    received.unwrap_or(Err(WaitError::Cancelled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Settable;
    use tokio_test::{assert_pending, assert_ready, task};

    fn negative(value: &i32) -> Option<&'static str> { (*value < 0).then_some("negative") }

    #[test]
    fn test_already_matching() {
        let value = Settable::new(5);
        let mut waiting = task::spawn(wait_for_state(&value, |v: &i32| *v > 2, negative, None));
        assert_eq!(assert_ready!(waiting.poll()), Ok(5));
        assert_eq!(value.observer_count(), 0);
    }

    #[test]
    fn test_resolves_when_matching() {
        let value = Settable::new(0);
        let mut waiting = task::spawn(wait_for_state(&value, |v: &i32| *v >= 2, negative, None));
        assert_pending!(waiting.poll());

        value.set(1);
        assert_pending!(waiting.poll());
        value.set(2);
        assert!(waiting.is_woken());
        assert_eq!(assert_ready!(waiting.poll()), Ok(2));
        assert_eq!(value.observer_count(), 0);
    }

    #[test]
    fn test_error_state() {
        let value = Settable::new(0);
        let mut waiting = task::spawn(wait_for_state(&value, |v: &i32| *v >= 2, negative, None));
        assert_pending!(waiting.poll());
        value.set(-1);
        assert_eq!(assert_ready!(waiting.poll()), Err(WaitError::Failed("negative")));
    }

    #[test]
    fn test_cancellation() {
        let value = Settable::new(0);
        let token = CancellationToken::new();
        let mut waiting = task::spawn(wait_for_state(&value, |v: &i32| *v >= 2, negative, Some(&token)));
        assert_pending!(waiting.poll());
        assert_eq!(value.observer_count(), 1);

        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(assert_ready!(waiting.poll()), Err(WaitError::Cancelled));
        assert_eq!(value.observer_count(), 0);
    }

    #[test]
    fn test_dropping_future_releases() {
        let value = Settable::new(0);
        let mut waiting = task::spawn(wait_for_state(&value, |v: &i32| *v >= 2, negative, None));
        assert_pending!(waiting.poll());
        assert_eq!(value.observer_count(), 1);
        drop(waiting);
        assert_eq!(value.observer_count(), 0);
    }
}
