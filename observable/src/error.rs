use thiserror::Error;

/// Programming errors raised by the observable graph.
///
/// These indicate a bug in the code driving the graph rather than a runtime condition.
/// Infallible entry points (`get`, `autorun`) panic with the display string of these errors;
/// the `try_` variants return them instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObservableError {
    /// A derived observable was read while it was already computing
    #[error("cyclic dependency: {name} was read while it was computing")]
    CyclicDependency { name: String },

    /// An accessor was used after (or outside of) the run it was handed to
    #[error("accessor misuse: {name} is not running")]
    AccessorMisuse { name: String },

    /// The first run of an autorun failed, so the autorun was disposed
    #[error("autorun {name} failed on its first run: {message}")]
    RunFailed { name: String, message: String },
}

/// Failure of [`wait_for_state`](crate::wait_for_state)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError<E> {
    /// The error predicate matched the observed state
    #[error("wait failed: {0}")]
    Failed(E),

    /// The cancellation token fired before the state was reached
    #[error("wait cancelled")]
    Cancelled,
}

impl ObservableError {
    /// Panic with this error. Used where the graph cannot return a `Result` to the caller.
    pub(crate) fn raise(self) -> ! { panic!("{self}") }
}

/// Best-effort extraction of a message from a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
