use std::cell::RefCell;

/// Single-threaded storage for the present value of an observable.
///
/// Borrows never outlive a call, so observers that run afterwards can read the value again.
pub struct ValueCell<T>(RefCell<T>);

impl<T> ValueCell<T> {
    pub fn new(value: T) -> Self { Self(RefCell::new(value)) }

    pub fn set(&self, value: T) { *self.0.borrow_mut() = value; }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.0.borrow();
        f(&guard)
    }
}

impl<T: Clone> ValueCell<T> {
    pub fn value(&self) -> T { self.0.borrow().clone() }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ValueCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.with(|value| f.debug_tuple("ValueCell").field(value).finish()) }
}
