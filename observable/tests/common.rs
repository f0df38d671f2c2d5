use std::{cell::RefCell, rc::Rc};

use tracing::Level;

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() { tracing_subscriber::fmt().with_max_level(Level::INFO).with_test_writer().init(); }

/// Returns a closure recording values, and a closure draining what was recorded since the last check
#[allow(unused)]
pub fn watcher<T: 'static>() -> (Rc<dyn Fn(T)>, Box<dyn Fn() -> Vec<T>>) {
    let values = Rc::new(RefCell::new(Vec::new()));
    let accumulate = {
        let values = values.clone();
        Rc::new(move |value: T| values.borrow_mut().push(value))
    };
    let check = Box::new(move || -> Vec<T> { values.borrow_mut().drain(..).collect() });
    (accumulate, check)
}

/// A counter shared between a compute function and the test body
#[allow(unused)]
pub fn counter() -> (Rc<dyn Fn()>, Box<dyn Fn() -> usize>) {
    let count = Rc::new(std::cell::Cell::new(0));
    let increment = {
        let count = count.clone();
        Rc::new(move || count.set(count.get() + 1))
    };
    (increment, Box::new(move || count.get()))
}
