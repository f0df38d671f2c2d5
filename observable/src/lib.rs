/*!
Lazy, batched, dependency-tracking observables for ankurah

# Design requirements:
- The engine works on the dyn object safe [`ObservableNode`] / [`Observer`] pair; typed access goes through [`Observable<T>`]
- Dependencies are discovered while a computation runs - no manual wiring
- Derived values are lazy: nothing is recomputed until somebody reads it
- No observers means no cache: an unobserved derived value holds neither a value nor subscriptions
- Mutations inside an update scope are batched; dependents run once, after the outermost scope ends
- Single threaded. Handles are `Rc` based and ambient state is thread local

# Nomenclature:
- `get` - read the value, registering it with the running derived/autorun (if any)
- `read(accessor)` - read the value, registering it with the consumer the accessor belongs to
- `peek` - read the value without registering anything

# Basic usage

```rust
use ankurah_observable::*;
use std::{cell::RefCell, rc::Rc};

let a = Settable::new(1);
let b = Settable::new(2);
let sum = {
    let (a, b) = (a.clone(), b.clone());
    Derived::new(move || a.get() + b.get())
};

let log = Rc::new(RefCell::new(Vec::new()));
let _autorun = {
    let (sum, log) = (sum.clone(), log.clone());
    autorun(move |reader| log.borrow_mut().push(sum.read(reader)))
};

// Both writes are batched; the autorun runs once, and the sum is recomputed once
update(|_| {
    a.set(10);
    b.set(20);
});
assert_eq!(*log.borrow(), vec![3, 30]);
```
*/

mod autorun;
mod broadcast;
mod change;
mod context;
mod disposable;
mod error;
mod observable;
mod observer;
mod porcelain;
mod scope;
mod tracking;
mod value;

pub use autorun::*;
pub use broadcast::*;
pub use change::ChangeContext;
pub use context::*;
pub use disposable::*;
pub use error::*;
pub use observable::*;
pub use observer::*;
pub use porcelain::*;
pub use scope::*;
