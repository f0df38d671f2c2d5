use crate::{Accessor, Autorun, DisposableStore, autorun};

/// An autorun whose body gets a fresh [`DisposableStore`] on every run.
///
/// The store handed to the previous run is disposed right before the next run starts, and the
/// last one is disposed together with the autorun.
pub fn autorun_with_disposables(mut body: impl FnMut(&Accessor, &mut DisposableStore) + 'static) -> Autorun {
    let mut store = DisposableStore::new();
    autorun(move |reader| {
        store.dispose();
        body(reader, &mut store)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Emitter, EventSource, Observable, Settable};
    use std::rc::Rc;

    #[test]
    fn test_store_per_run() {
        let value = Settable::new(0);
        let emitter = Emitter::<i32>::new();
        let runner = {
            let (value, emitter) = (value.clone(), emitter.clone());
            autorun_with_disposables(move |reader, store| {
                // one listener per unit of value
                for _ in 0..=value.read(reader) {
                    store.add_guard(emitter.listen(Rc::new(|_: &i32| {})));
                }
            })
        };
        assert_eq!(emitter.listener_count(), 1);

        value.set(2);
        assert_eq!(emitter.listener_count(), 3);

        runner.dispose();
        assert_eq!(emitter.listener_count(), 0);
    }
}
