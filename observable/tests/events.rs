mod common;
use std::{cell::Cell, rc::Rc};

use ankurah_observable::*;
use common::watcher;

/// A minimal model owning its state, announcing changes through an emitter
struct Counter {
    value: Cell<i32>,
    changed: Emitter<i32>,
}

impl Counter {
    fn new() -> Rc<Self> { Rc::new(Self { value: Cell::new(0), changed: Emitter::new() }) }

    fn increment(&self) {
        self.value.set(self.value.get() + 1);
        self.changed.emit(&self.value.get());
    }
}

#[test]
fn test_observable_from_event_lifecycle() {
    let counter = Counter::new();
    let observable = {
        let model = counter.clone();
        ObservableFromEvent::new(counter.changed.clone(), move |_: Option<&i32>| model.value.get())
    };
    assert_eq!(observable.get(), 0);
    assert_eq!(counter.changed.listener_count(), 0);

    let (accumulate, check) = watcher();
    let runner = {
        let observable = observable.clone();
        autorun(move |reader| accumulate(observable.read(reader)))
    };
    assert_eq!(counter.changed.listener_count(), 1);
    assert_eq!(check(), [0]);

    counter.increment();
    counter.increment();
    assert_eq!(check(), [1, 2]);

    // events inside one scope: one run with the final value
    update(|_| {
        counter.increment();
        counter.increment();
    });
    assert_eq!(check(), [4]);

    drop(runner);
    assert_eq!(counter.changed.listener_count(), 0);
    assert!(!observable.is_subscribed());
}

#[test]
fn test_signal_from_event_carries_payload() {
    let emitter = Emitter::<String>::new();
    let messages = ObservableSignalFromEvent::new(emitter.clone());
    let (accumulate, check) = watcher();
    let options = AutorunOptions::new().change_summary(Vec::new).will_handle_change(|context: &ChangeContext<'_>, summary: &mut Vec<String>| {
        summary.extend(context.change::<String>().cloned());
        true
    });
    let _runner = {
        let messages = messages.clone();
        Autorun::with_options(options, move |reader, summary: Vec<String>| {
            messages.read(reader);
            accumulate(summary);
        })
    };
    check();

    emitter.emit(&"hello".to_string());
    // signals have no equality suppression
    emitter.emit(&"hello".to_string());
    assert_eq!(check(), [vec!["hello".to_string()], vec!["hello".to_string()]]);
}
