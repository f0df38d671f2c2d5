use crate::ListenerGuard;

/// A resource that can be released explicitly. Disposing twice is a no-op.
pub trait Disposable {
    fn dispose(&self);
}

/// A bag of resources released together, in reverse order of registration.
///
/// Dropping the store disposes everything it holds.
#[derive(Default)]
pub struct DisposableStore {
    items: Vec<Box<dyn FnOnce()>>,
}

impl DisposableStore {
    pub fn new() -> Self { Self { items: Vec::new() } }

    /// Take ownership of `disposable`, disposing it with the store
    pub fn add<D: Disposable + 'static>(&mut self, disposable: D) { self.items.push(Box::new(move || disposable.dispose())) }

    /// Keep a listener subscribed until the store is disposed
    pub fn add_guard(&mut self, guard: ListenerGuard) { self.items.push(Box::new(move || guard.unlisten())) }

    /// Run `dispose` when the store is disposed
    pub fn add_fn(&mut self, dispose: impl FnOnce() + 'static) { self.items.push(Box::new(dispose)) }

    pub fn dispose(&mut self) {
        while let Some(item) = self.items.pop() {
            item()
        }
    }

    pub fn len(&self) -> usize { self.items.len() }

    pub fn is_empty(&self) -> bool { self.items.is_empty() }
}

impl Drop for DisposableStore {
    fn drop(&mut self) { self.dispose() }
}

impl std::fmt::Debug for DisposableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("DisposableStore").field("items", &self.items.len()).finish() }
}
