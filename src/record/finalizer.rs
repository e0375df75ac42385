//! Finalizer types for scope cleanup.
//!
//! Finalizers are cleanup handlers that run when a scope closes. They are
//! executed in LIFO (last-in, first-out) order so resources are released in
//! the reverse order they were acquired, and each one observes the exit the
//! scope closed with.

use std::future::Future;

use crate::pull::BoxFuture;
use crate::scope::ScopeExit;

/// A finalizer that runs during scope close.
pub enum Finalizer {
    /// Synchronous finalizer, run directly on the closing fiber.
    ///
    /// Use for lightweight cleanup that doesn't need to await.
    Sync(Box<dyn FnOnce(&ScopeExit) + Send>),

    /// Asynchronous finalizer.
    ///
    /// Use for cleanup that needs to perform async operations, such as
    /// joining a fiber or closing a child scope.
    Async(Box<dyn FnOnce(ScopeExit) -> BoxFuture<'static, ()> + Send>),
}

impl std::fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => f.debug_tuple("Sync").field(&"<closure>").finish(),
            Self::Async(_) => f.debug_tuple("Async").field(&"<future>").finish(),
        }
    }
}

impl Finalizer {
    /// Boxes an asynchronous cleanup closure.
    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: FnOnce(ScopeExit) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::Async(Box::new(move |exit| Box::pin(f(exit))))
    }

    /// Runs the finalizer with the given exit.
    pub async fn run(self, exit: &ScopeExit) {
        match self {
            Self::Sync(f) => f(exit),
            Self::Async(f) => f(exit.clone()).await,
        }
    }
}

/// Identifies a finalizer that may be withdrawn before the stack runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FinalizerKey(u64);

/// A stack of finalizers with LIFO semantics.
///
/// Entries pushed under a [`FinalizerKey`] can be withdrawn with
/// [`remove`](Self::remove) when the thing they clean up finishes on its own.
#[derive(Debug, Default)]
pub struct FinalizerStack {
    finalizers: Vec<(Option<FinalizerKey>, Finalizer)>,
    next_key: u64,
}

impl FinalizerStack {
    /// Creates a new empty finalizer stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a finalizer onto the stack.
    pub fn push(&mut self, finalizer: Finalizer) {
        self.finalizers.push((None, finalizer));
    }

    /// Reserves a key for a later [`push_keyed`](Self::push_keyed).
    pub fn next_key(&mut self) -> FinalizerKey {
        let key = FinalizerKey(self.next_key);
        self.next_key = self.next_key.wrapping_add(1);
        key
    }

    /// Pushes a finalizer that can be withdrawn with `key`.
    pub fn push_keyed(&mut self, key: FinalizerKey, finalizer: Finalizer) {
        self.finalizers.push((Some(key), finalizer));
    }

    /// Withdraws the finalizer pushed under `key`, if it has not run.
    pub fn remove(&mut self, key: FinalizerKey) -> Option<Finalizer> {
        let pos = self
            .finalizers
            .iter()
            .rposition(|(entry, _)| *entry == Some(key))?;
        Some(self.finalizers.remove(pos).1)
    }

    /// Pops a finalizer from the stack (LIFO order).
    pub fn pop(&mut self) -> Option<Finalizer> {
        self.finalizers.pop().map(|(_, finalizer)| finalizer)
    }

    /// Returns the number of pending finalizers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.finalizers.len()
    }

    /// Returns true if there are no pending finalizers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.finalizers.is_empty()
    }

    /// Pushes a synchronous finalizer.
    pub fn push_sync<F>(&mut self, f: F)
    where
        F: FnOnce(&ScopeExit) + Send + 'static,
    {
        self.push(Finalizer::Sync(Box::new(f)));
    }

    /// Pushes an asynchronous finalizer.
    pub fn push_async<F, Fut>(&mut self, f: F)
    where
        F: FnOnce(ScopeExit) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.push(Finalizer::asynchronous(f));
    }

    /// Takes every finalizer, leaving the stack empty. The returned stack
    /// still pops in LIFO order.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            finalizers: std::mem::take(&mut self.finalizers),
            next_key: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outcome;
    use futures_lite::future::block_on;
    use std::sync::{Arc, Mutex};

    #[test]
    fn finalizer_stack_lifo_order() {
        let mut stack = FinalizerStack::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        let o3 = order.clone();

        stack.push_sync(move |_| o1.lock().unwrap().push(1));
        stack.push_async(move |_| async move { o2.lock().unwrap().push(2) });
        stack.push_sync(move |_| o3.lock().unwrap().push(3));

        let exit = Outcome::Ok(());
        while let Some(finalizer) = stack.pop() {
            block_on(finalizer.run(&exit));
        }

        assert_eq!(*order.lock().unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn finalizers_observe_exit() {
        let mut stack = FinalizerStack::new();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        stack.push_async(move |exit| async move { *s.lock().unwrap() = Some(exit) });

        let exit: ScopeExit = Outcome::Err(());
        let mut taken = stack.take();
        assert!(stack.is_empty());
        assert_eq!(taken.len(), 1);
        while let Some(finalizer) = taken.pop() {
            block_on(finalizer.run(&exit));
        }
        assert_eq!(*seen.lock().unwrap(), Some(Outcome::Err(())));
    }

    #[test]
    fn keyed_finalizers_can_be_withdrawn() {
        let mut stack = FinalizerStack::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (o1, o2, o3) = (order.clone(), order.clone(), order.clone());

        stack.push_sync(move |_| o1.lock().unwrap().push(1));
        let key = stack.next_key();
        stack.push_keyed(
            key,
            Finalizer::Sync(Box::new(move |_: &ScopeExit| o2.lock().unwrap().push(2))),
        );
        let kept = stack.next_key();
        assert_ne!(key, kept);
        stack.push_keyed(
            kept,
            Finalizer::Sync(Box::new(move |_: &ScopeExit| o3.lock().unwrap().push(3))),
        );

        assert!(stack.remove(key).is_some());
        assert!(stack.remove(key).is_none(), "a key is withdrawn once");
        assert_eq!(stack.len(), 2);

        let exit = Outcome::Ok(());
        while let Some(finalizer) = stack.pop() {
            block_on(finalizer.run(&exit));
        }
        assert_eq!(*order.lock().unwrap(), vec![3, 1]);
    }

    #[test]
    fn finalizer_stack_empty() {
        let mut stack = FinalizerStack::new();
        assert!(stack.is_empty());
        assert_eq!(stack.len(), 0);
        assert!(stack.pop().is_none());
    }
}
