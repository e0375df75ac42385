//! Scopes: lifetimes for resources and fibers.
//!
//! A [`Scope`] owns finalizers and the fibers forked into it. Closing a scope
//! runs its finalizers in LIFO order, each observing the [`ScopeExit`] the
//! scope closed with. Child scopes created with [`Scope::fork`] close when
//! their parent closes, unless they closed first.
//!
//! # Lifecycle
//!
//! ```text
//! Open ──close(exit)──► Closing (finalizers run, LIFO) ──► Closed
//! ```
//!
//! Closing is idempotent: only the first call's exit is recorded and only that
//! call runs the finalizers. Registering a finalizer on a closed scope runs it
//! immediately with the recorded exit.
//!
//! # Example
//!
//! ```ignore
//! let scope = Scope::new();
//! let child = scope.fork();
//! child.add_finalizer(|exit| async move { release_connection(exit).await }).await;
//! scope.close(Outcome::Ok(())).await; // closes `child` first
//! ```

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures_lite::FutureExt;
use parking_lot::Mutex;

use crate::error::Error;
use crate::record::{Finalizer, FinalizerKey, FinalizerStack};
use crate::runtime::{Fiber, Runtime};
use crate::types::{CancelReason, Outcome, PanicPayload, ScopeId};

/// The exit a scope closes with. Values and domain errors are erased: a
/// finalizer only learns whether the owner succeeded, failed, was cancelled,
/// or panicked.
pub type ScopeExit = Outcome<(), ()>;

struct ScopeState {
    finalizers: FinalizerStack,
    exit: Option<ScopeExit>,
    detach: Option<Detach>,
}

/// A child's entry in its parent's finalizers, withdrawn once the child
/// finishes on its own.
struct Detach {
    parent: Weak<ScopeInner>,
    key: FinalizerKey,
}

impl Detach {
    fn run(self) {
        if let Some(parent) = self.parent.upgrade() {
            let removed = parent.state.lock().finalizers.remove(self.key);
            drop(removed);
        }
    }
}

enum FiberDetach {
    /// The entry is not pushed yet.
    Pending,
    Armed(Detach),
    /// The fiber finished before its entry was armed.
    Fired,
}

/// Withdraws a fiber's entry when the fiber's future completes or is dropped.
struct DetachOnDrop(Arc<Mutex<FiberDetach>>);

impl DetachOnDrop {
    /// Hands `detach` to the guard, or runs it now if the fiber already
    /// finished.
    fn arm(slot: &Mutex<FiberDetach>, detach: Detach) {
        let mut state = slot.lock();
        if matches!(*state, FiberDetach::Fired) {
            drop(state);
            detach.run();
        } else {
            *state = FiberDetach::Armed(detach);
        }
    }
}

impl Drop for DetachOnDrop {
    fn drop(&mut self) {
        let previous = std::mem::replace(&mut *self.0.lock(), FiberDetach::Fired);
        if let FiberDetach::Armed(detach) = previous {
            detach.run();
        }
    }
}

struct ScopeInner {
    id: ScopeId,
    runtime: Runtime,
    state: Mutex<ScopeState>,
}

/// A cloneable handle to a scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Creates an open scope on the global runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_runtime(Runtime::global().clone())
    }

    /// Creates an open scope whose fibers run on `runtime`.
    #[must_use]
    pub fn with_runtime(runtime: Runtime) -> Self {
        Self::from_state(runtime, None)
    }

    fn from_state(runtime: Runtime, exit: Option<ScopeExit>) -> Self {
        let scope = Self {
            inner: Arc::new(ScopeInner {
                id: ScopeId::next(),
                runtime,
                state: Mutex::new(ScopeState {
                    finalizers: FinalizerStack::new(),
                    exit,
                    detach: None,
                }),
            }),
        };
        tracing::trace!(scope = %scope.id(), "scope opened");
        scope
    }

    /// Returns the scope's identifier.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Returns the runtime this scope forks fibers onto.
    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Returns true once `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().exit.is_some()
    }

    /// Returns the exit the scope closed with, if it has closed.
    #[must_use]
    pub fn exit(&self) -> Option<ScopeExit> {
        self.inner.state.lock().exit.clone()
    }

    /// Returns the number of finalizers waiting for this scope to close.
    ///
    /// Child scopes and fibers that finished on their own are not counted.
    #[must_use]
    pub fn finalizer_count(&self) -> usize {
        self.inner.state.lock().finalizers.len()
    }

    /// Creates a child scope that is closed when this scope closes.
    ///
    /// A child that closes first withdraws itself from this scope. Forking a
    /// closed scope yields a child that is already closed with the parent's
    /// exit.
    #[must_use]
    pub fn fork(&self) -> Self {
        let mut state = self.inner.state.lock();
        if let Some(exit) = &state.exit {
            return Self::from_state(self.inner.runtime.clone(), Some(exit.clone()));
        }
        let child = Self::from_state(self.inner.runtime.clone(), None);
        let key = state.finalizers.next_key();
        child.inner.state.lock().detach = Some(Detach {
            parent: Arc::downgrade(&self.inner),
            key,
        });
        let closer = child.clone();
        state.finalizers.push_keyed(
            key,
            Finalizer::asynchronous(move |exit| async move { closer.close(exit).await }),
        );
        drop(state);
        tracing::trace!(parent = %self.id(), child = %child.id(), "scope forked");
        child
    }

    /// Registers an asynchronous finalizer.
    ///
    /// If the scope already closed, the finalizer runs now with the recorded
    /// exit.
    pub async fn add_finalizer<F, Fut>(&self, f: F)
    where
        F: FnOnce(ScopeExit) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let late_exit = {
            let mut state = self.inner.state.lock();
            match &state.exit {
                Some(exit) => exit.clone(),
                None => {
                    state.finalizers.push_async(f);
                    return;
                }
            }
        };
        run_finalizer(self.id(), Finalizer::asynchronous(f), &late_exit).await;
    }

    /// Registers a synchronous finalizer.
    pub fn add_finalizer_sync<F>(&self, f: F)
    where
        F: FnOnce(&ScopeExit) + Send + 'static,
    {
        let late_exit = {
            let mut state = self.inner.state.lock();
            match &state.exit {
                Some(exit) => exit.clone(),
                None => {
                    state.finalizers.push_sync(f);
                    return;
                }
            }
        };
        if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| f(&late_exit))) {
            let payload = PanicPayload::from_panic(payload);
            tracing::warn!(scope = %self.id(), %payload, "finalizer panicked");
        }
    }

    /// Closes the scope, running every finalizer in LIFO order.
    ///
    /// A panicking finalizer is logged and does not stop the others. Later
    /// calls return immediately.
    pub async fn close(&self, exit: ScopeExit) {
        let (mut finalizers, detach) = {
            let mut state = self.inner.state.lock();
            if state.exit.is_some() {
                return;
            }
            state.exit = Some(exit.clone());
            (state.finalizers.take(), state.detach.take())
        };
        tracing::debug!(
            scope = %self.id(),
            finalizers = finalizers.len(),
            exit = exit_label(&exit),
            "closing scope"
        );
        while let Some(finalizer) = finalizers.pop() {
            run_finalizer(self.id(), finalizer, &exit).await;
        }
        if let Some(detach) = detach {
            detach.run();
        }
        tracing::trace!(scope = %self.id(), "scope closed");
    }

    /// Forks `future` onto a new fiber owned by this scope.
    ///
    /// Closing the scope interrupts the fiber and waits for it to exit. A
    /// fiber that finishes first withdraws itself from the scope.
    pub fn fork_fiber<F>(&self, future: F) -> Result<Fiber<F::Output>, Error>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.exit.is_some() {
            return Err(Error::scope_closed(self.id()));
        }
        let key = state.finalizers.next_key();
        let slot = Arc::new(Mutex::new(FiberDetach::Pending));
        let guard = DetachOnDrop(Arc::clone(&slot));
        let fiber = self.inner.runtime.spawn(async move {
            let _guard = guard;
            future.await
        })?;
        let watch = fiber.watch();
        state.finalizers.push_keyed(
            key,
            Finalizer::asynchronous(move |_| async move {
                watch
                    .interrupt_and_wait(CancelReason::parent_cancelled())
                    .await;
            }),
        );
        drop(state);
        DetachOnDrop::arm(
            &slot,
            Detach {
                parent: Arc::downgrade(&self.inner),
                key,
            },
        );
        tracing::trace!(scope = %self.id(), fiber = %fiber.id(), "fiber forked");
        Ok(fiber)
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("exit", &state.exit)
            .field("finalizers", &state.finalizers.len())
            .finish()
    }
}

async fn run_finalizer(scope: ScopeId, finalizer: Finalizer, exit: &ScopeExit) {
    if let Err(payload) = AssertUnwindSafe(finalizer.run(exit)).catch_unwind().await {
        let payload = PanicPayload::from_panic(payload);
        tracing::warn!(%scope, %payload, "finalizer panicked");
    }
}

fn exit_label(exit: &ScopeExit) -> &'static str {
    match exit {
        Outcome::Ok(()) => "ok",
        Outcome::Err(()) => "err",
        Outcome::Cancelled(_) => "cancelled",
        Outcome::Panicked(_) => "panicked",
    }
}

/// Closes a scope if it is dropped while still armed.
///
/// Runners hold one of these so that a consumer abandoning the run (dropping
/// the future mid-flight) still releases everything the run acquired. The
/// close happens on a detached fiber with a parent-cancelled exit.
#[derive(Debug)]
pub struct ScopeGuard {
    scope: Option<Scope>,
}

impl ScopeGuard {
    /// Arms a guard for `scope`.
    #[must_use]
    pub fn new(scope: Scope) -> Self {
        Self { scope: Some(scope) }
    }

    /// Disarms the guard. The caller becomes responsible for closing the
    /// scope.
    pub fn disarm(mut self) {
        self.scope = None;
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let Some(scope) = self.scope.take() else {
            return;
        };
        if scope.is_closed() {
            return;
        }
        tracing::debug!(scope = %scope.id(), "scope abandoned, closing in background");
        let closer = scope.clone();
        let spawned = scope.runtime().spawn_detached(async move {
            closer
                .close(Outcome::Cancelled(CancelReason::parent_cancelled()))
                .await;
        });
        if let Err(err) = spawned {
            tracing::error!(scope = %scope.id(), error = %err, "failed to close abandoned scope");
        }
    }
}
