//! Fiber handles.
//!
//! A fiber is one spawned future running on its own thread. The handle can
//! interrupt it, wait for it, and read its [`Outcome`]. Interruption is
//! cooperative: the fiber's future is dropped at its next suspension point.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::types::{CancelReason, FiberId, Outcome, PanicPayload};

/// The outcome of a fiber. Fibers never fail with a domain error: their
/// futures are infallible, so only success, interruption, or a panic remain.
pub type FiberExit<T> = Outcome<T, Infallible>;

/// Interrupt flag plus the waker of the fiber thread that watches it.
#[derive(Debug, Default)]
struct InterruptSignal {
    requested: AtomicBool,
    state: Mutex<InterruptState>,
}

#[derive(Debug, Default)]
struct InterruptState {
    reason: Option<CancelReason>,
    waker: Option<Waker>,
}

impl InterruptSignal {
    fn request(&self, reason: CancelReason) {
        let waker = {
            let mut state = self.state.lock();
            match &mut state.reason {
                Some(existing) => {
                    existing.strengthen(&reason);
                }
                None => state.reason = Some(reason),
            }
            self.requested.store(true, Ordering::Release);
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    fn reason(&self) -> CancelReason {
        self.state.lock().reason.clone().unwrap_or_default()
    }

    fn poll_requested(&self, cx: &mut Context<'_>) -> Poll<()> {
        if self.is_requested() {
            return Poll::Ready(());
        }
        let mut state = self.state.lock();
        if self.is_requested() {
            return Poll::Ready(());
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// Resolves once the fiber has been asked to stop.
struct Interrupted<'a> {
    signal: &'a InterruptSignal,
}

impl Future for Interrupted<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.signal.poll_requested(cx)
    }
}

struct JoinState<T> {
    result: Option<FiberExit<T>>,
    finished: bool,
    waiters: SmallVec<[Waker; 2]>,
}

impl<T> JoinState<T> {
    fn new() -> Self {
        Self {
            result: None,
            finished: false,
            waiters: SmallVec::new(),
        }
    }
}

pub(crate) struct FiberShared<T> {
    id: FiberId,
    interrupt: InterruptSignal,
    state: Mutex<JoinState<T>>,
}

impl<T> FiberShared<T> {
    pub(crate) fn new(id: FiberId) -> Self {
        Self {
            id,
            interrupt: InterruptSignal::default(),
            state: Mutex::new(JoinState::new()),
        }
    }

    /// Drives `future` to completion on the current thread, racing it
    /// against the interrupt signal, and records the exit.
    pub(crate) fn run<F>(&self, future: F)
    where
        F: Future<Output = T>,
    {
        let span = tracing::debug_span!("fiber", id = %self.id);
        let _entered = span.enter();

        let work = async { Some(future.await) };
        let stop = async {
            Interrupted {
                signal: &self.interrupt,
            }
            .await;
            None
        };
        let raced = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            futures_lite::future::block_on(futures_lite::future::or(work, stop))
        }));

        let exit = match raced {
            Ok(Some(value)) => Outcome::Ok(value),
            Ok(None) => {
                let reason = self.interrupt.reason();
                tracing::debug!(%reason, "fiber interrupted");
                Outcome::Cancelled(reason)
            }
            Err(payload) => {
                let payload = PanicPayload::from_panic(payload);
                tracing::warn!(%payload, "fiber panicked");
                Outcome::Panicked(payload)
            }
        };
        self.complete(exit);
    }

    pub(crate) fn complete(&self, exit: FiberExit<T>) {
        let waiters = {
            let mut state = self.state.lock();
            state.result = Some(exit);
            state.finished = true;
            std::mem::take(&mut state.waiters)
        };
        for waker in waiters {
            waker.wake();
        }
    }

    fn poll_finished(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.state.lock();
        if state.finished {
            return Poll::Ready(());
        }
        if !state.waiters.iter().any(|w| w.will_wake(cx.waker())) {
            state.waiters.push(cx.waker().clone());
        }
        Poll::Pending
    }

    fn poll_join(&self, cx: &mut Context<'_>) -> Poll<FiberExit<T>> {
        let mut state = self.state.lock();
        if state.finished {
            let exit = state.result.take().unwrap_or_else(|| {
                Outcome::Panicked(PanicPayload::new("fiber exit was already taken"))
            });
            return Poll::Ready(exit);
        }
        if !state.waiters.iter().any(|w| w.will_wake(cx.waker())) {
            state.waiters.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Type-erased view of a fiber, enough to stop it and wait for it.
trait FiberControl: Send + Sync {
    fn id(&self) -> FiberId;
    fn interrupt(&self, reason: CancelReason);
    fn poll_finished(&self, cx: &mut Context<'_>) -> Poll<()>;
}

impl<T: Send> FiberControl for FiberShared<T> {
    fn id(&self) -> FiberId {
        self.id
    }

    fn interrupt(&self, reason: CancelReason) {
        self.interrupt.request(reason);
    }

    fn poll_finished(&self, cx: &mut Context<'_>) -> Poll<()> {
        Self::poll_finished(self, cx)
    }
}

/// A handle to a running fiber.
///
/// Dropping the handle does not stop the fiber.
pub struct Fiber<T> {
    shared: Arc<FiberShared<T>>,
}

impl<T: Send + 'static> Fiber<T> {
    pub(crate) fn from_shared(shared: Arc<FiberShared<T>>) -> Self {
        Self { shared }
    }

    /// Returns the fiber's identifier.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.shared.id
    }

    /// Returns true once the fiber has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.shared.state.lock().finished
    }

    /// Asks the fiber to stop at its next suspension point.
    pub fn interrupt(&self) {
        self.interrupt_with(CancelReason::user("fiber interrupted"));
    }

    /// Asks the fiber to stop, recording `reason` in its exit.
    pub fn interrupt_with(&self, reason: CancelReason) {
        self.shared.interrupt.request(reason);
    }

    /// Waits for the fiber to exit and returns its outcome.
    pub async fn join(self) -> FiberExit<T> {
        futures_lite::future::poll_fn(|cx| self.shared.poll_join(cx)).await
    }

    /// Interrupts the fiber and waits for it to exit.
    pub async fn interrupt_and_join(self) -> FiberExit<T> {
        self.interrupt();
        self.join().await
    }

    pub(crate) fn watch(&self) -> FiberWatch {
        FiberWatch {
            control: Arc::clone(&self.shared) as Arc<dyn FiberControl>,
        }
    }
}

impl<T> fmt::Debug for Fiber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.shared.id)
            .field("finished", &self.shared.state.lock().finished)
            .finish()
    }
}

/// Type-erased fiber reference held by a scope's finalizer.
#[derive(Clone)]
pub(crate) struct FiberWatch {
    control: Arc<dyn FiberControl>,
}

impl FiberWatch {
    pub(crate) fn id(&self) -> FiberId {
        self.control.id()
    }

    /// Interrupts the fiber with `reason` and waits until it has exited.
    pub(crate) async fn interrupt_and_wait(&self, reason: CancelReason) {
        tracing::trace!(fiber = %self.id(), "interrupting fiber");
        self.control.interrupt(reason);
        futures_lite::future::poll_fn(|cx| self.control.poll_finished(cx)).await;
    }
}
