//! The Halt/Pull protocol.
//!
//! A pull is driven one step at a time. Each step yields a value, fails with
//! a [`Cause`], or halts with a leftover. Halt rides in the error position of
//! [`PullResult`] so `?` propagates it through pull bodies, but it is a
//! distinct variant of [`PullError`]: nothing that inspects failures can
//! mistake it for a domain error, and [`PullError::into_halt`] is the single
//! place where the two are separated.
//!
//! # Re-driving
//!
//! Every pull in this crate is fused. Once a pull has halted, driving it
//! again halts again with the same leftover.
//!
//! # Example
//!
//! ```
//! use flowcore::pull::{catch_halt, halt_unit, PullResult};
//! use flowcore::types::Cause;
//!
//! async fn exhausted() -> PullResult<i32, String> {
//!     halt_unit()
//! }
//!
//! let out = futures_lite::future::block_on(catch_halt(exhausted(), |()| async { Ok(-1) }));
//! assert_eq!(out, Ok::<_, Cause<String>>(-1));
//! ```

use core::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::sync::Semaphore;
use crate::types::{CancelReason, Cause, Outcome, PanicPayload};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The error side of a pull step: a halt with a leftover, or a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullError<E, L = ()> {
    /// The pull is exhausted. Not a failure.
    Halt(L),
    /// Domain error.
    Err(E),
    /// The pull was interrupted.
    Cancelled(CancelReason),
    /// The pull hit a defect.
    Panicked(PanicPayload),
}

impl<E, L> PullError<E, L> {
    /// Returns true if this is a halt rather than a failure.
    #[must_use]
    pub const fn is_halt(&self) -> bool {
        matches!(self, Self::Halt(_))
    }

    /// Returns the leftover if this is a halt.
    #[must_use]
    pub const fn leftover(&self) -> Option<&L> {
        match self {
            Self::Halt(l) => Some(l),
            _ => None,
        }
    }

    /// Splits a halt from a failure.
    pub fn into_halt(self) -> Result<L, Cause<E>> {
        match self {
            Self::Halt(l) => Ok(l),
            Self::Err(e) => Err(Cause::Err(e)),
            Self::Cancelled(r) => Err(Cause::Cancelled(r)),
            Self::Panicked(p) => Err(Cause::Panicked(p)),
        }
    }

    /// Returns the failure, or `None` for a halt.
    pub fn into_cause(self) -> Option<Cause<E>> {
        self.into_halt().err()
    }

    /// The exit a scope is closed with when a pull stops with this error.
    ///
    /// Halt closes successfully.
    #[must_use]
    pub fn scope_exit(&self) -> Outcome<(), ()> {
        match self {
            Self::Halt(_) => Outcome::Ok(()),
            Self::Err(_) => Outcome::Err(()),
            Self::Cancelled(r) => Outcome::Cancelled(r.clone()),
            Self::Panicked(p) => Outcome::Panicked(p.clone()),
        }
    }

    /// Maps the domain error, leaving halts and other failures untouched.
    pub fn map_err<F2, G: FnOnce(E) -> F2>(self, g: G) -> PullError<F2, L> {
        match self {
            Self::Halt(l) => PullError::Halt(l),
            Self::Err(e) => PullError::Err(g(e)),
            Self::Cancelled(r) => PullError::Cancelled(r),
            Self::Panicked(p) => PullError::Panicked(p),
        }
    }
}

impl<E, L> From<Cause<E>> for PullError<E, L> {
    fn from(cause: Cause<E>) -> Self {
        match cause {
            Cause::Err(e) => Self::Err(e),
            Cause::Cancelled(r) => Self::Cancelled(r),
            Cause::Panicked(p) => Self::Panicked(p),
        }
    }
}

impl<E: fmt::Display, L> fmt::Display for PullError<E, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halt(_) => write!(f, "halt"),
            Self::Err(e) => write!(f, "{e}"),
            Self::Cancelled(r) => write!(f, "cancelled: {r}"),
            Self::Panicked(p) => write!(f, "{p}"),
        }
    }
}

/// The result of driving a pull once.
pub type PullResult<A, E, L = ()> = Result<A, PullError<E, L>>;

/// Halts with the given leftover.
pub fn halt<A, E, L>(leftover: L) -> PullResult<A, E, L> {
    Err(PullError::Halt(leftover))
}

/// Halts with the unit leftover.
pub fn halt_unit<A, E>() -> PullResult<A, E> {
    Err(PullError::Halt(()))
}

/// Returns true if `err` is a halt.
#[must_use]
pub fn is_halt<E, L>(err: &PullError<E, L>) -> bool {
    err.is_halt()
}

/// Drives `pull` and handles only a halt; failures are re-raised unchanged.
pub async fn catch_halt<A, E, L, P, H, HFut>(pull: P, on_halt: H) -> Result<A, Cause<E>>
where
    P: Future<Output = PullResult<A, E, L>>,
    H: FnOnce(L) -> HFut,
    HFut: Future<Output = Result<A, Cause<E>>>,
{
    match pull.await {
        Ok(value) => Ok(value),
        Err(err) => match err.into_halt() {
            Ok(leftover) => on_halt(leftover).await,
            Err(cause) => Err(cause),
        },
    }
}

/// Drives `pull` and eliminates all three outcomes into one type.
pub async fn match_pull<A, E, L, B, P, S, SFut, F, FFut, H, HFut>(
    pull: P,
    on_success: S,
    on_failure: F,
    on_halt: H,
) -> B
where
    P: Future<Output = PullResult<A, E, L>>,
    S: FnOnce(A) -> SFut,
    SFut: Future<Output = B>,
    F: FnOnce(Cause<E>) -> FFut,
    FFut: Future<Output = B>,
    H: FnOnce(L) -> HFut,
    HFut: Future<Output = B>,
{
    match pull.await {
        Ok(value) => on_success(value).await,
        Err(err) => match err.into_halt() {
            Ok(leftover) => on_halt(leftover).await,
            Err(cause) => on_failure(cause).await,
        },
    }
}

/// A computation that yields one element per drive.
pub trait Pull<A, E, L = ()>: Send {
    /// Drives the pull one step.
    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E, L>>;
}

/// A type-erased pull.
pub type BoxPull<A, E, L = ()> = Box<dyn Pull<A, E, L>>;

impl<A, E, L, P> Pull<A, E, L> for Box<P>
where
    P: Pull<A, E, L> + ?Sized,
{
    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E, L>> {
        (**self).pull()
    }
}

/// Adapts a closure returning a future into a fused [`Pull`].
pub struct PullFn<F, L = ()> {
    f: F,
    halted: Option<L>,
}

impl<F, L> PullFn<F, L> {
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f, halted: None }
    }
}

impl<F, L> fmt::Debug for PullFn<F, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullFn")
            .field("halted", &self.halted.is_some())
            .finish()
    }
}

impl<A, E, L, F, Fut> Pull<A, E, L> for PullFn<F, L>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = PullResult<A, E, L>> + Send + 'static,
    A: Send + 'static,
    E: Send + 'static,
    L: Clone + Send + 'static,
{
    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E, L>> {
        Box::pin(async move {
            if let Some(leftover) = &self.halted {
                return Err(PullError::Halt(leftover.clone()));
            }
            let result = (self.f)().await;
            if let Err(PullError::Halt(leftover)) = &result {
                self.halted = Some(leftover.clone());
            }
            result
        })
    }
}

/// Boxes a closure as a pull.
pub fn pull_fn<A, E, F, Fut>(f: F) -> BoxPull<A, E>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = PullResult<A, E>> + Send + 'static,
    A: Send + 'static,
    E: Send + 'static,
{
    Box::new(PullFn::new(f))
}

/// A pull that halts immediately and forever.
#[derive(Debug, Default, Clone, Copy)]
pub struct HaltedPull;

impl<A: Send + 'static, E: Send + 'static> Pull<A, E> for HaltedPull {
    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E>> {
        Box::pin(std::future::ready(halt_unit()))
    }
}

/// A pull that fails once with a cause, then halts.
#[derive(Debug)]
pub struct FailPull<E> {
    cause: Option<Cause<E>>,
}

impl<E> FailPull<E> {
    /// Creates a pull that raises `cause` on its first drive.
    pub fn new(cause: Cause<E>) -> Self {
        Self { cause: Some(cause) }
    }
}

impl<A: Send + 'static, E: Send + 'static> Pull<A, E> for FailPull<E> {
    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E>> {
        let result = match self.cause.take() {
            Some(cause) => Err(cause.into()),
            None => halt_unit(),
        };
        Box::pin(std::future::ready(result))
    }
}

struct UpstreamInner<A, E> {
    gate: Semaphore,
    pull: Mutex<Option<BoxPull<A, E>>>,
}

/// A shared handle to an upstream pull.
///
/// Clones drive the same underlying pull; concurrent drives are serialized,
/// so each element is delivered to exactly one caller.
pub struct Upstream<A, E> {
    inner: Arc<UpstreamInner<A, E>>,
}

impl<A, E> Clone for Upstream<A, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, E> fmt::Debug for Upstream<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upstream")
            .field("busy", &(self.inner.gate.available_permits() == 0))
            .finish()
    }
}

/// Holds the pull while it is being driven and puts it back even if the
/// driving future is dropped midway.
struct Lease<'a, A, E> {
    slot: &'a Mutex<Option<BoxPull<A, E>>>,
    pull: Option<BoxPull<A, E>>,
}

impl<A, E> Drop for Lease<'_, A, E> {
    fn drop(&mut self) {
        if let Some(pull) = self.pull.take() {
            *self.slot.lock() = Some(pull);
        }
    }
}

impl<A, E> Upstream<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    /// Shares `pull` as an upstream.
    pub fn new(pull: BoxPull<A, E>) -> Self {
        Self {
            inner: Arc::new(UpstreamInner {
                gate: Semaphore::new(1),
                pull: Mutex::new(Some(pull)),
            }),
        }
    }

    /// An upstream that is already exhausted.
    #[must_use]
    pub fn halted() -> Self {
        Self::new(Box::new(HaltedPull))
    }

    /// An upstream whose first drive fails with `cause`.
    #[must_use]
    pub fn failed(cause: Cause<E>) -> Self {
        Self::new(Box::new(FailPull::new(cause)))
    }

    /// Drives the shared pull once.
    pub async fn pull(&self) -> PullResult<A, E> {
        let Ok(_permit) = self.inner.gate.acquire(1).await else {
            return halt_unit();
        };
        let mut lease = Lease {
            slot: &self.inner.pull,
            pull: self.inner.pull.lock().take(),
        };
        match lease.pull.as_mut() {
            Some(pull) => pull.pull().await,
            None => halt_unit(),
        }
    }
}

impl<A, E> Pull<A, E> for Upstream<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E>> {
        Box::pin(Upstream::pull(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use futures_lite::future::block_on;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn counter(limit: u32) -> BoxPull<u32, String> {
        let mut next = 0;
        pull_fn(move || {
            let current = next;
            next += 1;
            async move {
                if current < limit {
                    Ok(current)
                } else {
                    halt_unit()
                }
            }
        })
    }

    #[test]
    fn halt_is_distinct_from_failure() {
        init_test("halt_is_distinct_from_failure");
        let halted: PullError<String> = PullError::Halt(());
        let failed: PullError<String> = PullError::Err("boom".into());
        crate::assert_with_log!(is_halt(&halted), "halt detected", true, is_halt(&halted));
        crate::assert_with_log!(!is_halt(&failed), "err not halt", false, is_halt(&failed));
        assert_eq!(failed.clone().into_halt(), Err(Cause::Err("boom".to_string())));
        assert_eq!(halted.into_halt(), Ok(()));
        crate::test_complete!("halt_is_distinct_from_failure");
    }

    #[test]
    fn scope_exit_maps_halt_to_success() {
        init_test("scope_exit_maps_halt_to_success");
        let halted: PullError<String, u8> = PullError::Halt(3);
        assert_eq!(halted.scope_exit(), Outcome::Ok(()));
        let failed: PullError<String, u8> = PullError::Err("x".into());
        assert_eq!(failed.scope_exit(), Outcome::Err(()));
        let cancelled: PullError<String, u8> = PullError::Cancelled(CancelReason::shutdown());
        assert!(cancelled.scope_exit().is_cancelled());
        crate::test_complete!("scope_exit_maps_halt_to_success");
    }

    #[test]
    fn catch_halt_passes_failures_through() {
        init_test("catch_halt_passes_failures_through");
        let caught = block_on(catch_halt(
            async { halt::<i32, String, u8>(7) },
            |l| async move { Ok(i32::from(l)) },
        ));
        assert_eq!(caught, Ok(7));

        let failed = block_on(catch_halt(
            async { Err::<i32, _>(PullError::<String, u8>::Err("bad".into())) },
            |_| async { Ok(0) },
        ));
        assert_eq!(failed, Err(Cause::Err("bad".to_string())));
        crate::test_complete!("catch_halt_passes_failures_through");
    }

    #[test]
    fn match_pull_is_total() {
        init_test("match_pull_is_total");
        let describe = |r: PullResult<i32, String, &'static str>| {
            block_on(match_pull(
                async move { r },
                |v| async move { format!("value {v}") },
                |c| async move { format!("failure {c}") },
                |l| async move { format!("halt {l}") },
            ))
        };
        assert_eq!(describe(Ok(1)), "value 1");
        assert_eq!(describe(Err(PullError::Err("e".into()))), "failure e");
        assert_eq!(describe(halt("rest")), "halt rest");
        crate::test_complete!("match_pull_is_total");
    }

    #[test]
    fn pull_fn_is_fused() {
        init_test("pull_fn_is_fused");
        let mut calls = 0u32;
        let mut pull = PullFn::new(move || {
            calls += 1;
            let n = calls;
            async move {
                if n == 1 {
                    halt::<u32, String, u32>(n)
                } else {
                    Ok(n)
                }
            }
        });
        let first = block_on(pull.pull());
        let second = block_on(pull.pull());
        assert_eq!(first, Err(PullError::Halt(1)));
        assert_eq!(second, Err(PullError::Halt(1)));
        crate::test_complete!("pull_fn_is_fused");
    }

    #[test]
    fn upstream_clones_share_elements() {
        init_test("upstream_clones_share_elements");
        let upstream = Upstream::new(counter(3));
        let other = upstream.clone();
        let a = block_on(upstream.pull());
        let b = block_on(other.pull());
        let c = block_on(upstream.pull());
        let d = block_on(other.pull());
        assert_eq!((a, b, c), (Ok(0), Ok(1), Ok(2)));
        crate::assert_with_log!(
            d.as_ref().is_err_and(PullError::is_halt),
            "exhausted",
            true,
            d.is_err()
        );
        crate::test_complete!("upstream_clones_share_elements");
    }

    #[test]
    fn failed_upstream_fails_once_then_halts() {
        init_test("failed_upstream_fails_once_then_halts");
        let upstream: Upstream<u8, String> = Upstream::failed(Cause::Err("broken".into()));
        assert_eq!(block_on(upstream.pull()), Err(PullError::Err("broken".into())));
        assert_eq!(block_on(upstream.pull()), Err(PullError::Halt(())));
        let halted: Upstream<u8, String> = Upstream::halted();
        assert!(block_on(halted.pull()).is_err_and(|e| e.is_halt()));
        crate::test_complete!("failed_upstream_fails_once_then_halts");
    }

    #[test]
    fn dropped_drive_returns_pull_to_upstream() {
        init_test("dropped_drive_returns_pull_to_upstream");
        let never: BoxPull<u8, String> = pull_fn(|| std::future::pending());
        let upstream = Upstream::new(never);
        {
            let mut fut = Box::pin(upstream.pull());
            let polled = block_on(futures_lite::future::poll_once(&mut fut));
            assert!(polled.is_none());
        }
        let present = upstream.inner.pull.lock().is_some();
        crate::assert_with_log!(present, "pull restored", true, present);
        crate::test_complete!("dropped_drive_returns_pull_to_upstream");
    }
}
