//! Counting semaphore with drop-released permits.
//!
//! A semaphore controls access to a finite number of resources through permits.
//! Permits are returned when the guard is dropped, or explicitly through
//! [`Semaphore::release`].
//!
//! # Cancel Safety
//!
//! Waiting for a permit is cancel-safe: dropping an [`AcquireFuture`] removes
//! its waiter entry and holds nothing.
//!
//! # Example
//!
//! ```
//! use flowcore::sync::Semaphore;
//!
//! let sem = Semaphore::new(10);
//! let permit = futures_lite::future::block_on(sem.acquire(1)).unwrap();
//! assert_eq!(sem.available_permits(), 9);
//! drop(permit);
//! assert_eq!(sem.available_permits(), 10);
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use smallvec::SmallVec;

/// Error returned when semaphore acquisition fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// The semaphore was closed.
    Closed,
}

impl std::fmt::Display for AcquireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "semaphore closed"),
        }
    }
}

impl std::error::Error for AcquireError {}

/// Error returned when trying to acquire more permits than available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryAcquireError;

impl std::fmt::Display for TryAcquireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no semaphore permits available")
    }
}

impl std::error::Error for TryAcquireError {}

/// A counting semaphore for limiting concurrent access.
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<SemaphoreState>,
    /// Maximum permits (initial count).
    max_permits: usize,
}

#[derive(Debug)]
struct SemaphoreState {
    permits: usize,
    closed: bool,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    waker: Waker,
}

type Wakers = SmallVec<[Waker; 4]>;

fn wake_all(wakers: Wakers) {
    for waker in wakers {
        waker.wake();
    }
}

impl SemaphoreState {
    fn remove_waiter(&mut self, waiter_id: u64) {
        self.waiters.retain(|waiter| waiter.id != waiter_id);
    }

    fn register(&mut self, waiter_id: u64, waker: &Waker) {
        if let Some(existing) = self.waiters.iter_mut().find(|w| w.id == waiter_id) {
            if !existing.waker.will_wake(waker) {
                existing.waker = waker.clone();
            }
        } else {
            self.waiters.push_back(Waiter {
                id: waiter_id,
                waker: waker.clone(),
            });
        }
    }

    fn take_wakers(&mut self) -> Wakers {
        self.waiters.iter().map(|w| w.waker.clone()).collect()
    }
}

impl Semaphore {
    /// Creates a new semaphore with the given number of permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(SemaphoreState {
                permits,
                closed: false,
                waiters: VecDeque::new(),
                next_waiter_id: 0,
            }),
            max_permits: permits,
        }
    }

    /// Returns the number of currently available permits.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.state.lock().permits
    }

    /// Returns the maximum number of permits (initial count).
    #[must_use]
    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    /// Returns true if the semaphore is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Closes the semaphore. Pending and future acquires fail with
    /// [`AcquireError::Closed`].
    pub fn close(&self) {
        let wakers = {
            let mut state = self.state.lock();
            state.closed = true;
            state.waiters.drain(..).map(|w| w.waker).collect::<Wakers>()
        };
        wake_all(wakers);
    }

    /// Acquires the given number of permits asynchronously.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero or exceeds the semaphore's initial capacity.
    pub fn acquire(&self, count: usize) -> AcquireFuture<'_> {
        assert!(count > 0, "cannot acquire 0 permits");
        assert!(
            count <= self.max_permits,
            "cannot acquire more permits than semaphore capacity"
        );
        AcquireFuture {
            semaphore: self,
            count,
            waiter_id: None,
        }
    }

    /// Acquires permits that keep the semaphore alive through an `Arc`.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero or exceeds the semaphore's initial capacity.
    pub fn acquire_owned(self: &Arc<Self>, count: usize) -> OwnedAcquireFuture {
        assert!(count > 0, "cannot acquire 0 permits");
        assert!(
            count <= self.max_permits,
            "cannot acquire more permits than semaphore capacity"
        );
        OwnedAcquireFuture {
            semaphore: Arc::clone(self),
            count,
            waiter_id: None,
        }
    }

    /// Tries to acquire the given number of permits without waiting.
    pub fn try_acquire(&self, count: usize) -> Result<SemaphorePermit<'_>, TryAcquireError> {
        if count == 0 || count > self.max_permits {
            return Err(TryAcquireError);
        }

        let mut state = self.state.lock();
        if state.closed || !state.waiters.is_empty() || state.permits < count {
            return Err(TryAcquireError);
        }
        state.permits -= count;
        Ok(SemaphorePermit {
            semaphore: self,
            count,
        })
    }

    /// Returns permits to the semaphore and wakes waiters.
    pub fn release(&self, count: usize) {
        if count == 0 {
            return;
        }
        let wakers = {
            let mut state = self.state.lock();
            state.permits += count;
            state.take_wakers()
        };
        wake_all(wakers);
    }

    fn next_waiter_id(&self) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_waiter_id;
        state.next_waiter_id = state.next_waiter_id.wrapping_add(1);
        id
    }

    fn poll_acquire(
        &self,
        count: usize,
        waiter_id: &mut Option<u64>,
        context: &Context<'_>,
    ) -> Poll<Result<(), AcquireError>> {
        let id = *waiter_id.get_or_insert_with(|| self.next_waiter_id());
        let mut state = self.state.lock();

        if state.closed {
            state.remove_waiter(id);
            *waiter_id = None;
            return Poll::Ready(Err(AcquireError::Closed));
        }

        // Queue behind earlier waiters so a large request is not starved by
        // a stream of small ones.
        let first_in_line = state.waiters.front().map_or(true, |w| w.id == id);
        if first_in_line && state.permits >= count {
            state.permits -= count;
            state.remove_waiter(id);
            *waiter_id = None;
            // The next waiter is now at the front and may fit in what is left.
            let wakers = if state.permits > 0 {
                state.take_wakers()
            } else {
                Wakers::new()
            };
            drop(state);
            wake_all(wakers);
            return Poll::Ready(Ok(()));
        }

        state.register(id, context.waker());
        Poll::Pending
    }

    fn cancel_waiter(&self, waiter_id: u64) {
        // A departing head may have been the only thing holding others back.
        let wakers = {
            let mut state = self.state.lock();
            let was_front = state.waiters.front().is_some_and(|w| w.id == waiter_id);
            state.remove_waiter(waiter_id);
            if was_front {
                state.take_wakers()
            } else {
                Wakers::new()
            }
        };
        wake_all(wakers);
    }
}

/// Future returned by [`Semaphore::acquire`].
#[derive(Debug)]
pub struct AcquireFuture<'a> {
    semaphore: &'a Semaphore,
    count: usize,
    waiter_id: Option<u64>,
}

impl Drop for AcquireFuture<'_> {
    fn drop(&mut self) {
        if let Some(waiter_id) = self.waiter_id {
            self.semaphore.cancel_waiter(waiter_id);
        }
    }
}

impl<'a> Future for AcquireFuture<'a> {
    type Output = Result<SemaphorePermit<'a>, AcquireError>;

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match this
            .semaphore
            .poll_acquire(this.count, &mut this.waiter_id, context)
        {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(SemaphorePermit {
                semaphore: this.semaphore,
                count: this.count,
            })),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Future returned by [`Semaphore::acquire_owned`].
#[derive(Debug)]
pub struct OwnedAcquireFuture {
    semaphore: Arc<Semaphore>,
    count: usize,
    waiter_id: Option<u64>,
}

impl Drop for OwnedAcquireFuture {
    fn drop(&mut self) {
        if let Some(waiter_id) = self.waiter_id {
            self.semaphore.cancel_waiter(waiter_id);
        }
    }
}

impl Future for OwnedAcquireFuture {
    type Output = Result<OwnedSemaphorePermit, AcquireError>;

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match this
            .semaphore
            .poll_acquire(this.count, &mut this.waiter_id, context)
        {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(OwnedSemaphorePermit {
                semaphore: Arc::clone(&this.semaphore),
                count: this.count,
            })),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A permit from a semaphore.
#[must_use = "permit will be immediately released if not held"]
#[derive(Debug)]
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
    count: usize,
}

impl SemaphorePermit<'_> {
    /// Returns the number of permits held.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Forgets the permit without releasing it back to the semaphore.
    pub fn forget(self) {
        std::mem::forget(self);
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release(self.count);
    }
}

/// An owned permit from a semaphore.
#[derive(Debug)]
#[must_use = "permit will be immediately released if not held"]
pub struct OwnedSemaphorePermit {
    semaphore: Arc<Semaphore>,
    count: usize,
}

impl OwnedSemaphorePermit {
    /// Returns the number of permits held.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns the semaphore this permit belongs to.
    #[must_use]
    pub fn semaphore(&self) -> &Arc<Semaphore> {
        &self.semaphore
    }
}

impl Drop for OwnedSemaphorePermit {
    fn drop(&mut self) {
        self.semaphore.release(self.count);
    }
}
