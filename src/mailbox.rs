//! Backpressured multi-producer multi-consumer mailbox.
//!
//! A [`Mailbox`] buffers items between producers and consumers with one of
//! three overflow strategies, and terminates in one of three ways:
//!
//! - [`Mailbox::end`]: stop accepting offers; buffered items stay deliverable
//! - [`Mailbox::fail`] / [`Mailbox::done`]: like `end`, but once drained the
//!   consumer observes the failure
//! - [`Mailbox::shutdown`]: discard everything and wake every waiter now
//!
//! # State machine
//!
//! ```text
//!   Open ──end/fail/done──▶ Closing(exit) ──buffer drained──▶ Done(exit)
//!     │                                                          ▲
//!     └──────────────────────── shutdown ────────────────────────┘
//! ```
//!
//! Offers that were suspended before termination still count as offered:
//! they drain through the buffer ahead of the terminal exit.
//!
//! # Capacity
//!
//! With the [`Strategy::Suspend`] strategy a capacity of zero is a
//! rendezvous: an offer parks until a taker removes its item directly.
//! The non-suspending strategies treat capacity zero as one.
//!
//! # Cancel Safety
//!
//! Every future returned here is cancel-safe. Dropping a pending take or
//! await removes its waiter; dropping a suspended offer withdraws the items
//! that were not yet delivered.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::pull::{halt_unit, PullError, PullResult};
use crate::types::{CancelReason, Cause, Outcome};

/// What happens to an offer when the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// The offering fiber waits for free capacity.
    #[default]
    Suspend,
    /// Items past capacity are rejected and handed back.
    Dropping,
    /// The oldest buffered items are evicted to make room.
    Sliding,
}

/// Options for [`Mailbox::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MailboxOptions {
    /// Maximum buffered items; `None` is unbounded.
    pub capacity: Option<usize>,
    /// Overflow strategy.
    pub strategy: Strategy,
}

type Wakers = SmallVec<[Waker; 4]>;

fn wake_all(wakers: Wakers) {
    for waker in wakers {
        waker.wake();
    }
}

#[derive(Debug, Default)]
struct WaitList {
    entries: Vec<(u64, Waker)>,
}

impl WaitList {
    fn register(&mut self, id: u64, waker: &Waker) {
        if let Some((_, existing)) = self.entries.iter_mut().find(|(i, _)| *i == id) {
            if !existing.will_wake(waker) {
                *existing = waker.clone();
            }
        } else {
            self.entries.push((id, waker.clone()));
        }
    }

    fn remove(&mut self, id: u64) {
        self.entries.retain(|(i, _)| *i != id);
    }

    fn drain_into(&mut self, wakers: &mut Wakers) {
        wakers.extend(self.entries.drain(..).map(|(_, w)| w));
    }
}

#[derive(Debug, Clone, Copy)]
enum List {
    Takers,
    Done,
}

struct PendingOffer<A> {
    id: u64,
    items: VecDeque<A>,
    waker: Option<Waker>,
}

#[derive(Debug, Clone)]
enum Status<E> {
    Open,
    Closing(Outcome<(), E>),
    Done(Outcome<(), E>),
}

/// Result of submitting an offer.
enum Submitted<A> {
    /// The offer is complete; these items were rejected.
    Complete(Vec<A>),
    /// Part of the offer is parked under this id.
    Parked(u64),
}

struct State<A, E> {
    capacity: usize,
    strategy: Strategy,
    buffer: VecDeque<A>,
    offers: VecDeque<PendingOffer<A>>,
    /// Completed parked offers awaiting pickup, with their rejected items.
    completed: HashMap<u64, Vec<A>>,
    status: Status<E>,
    takers: WaitList,
    done_waiters: WaitList,
    next_id: u64,
}

fn exit_failure<E: Clone>(exit: &Outcome<(), E>) -> Option<Cause<E>> {
    exit.clone().into_result().err()
}

impl<A, E> State<A, E> {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn list_mut(&mut self, list: List) -> &mut WaitList {
        match list {
            List::Takers => &mut self.takers,
            List::Done => &mut self.done_waiters,
        }
    }

    fn free_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.buffer.len())
    }

    fn submit(&mut self, items: Vec<A>, wakers: &mut Wakers) -> Submitted<A> {
        if !matches!(self.status, Status::Open) {
            return Submitted::Complete(items);
        }
        if items.is_empty() {
            return Submitted::Complete(items);
        }

        match self.strategy {
            Strategy::Sliding => {
                self.buffer.extend(items);
                let excess = self.buffer.len().saturating_sub(self.capacity);
                self.buffer.drain(..excess).for_each(drop);
                self.takers.drain_into(wakers);
                Submitted::Complete(Vec::new())
            }
            Strategy::Dropping => {
                let mut items = items;
                let accepted = self.free_capacity().min(items.len());
                let rejected = items.split_off(accepted);
                if accepted > 0 {
                    self.buffer.extend(items);
                    self.takers.drain_into(wakers);
                }
                Submitted::Complete(rejected)
            }
            Strategy::Suspend => {
                let mut items: VecDeque<A> = items.into();
                if self.offers.is_empty() {
                    let accepted = self.free_capacity().min(items.len());
                    self.buffer.extend(items.drain(..accepted));
                }
                // Either items were buffered or a rendezvous partner appeared.
                self.takers.drain_into(wakers);
                if items.is_empty() {
                    return Submitted::Complete(Vec::new());
                }
                let id = self.next_id();
                self.offers.push_back(PendingOffer {
                    id,
                    items,
                    waker: None,
                });
                Submitted::Parked(id)
            }
        }
    }

    fn complete_front_offer(&mut self, wakers: &mut Wakers) {
        if let Some(offer) = self.offers.pop_front() {
            self.completed.insert(offer.id, Vec::new());
            wakers.extend(offer.waker);
        }
    }

    /// Takes up to `max` items: from the buffer, or straight from parked
    /// offers when the mailbox is a rendezvous.
    fn take_available(&mut self, max: usize, wakers: &mut Wakers) -> Vec<A> {
        let n = max.min(self.buffer.len());
        let mut out: Vec<A> = self.buffer.drain(..n).collect();
        if out.is_empty() && self.capacity == 0 {
            // Rendezvous pairs one parked item per take.
            if let Some(front) = self.offers.front_mut() {
                out.extend(front.items.pop_front());
                if front.items.is_empty() {
                    self.complete_front_offer(wakers);
                }
            }
        }
        out
    }

    /// Moves parked offers into freed capacity and finalizes a drained
    /// closing mailbox. Returns true if the mailbox is done successfully.
    fn release_capacity(&mut self, wakers: &mut Wakers) -> bool {
        if let Status::Done(exit) = &self.status {
            return exit.is_ok();
        }

        let mut moved = false;
        while self.free_capacity() > 0 {
            let Some(front) = self.offers.front_mut() else {
                break;
            };
            let n = self.capacity.saturating_sub(self.buffer.len()).min(front.items.len());
            self.buffer.extend(front.items.drain(..n));
            moved |= n > 0;
            if front.items.is_empty() {
                self.complete_front_offer(wakers);
            } else {
                break;
            }
        }
        if moved {
            self.takers.drain_into(wakers);
        }

        let drained = self.buffer.is_empty() && self.offers.is_empty();
        if drained && matches!(self.status, Status::Closing(_)) {
            if let Status::Closing(exit) = std::mem::replace(&mut self.status, Status::Open) {
                let ok = exit.is_ok();
                self.finalize(exit, wakers);
                return ok;
            }
        }
        false
    }

    fn finalize(&mut self, exit: Outcome<(), E>, wakers: &mut Wakers) {
        tracing::trace!(severity = exit.severity(), "mailbox done");
        self.status = Status::Done(exit);
        self.takers.drain_into(wakers);
        self.done_waiters.drain_into(wakers);
    }
}

struct Inner<A, E> {
    state: Mutex<State<A, E>>,
}

/// A bounded or unbounded concurrent buffer with termination signalling.
///
/// Cloning a mailbox produces another handle to the same buffer.
pub struct Mailbox<A, E = Infallible> {
    inner: Arc<Inner<A, E>>,
}

impl<A, E> Clone for Mailbox<A, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, E> fmt::Debug for Mailbox<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        let status = match state.status {
            Status::Open => "open",
            Status::Closing(_) => "closing",
            Status::Done(_) => "done",
        };
        f.debug_struct("Mailbox")
            .field("status", &status)
            .field("buffered", &state.buffer.len())
            .field("parked_offers", &state.offers.len())
            .field("capacity", &state.capacity)
            .field("strategy", &state.strategy)
            .finish()
    }
}

impl<A, E> Mailbox<A, E> {
    /// Creates a mailbox with the given options.
    #[must_use]
    pub fn new(options: MailboxOptions) -> Self {
        let capacity = match (options.capacity, options.strategy) {
            (None, _) => usize::MAX,
            (Some(n), Strategy::Suspend) => n,
            (Some(n), _) => n.max(1),
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    capacity,
                    strategy: options.strategy,
                    buffer: VecDeque::new(),
                    offers: VecDeque::new(),
                    completed: HashMap::new(),
                    status: Status::Open,
                    takers: WaitList::default(),
                    done_waiters: WaitList::default(),
                    next_id: 0,
                }),
            }),
        }
    }

    /// Creates an unbounded mailbox.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(MailboxOptions::default())
    }

    /// Creates a bounded mailbox whose offers suspend when full.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self::with_strategy(capacity, Strategy::Suspend)
    }

    /// Creates a bounded mailbox with the given overflow strategy.
    #[must_use]
    pub fn with_strategy(capacity: usize, strategy: Strategy) -> Self {
        Self::new(MailboxOptions {
            capacity: Some(capacity),
            strategy,
        })
    }

    /// Returns the capacity, or `None` if unbounded.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        let cap = self.inner.state.lock().capacity;
        (cap != usize::MAX).then_some(cap)
    }

    /// Returns the overflow strategy.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.inner.state.lock().strategy
    }

    /// Returns true while offers are accepted.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.inner.state.lock().status, Status::Open)
    }

    /// Returns true once the mailbox is drained and terminated.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self.inner.state.lock().status, Status::Done(_))
    }

    /// Returns the number of buffered items, or `None` once done.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        let state = self.inner.state.lock();
        match state.status {
            Status::Done(_) => None,
            _ => Some(state.buffer.len()),
        }
    }

    /// Offers a batch of items, returning those that were not accepted.
    ///
    /// With [`Strategy::Suspend`] the future waits until every item is
    /// buffered (or handed to a taker), or until the mailbox terminates, in
    /// which case the undelivered items are returned.
    pub fn offer_all<I>(&self, items: I) -> OfferAll<'_, A, E>
    where
        I: IntoIterator<Item = A>,
    {
        OfferAll {
            inner: &self.inner,
            items: Some(items.into_iter().collect()),
            id: None,
        }
    }

    /// Offers one item. Resolves to `false` if it was not accepted.
    pub async fn offer(&self, item: A) -> bool {
        self.offer_all([item]).await.is_empty()
    }

    /// Offers items without ever suspending; returns the rejected ones.
    ///
    /// Under [`Strategy::Suspend`], items that do not fit are rejected
    /// instead of parked.
    pub fn try_offer_all<I>(&self, items: I) -> Vec<A>
    where
        I: IntoIterator<Item = A>,
    {
        let mut items: Vec<A> = items.into_iter().collect();
        let mut wakers = Wakers::new();
        let rejected = {
            let mut state = self.inner.state.lock();
            match state.strategy {
                Strategy::Suspend => {
                    if !matches!(state.status, Status::Open) || !state.offers.is_empty() {
                        items
                    } else {
                        let accepted = state.free_capacity().min(items.len());
                        let rejected = items.split_off(accepted);
                        if accepted > 0 {
                            state.buffer.extend(items);
                            state.takers.drain_into(&mut wakers);
                        }
                        rejected
                    }
                }
                _ => match state.submit(items, &mut wakers) {
                    Submitted::Complete(rejected) => rejected,
                    Submitted::Parked(_) => Vec::new(),
                },
            }
        };
        wake_all(wakers);
        rejected
    }

    /// Offers one item without suspending.
    pub fn try_offer(&self, item: A) -> bool {
        self.try_offer_all([item]).is_empty()
    }

    /// Terminates with `exit` once buffered items drain.
    ///
    /// Returns `false` if the mailbox was already terminating.
    pub fn done(&self, exit: Outcome<(), E>) -> bool {
        let mut wakers = Wakers::new();
        let changed = {
            let mut state = self.inner.state.lock();
            if matches!(state.status, Status::Open) {
                tracing::trace!(severity = exit.severity(), "mailbox closing");
                if state.buffer.is_empty() && state.offers.is_empty() {
                    state.finalize(exit, &mut wakers);
                } else {
                    state.status = Status::Closing(exit);
                }
                true
            } else {
                false
            }
        };
        wake_all(wakers);
        changed
    }

    /// Ends gracefully once buffered items drain.
    pub fn end(&self) -> bool {
        self.done(Outcome::Ok(()))
    }

    /// Fails with `error` once buffered items drain.
    pub fn fail(&self, error: E) -> bool {
        self.done(Outcome::Err(error))
    }

    /// Fails with an arbitrary cause once buffered items drain.
    pub fn fail_cause(&self, cause: Cause<E>) -> bool {
        self.done(cause.into_outcome())
    }

    /// Discards the buffer, rejects parked offers, and wakes every waiter.
    ///
    /// Idempotent. Returns `true` only for the call that shut it down.
    pub fn shutdown(&self) -> bool {
        let mut wakers = Wakers::new();
        let (changed, discarded) = {
            let mut state = self.inner.state.lock();
            if matches!(state.status, Status::Done(_)) {
                (false, VecDeque::new())
            } else {
                let discarded = std::mem::take(&mut state.buffer);
                while let Some(offer) = state.offers.pop_front() {
                    state.completed.insert(offer.id, offer.items.into());
                    wakers.extend(offer.waker);
                }
                state.finalize(Outcome::Cancelled(CancelReason::shutdown()), &mut wakers);
                (true, discarded)
            }
        };
        wake_all(wakers);
        if changed {
            tracing::debug!(discarded = discarded.len(), "mailbox shut down");
        }
        drop(discarded);
        changed
    }

    /// Removes and returns every buffered item.
    pub fn clear(&self) -> Vec<A> {
        let mut wakers = Wakers::new();
        let cleared = {
            let mut state = self.inner.state.lock();
            let cleared: Vec<A> = state.buffer.drain(..).collect();
            state.release_capacity(&mut wakers);
            cleared
        };
        wake_all(wakers);
        cleared
    }

    fn wait<R, F>(&self, list: List, attempt: F) -> Wait<'_, A, E, F>
    where
        F: FnMut(&mut State<A, E>, &mut Wakers) -> Option<R> + Unpin,
    {
        Wait {
            inner: &self.inner,
            list,
            id: None,
            attempt,
        }
    }
}

impl<A, E: Clone> Mailbox<A, E> {
    /// Takes one item, waiting while the mailbox is open and empty.
    ///
    /// Halts after a graceful end; raises the failure after `fail`/`done`;
    /// raises `Cancelled(shutdown)` after `shutdown`.
    pub async fn take(&self) -> PullResult<A, E> {
        self.wait(List::Takers, |state, wakers| {
            if let Some(item) = state.take_available(1, wakers).pop() {
                state.release_capacity(wakers);
                return Some(Ok(item));
            }
            match &state.status {
                Status::Done(exit) => Some(match exit_failure(exit) {
                    None => halt_unit(),
                    Some(cause) => Err(PullError::from(cause)),
                }),
                _ => None,
            }
        })
        .await
    }

    /// Takes every buffered item, waiting while open and empty.
    ///
    /// Returns the items and whether the mailbox has now finished
    /// successfully. After a failure, buffered items are delivered first and
    /// the failure is returned by the following call.
    pub async fn take_all(&self) -> Result<(Vec<A>, bool), Cause<E>> {
        self.take_n(usize::MAX).await
    }

    /// Like [`take_all`](Self::take_all) but takes at most `n` items.
    pub async fn take_n(&self, n: usize) -> Result<(Vec<A>, bool), Cause<E>> {
        let max = n.max(1);
        self.wait(List::Takers, move |state, wakers| {
            if let Status::Done(exit) = &state.status {
                return Some(match exit_failure(exit) {
                    None => Ok((Vec::new(), true)),
                    Some(cause) => Err(cause),
                });
            }
            let items = state.take_available(max, wakers);
            if items.is_empty() {
                return None;
            }
            let done = state.release_capacity(wakers);
            Some(Ok((items, done)))
        })
        .await
    }

    /// Waits until the mailbox is drained and terminated, returning its exit.
    pub async fn await_done(&self) -> Outcome<(), E> {
        self.wait(List::Done, |state, _| match &state.status {
            Status::Done(exit) => Some(exit.clone()),
            _ => None,
        })
        .await
    }
}

/// Future that retries `attempt` under the lock until it yields a value.
struct Wait<'a, A, E, F> {
    inner: &'a Inner<A, E>,
    list: List,
    id: Option<u64>,
    attempt: F,
}

impl<A, E, R, F> Future for Wait<'_, A, E, F>
where
    F: FnMut(&mut State<A, E>, &mut Wakers) -> Option<R> + Unpin,
{
    type Output = R;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<R> {
        let this = self.get_mut();
        let mut wakers = Wakers::new();
        let result = {
            let mut state = this.inner.state.lock();
            match (this.attempt)(&mut state, &mut wakers) {
                Some(value) => {
                    if let Some(id) = this.id.take() {
                        state.list_mut(this.list).remove(id);
                    }
                    Some(value)
                }
                None => {
                    let id = match this.id {
                        Some(id) => id,
                        None => {
                            let id = state.next_id();
                            this.id = Some(id);
                            id
                        }
                    };
                    state.list_mut(this.list).register(id, cx.waker());
                    None
                }
            }
        };
        wake_all(wakers);
        result.map_or(Poll::Pending, Poll::Ready)
    }
}

impl<A, E, F> Drop for Wait<'_, A, E, F> {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.inner.state.lock().list_mut(self.list).remove(id);
        }
    }
}

/// Future returned by [`Mailbox::offer_all`]; resolves to the rejected items.
#[must_use = "futures do nothing unless polled"]
pub struct OfferAll<'a, A, E> {
    inner: &'a Inner<A, E>,
    items: Option<Vec<A>>,
    id: Option<u64>,
}

impl<A, E> fmt::Debug for OfferAll<'_, A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfferAll")
            .field("submitted", &self.items.is_none())
            .field("parked", &self.id.is_some())
            .finish()
    }
}

// Items are only moved in and out by value; nothing is structurally pinned.
impl<A, E> Unpin for OfferAll<'_, A, E> {}

impl<A, E> Future for OfferAll<'_, A, E> {
    type Output = Vec<A>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Vec<A>> {
        let this = self.get_mut();
        let mut wakers = Wakers::new();
        let result = {
            let mut state = this.inner.state.lock();
            if let Some(items) = this.items.take() {
                match state.submit(items, &mut wakers) {
                    Submitted::Complete(rejected) => Some(rejected),
                    Submitted::Parked(id) => {
                        this.id = Some(id);
                        if let Some(offer) = state.offers.iter_mut().find(|o| o.id == id) {
                            offer.waker = Some(cx.waker().clone());
                        }
                        None
                    }
                }
            } else if let Some(id) = this.id {
                if let Some(rejected) = state.completed.remove(&id) {
                    this.id = None;
                    Some(rejected)
                } else {
                    if let Some(offer) = state.offers.iter_mut().find(|o| o.id == id) {
                        let stale = offer.waker.as_ref().map_or(true, |w| !w.will_wake(cx.waker()));
                        if stale {
                            offer.waker = Some(cx.waker().clone());
                        }
                    }
                    None
                }
            } else {
                Some(Vec::new())
            }
        };
        wake_all(wakers);
        result.map_or(Poll::Pending, Poll::Ready)
    }
}

impl<A, E> Drop for OfferAll<'_, A, E> {
    fn drop(&mut self) {
        let Some(id) = self.id else {
            return;
        };
        let mut wakers = Wakers::new();
        let withdrawn = {
            let mut state = self.inner.state.lock();
            let withdrawn = state
                .offers
                .iter()
                .position(|o| o.id == id)
                .and_then(|pos| state.offers.remove(pos));
            state.completed.remove(&id);
            state.release_capacity(&mut wakers);
            withdrawn
        };
        wake_all(wakers);
        drop(withdrawn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use futures_lite::future::{block_on, poll_once};
    use std::pin::pin;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn suspend_parks_overflow_until_taken() {
        init_test("suspend_parks_overflow_until_taken");
        let mb: Mailbox<i32> = Mailbox::bounded(2);
        let mut offer = mb.offer_all([1, 2, 3, 4]);
        let first = block_on(poll_once(&mut offer));
        crate::assert_with_log!(first.is_none(), "producer suspended", true, first.is_none());
        assert_eq!(mb.size(), Some(2));

        let batch = block_on(mb.take_all()).expect("take_all");
        assert_eq!(batch, (vec![1, 2], false));
        assert_eq!(mb.size(), Some(2));

        let rejected = block_on(poll_once(&mut offer)).expect("offer complete");
        crate::assert_with_log!(rejected.is_empty(), "all accepted", true, rejected.is_empty());
        let batch = block_on(mb.take_all()).expect("take_all");
        assert_eq!(batch, (vec![3, 4], false));
        crate::test_complete!("suspend_parks_overflow_until_taken");
    }

    #[test]
    fn dropping_rejects_overflow() {
        init_test("dropping_rejects_overflow");
        let mb: Mailbox<i32> = Mailbox::with_strategy(2, Strategy::Dropping);
        let rejected = block_on(mb.offer_all([1, 2, 3, 4]));
        assert_eq!(rejected, vec![3, 4]);
        assert_eq!(block_on(mb.take_all()), Ok((vec![1, 2], false)));
        crate::test_complete!("dropping_rejects_overflow");
    }

    #[test]
    fn sliding_evicts_oldest() {
        init_test("sliding_evicts_oldest");
        let mb: Mailbox<i32> = Mailbox::with_strategy(2, Strategy::Sliding);
        let rejected = block_on(mb.offer_all([1, 2, 3, 4]));
        crate::assert_with_log!(rejected.is_empty(), "nothing rejected", true, rejected.is_empty());
        assert!(block_on(mb.offer(5)));
        assert_eq!(block_on(mb.take_all()), Ok((vec![4, 5], false)));
        crate::test_complete!("sliding_evicts_oldest");
    }

    #[test]
    fn non_suspend_capacity_clamped() {
        init_test("non_suspend_capacity_clamped");
        let mb: Mailbox<u8> = Mailbox::with_strategy(0, Strategy::Dropping);
        assert_eq!(mb.capacity(), Some(1));
        assert_eq!(mb.try_offer_all([1, 2]), vec![2]);
        crate::test_complete!("non_suspend_capacity_clamped");
    }

    #[test]
    fn fail_preserves_buffered_and_parked_items() {
        init_test("fail_preserves_buffered_and_parked_items");
        let mb: Mailbox<i32, String> = Mailbox::bounded(2);
        let mut batch = mb.offer_all([1, 2, 3, 4]);
        assert!(block_on(poll_once(&mut batch)).is_none());
        let mut single = pin!(mb.offer(5));
        assert!(block_on(poll_once(single.as_mut())).is_none());

        assert!(mb.fail("boom".to_string()));
        crate::assert_with_log!(!mb.is_open(), "closing", false, mb.is_open());

        assert_eq!(block_on(mb.take_all()), Ok((vec![1, 2], false)));
        assert_eq!(block_on(mb.take_all()), Ok((vec![3, 4], false)));
        assert_eq!(block_on(mb.take_all()), Ok((vec![5], false)));
        assert_eq!(block_on(mb.take_all()), Err(Cause::Err("boom".to_string())));
        assert_eq!(block_on(mb.await_done()), Outcome::Err("boom".to_string()));

        assert_eq!(block_on(poll_once(&mut batch)), Some(Vec::new()));
        assert_eq!(block_on(poll_once(single.as_mut())), Some(true));
        crate::test_complete!("fail_preserves_buffered_and_parked_items");
    }

    #[test]
    fn end_then_take_halts() {
        init_test("end_then_take_halts");
        let mb: Mailbox<i32> = Mailbox::unbounded();
        assert!(mb.try_offer(1));
        assert!(mb.end());
        assert!(!mb.end(), "second end is a no-op");
        assert!(!mb.try_offer(2), "offers rejected after end");
        assert_eq!(block_on(mb.take()), Ok(1));
        let next = block_on(mb.take());
        crate::assert_with_log!(
            matches!(next, Err(PullError::Halt(()))),
            "halt after drain",
            true,
            matches!(next, Err(PullError::Halt(())))
        );
        assert_eq!(block_on(mb.take_all()), Ok((Vec::new(), true)));
        assert_eq!(mb.size(), None);
        crate::test_complete!("end_then_take_halts");
    }

    #[test]
    fn take_all_reports_done_when_drained_after_end() {
        init_test("take_all_reports_done_when_drained_after_end");
        let mb: Mailbox<i32> = Mailbox::unbounded();
        assert!(mb.try_offer_all([1, 2]).is_empty());
        mb.end();
        assert_eq!(block_on(mb.take_all()), Ok((vec![1, 2], true)));
        crate::test_complete!("take_all_reports_done_when_drained_after_end");
    }

    #[test]
    fn take_n_limits_batch() {
        init_test("take_n_limits_batch");
        let mb: Mailbox<i32> = Mailbox::unbounded();
        mb.try_offer_all(1..=5);
        assert_eq!(block_on(mb.take_n(2)), Ok((vec![1, 2], false)));
        assert_eq!(block_on(mb.take_n(10)), Ok((vec![3, 4, 5], false)));
        crate::test_complete!("take_n_limits_batch");
    }

    #[test]
    fn rendezvous_pairs_offer_with_take() {
        init_test("rendezvous_pairs_offer_with_take");
        let mb: Mailbox<i32> = Mailbox::bounded(0);
        let mut take = pin!(mb.take());
        assert!(block_on(poll_once(take.as_mut())).is_none(), "take waits");

        let mut offer = pin!(mb.offer(1));
        assert!(block_on(poll_once(offer.as_mut())).is_none(), "offer waits for taker");
        assert_eq!(mb.size(), Some(0));

        assert_eq!(block_on(poll_once(take.as_mut())), Some(Ok(1)));
        assert_eq!(block_on(poll_once(offer.as_mut())), Some(true));
        crate::test_complete!("rendezvous_pairs_offer_with_take");
    }

    #[test]
    fn shutdown_is_idempotent_and_rejects() {
        init_test("shutdown_is_idempotent_and_rejects");
        let mb: Mailbox<i32> = Mailbox::bounded(1);
        let mut offer = mb.offer_all([1, 2, 3]);
        assert!(block_on(poll_once(&mut offer)).is_none());

        assert!(mb.shutdown());
        assert!(!mb.shutdown());
        assert_eq!(block_on(poll_once(&mut offer)), Some(vec![2, 3]));
        assert!(!block_on(mb.offer(9)));
        assert_eq!(mb.size(), None);

        let taken = block_on(mb.take());
        let cancelled = matches!(taken, Err(PullError::Cancelled(ref r)) if r.is_shutdown());
        crate::assert_with_log!(cancelled, "take sees shutdown", true, cancelled);
        crate::test_complete!("shutdown_is_idempotent_and_rejects");
    }

    #[test]
    fn dropped_offer_withdraws_items() {
        init_test("dropped_offer_withdraws_items");
        let mb: Mailbox<i32> = Mailbox::bounded(1);
        {
            let mut offer = mb.offer_all([1, 2, 3]);
            assert!(block_on(poll_once(&mut offer)).is_none());
        }
        mb.end();
        assert_eq!(block_on(mb.take_all()), Ok((vec![1], true)));
        crate::test_complete!("dropped_offer_withdraws_items");
    }

    #[test]
    fn dropped_take_deregisters() {
        init_test("dropped_take_deregisters");
        let mb: Mailbox<i32> = Mailbox::unbounded();
        {
            let mut take = pin!(mb.take());
            assert!(block_on(poll_once(take.as_mut())).is_none());
            assert_eq!(mb.inner.state.lock().takers.entries.len(), 1);
        }
        let waiting = mb.inner.state.lock().takers.entries.len();
        crate::assert_with_log!(waiting == 0, "waiter removed", 0usize, waiting);
        crate::test_complete!("dropped_take_deregisters");
    }

    #[test]
    fn clear_frees_capacity_for_parked_offer() {
        init_test("clear_frees_capacity_for_parked_offer");
        let mb: Mailbox<i32> = Mailbox::bounded(1);
        let mut offer = mb.offer_all([1, 2]);
        assert!(block_on(poll_once(&mut offer)).is_none());
        assert_eq!(mb.clear(), vec![1]);
        assert_eq!(block_on(poll_once(&mut offer)), Some(Vec::new()));
        assert_eq!(mb.size(), Some(1));
        crate::test_complete!("clear_frees_capacity_for_parked_offer");
    }

    #[test]
    fn cross_thread_backpressure() {
        init_test("cross_thread_backpressure");
        let mb: Mailbox<u32> = Mailbox::bounded(2);
        let producer = {
            let mb = mb.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    assert!(block_on(mb.offer(i)));
                }
                mb.end();
            })
        };
        let mut seen = Vec::new();
        loop {
            let (items, done) = block_on(mb.take_all()).expect("no failure");
            assert!(items.len() <= 2 || done);
            seen.extend(items);
            if done || mb.is_done() {
                break;
            }
        }
        producer.join().expect("producer");
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
        crate::test_complete!("cross_thread_backpressure");
    }

    #[test]
    fn offers_items_that_are_not_unpin() {
        init_test("offers_items_that_are_not_unpin");
        use std::marker::PhantomPinned;
        let mb: Mailbox<(u8, PhantomPinned)> = Mailbox::bounded(1);
        let mut offer = mb.offer_all([(1, PhantomPinned), (2, PhantomPinned)]);
        assert!(block_on(poll_once(&mut offer)).is_none());
        let first = block_on(mb.take()).expect("first item");
        assert_eq!(first.0, 1);
        assert!(block_on(poll_once(&mut offer)).is_some_and(|rejected| rejected.is_empty()));
        let second = block_on(mb.take()).expect("second item");
        assert_eq!(second.0, 2);
        crate::test_complete!("offers_items_that_are_not_unpin");
    }
}
