//! Concurrent flattening of a channel of channels.
//!
//! A dispatcher fiber pulls child channels from the outer channel, one per
//! semaphore permit, and forks a fiber per child that drains it into a
//! shared bounded mailbox. A child releases its permit when it finishes.
//! The merged pull reads the mailbox.
//!
//! - The outer channel halting waits for every permit, then ends the
//!   mailbox.
//! - Any child failing fails the mailbox. Once the consumer reaches the
//!   failure the run's forked scope closes and interrupts the rest.
//! - A child halting only frees its permit.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_lite::FutureExt;

use super::bracket::bracket;
use super::from_mailbox::MailboxPull;
use super::{AnyChannel, Channel, TransformResult};
use crate::mailbox::Mailbox;
use crate::pull::{BoxFuture, BoxPull, Upstream};
use crate::scope::Scope;
use crate::sync::{OwnedSemaphorePermit, Semaphore};
use crate::types::{Cause, PanicPayload};

/// Options for [`ChannelExt::merge_all`](super::ChannelExt::merge_all).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeAllOptions {
    /// Maximum number of children running at once. `None` is unbounded.
    /// Zero is treated as one.
    pub concurrency: Option<usize>,
    /// Capacity of the shared mailbox. `None` uses the runtime's default
    /// buffer size.
    pub buffer_size: Option<usize>,
}

impl MergeAllOptions {
    /// Bounded concurrency with the default buffer.
    #[must_use]
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency: Some(concurrency),
            buffer_size: None,
        }
    }

    fn permits(&self) -> usize {
        self.concurrency.map_or(usize::MAX, |n| n.max(1))
    }
}

/// See [`ChannelExt::merge_all`](super::ChannelExt::merge_all).
pub struct MergeAll<C> {
    channels: C,
    options: MergeAllOptions,
}

impl<C> MergeAll<C> {
    pub(crate) fn new(channels: C, options: MergeAllOptions) -> Self {
        Self { channels, options }
    }
}

impl<C: AnyChannel> AnyChannel for MergeAll<C> {}

async fn drain_child<B, E>(
    mut pull: BoxPull<B, E>,
    mailbox: Mailbox<B, E>,
    permit: OwnedSemaphorePermit,
) where
    B: Send + 'static,
    E: Send + 'static,
{
    let sink = mailbox.clone();
    let drained = AssertUnwindSafe(async move {
        loop {
            match pull.pull().await {
                Ok(value) => {
                    if !sink.offer(value).await {
                        return Ok(());
                    }
                }
                Err(err) => return err.into_halt(),
            }
        }
    })
    .catch_unwind()
    .await;

    match drained {
        Ok(Ok(())) => {}
        Ok(Err(cause)) => {
            tracing::debug!("merge_all child failed");
            mailbox.fail_cause(cause);
        }
        Err(payload) => {
            let payload = PanicPayload::from_panic(payload);
            tracing::warn!(%payload, "merge_all child panicked");
            mailbox.fail_cause(Cause::Panicked(payload));
        }
    }
    drop(permit);
}

async fn dispatch<In, InErr, D, E>(
    mut outer: BoxPull<D, E>,
    upstream: Upstream<In, InErr>,
    scope: Scope,
    mailbox: Mailbox<D::Out, E>,
    permits: Arc<Semaphore>,
) -> Result<(), Cause<E>>
where
    In: Send + 'static,
    InErr: Send + 'static,
    D: Channel<In, InErr, OutErr = E>,
    E: Send + 'static,
{
    loop {
        let Ok(permit) = permits.acquire_owned(1).await else {
            return Ok(());
        };
        if !mailbox.is_open() {
            return Ok(());
        }
        let child = match outer.pull().await {
            Ok(child) => child,
            Err(err) => {
                drop(permit);
                err.into_halt()?;
                if let Ok(_all) = permits.acquire(permits.max_permits()).await {
                    tracing::trace!(scope = %scope.id(), "merge_all children finished");
                    mailbox.end();
                }
                return Ok(());
            }
        };
        let pull = child.transform(upstream.clone(), &scope).await?;
        scope.fork_fiber(drain_child(pull, mailbox.clone(), permit))?;
    }
}

impl<In, InErr, C> Channel<In, InErr> for MergeAll<C>
where
    In: Send + 'static,
    InErr: Send + 'static,
    C: Channel<In, InErr>,
    C::Out: Channel<In, InErr, OutErr = C::OutErr>,
    C::OutErr: Clone,
{
    type Out = <C::Out as Channel<In, InErr>>::Out;
    type OutErr = C::OutErr;

    fn transform<'a>(
        &'a self,
        upstream: Upstream<In, InErr>,
        scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<Self::Out, C::OutErr>> {
        Box::pin(async move {
            let forked = scope.fork();
            let capacity = self
                .options
                .buffer_size
                .unwrap_or(forked.runtime().config().default_buffer_size);
            let mailbox = Mailbox::bounded(capacity);
            let closing = mailbox.clone();
            forked.add_finalizer_sync(move |_| {
                closing.shutdown();
            });

            let outer = match self.channels.transform(upstream.clone(), &forked).await {
                Ok(pull) => pull,
                Err(cause) => {
                    forked.close(cause.erase()).await;
                    return Err(cause);
                }
            };

            let permits = Arc::new(Semaphore::new(self.options.permits()));
            let failures = mailbox.clone();
            let dispatcher = dispatch(outer, upstream, forked.clone(), mailbox.clone(), permits);
            let spawned = forked.fork_fiber(async move {
                match AssertUnwindSafe(dispatcher).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(cause)) => {
                        failures.fail_cause(cause);
                    }
                    Err(payload) => {
                        let payload = PanicPayload::from_panic(payload);
                        tracing::warn!(%payload, "merge_all dispatcher panicked");
                        failures.fail_cause(Cause::Panicked(payload));
                    }
                }
            });
            if let Err(err) = spawned {
                let cause = Cause::from(err);
                forked.close(cause.erase()).await;
                return Err(cause);
            }

            tracing::debug!(
                scope = %forked.id(),
                concurrency = ?self.options.concurrency,
                capacity,
                "merge_all started"
            );
            Ok(bracket(Box::new(MailboxPull::new(mailbox)), forked))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{from_effect, from_iterable, from_iterator, from_pull, ChannelExt};
    use crate::pull::{halt_unit, pull_fn};
    use futures_lite::future::block_on;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn merges_every_child() {
        init_test("merges_every_child");
        let channel = from_iterator::<_, _, Infallible>(|| {
            (0..3).map(|i| from_iterable::<_, Infallible>(vec![i * 10, i * 10 + 1]))
        })
        .merge_all(MergeAllOptions::with_concurrency(2));
        let mut out = block_on(channel.run_collect()).unwrap();
        let firsts: Vec<_> = out.iter().filter(|x| *x % 10 == 0).copied().collect();
        for first in firsts {
            let a = out.iter().position(|x| *x == first).unwrap();
            let b = out.iter().position(|x| *x == first + 1).unwrap();
            assert!(a < b, "child order kept");
        }
        out.sort_unstable();
        assert_eq!(out, vec![0, 1, 10, 11, 20, 21]);
        crate::test_complete!("merges_every_child");
    }

    #[test]
    fn concurrency_is_bounded() {
        init_test("concurrency_is_bounded");
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
        let channel = from_iterator::<_, _, Infallible>(move || {
            let (a, p) = (Arc::clone(&a), Arc::clone(&p));
            (0..6).map(move |i| {
                let (active, peak) = (Arc::clone(&a), Arc::clone(&p));
                from_pull(move |_scope: Scope| {
                    let (active, peak) = (Arc::clone(&active), Arc::clone(&peak));
                    async move {
                        let emitted = Arc::new(AtomicBool::new(false));
                        Ok::<_, Cause<Infallible>>(pull_fn(move || {
                            let first = !emitted.swap(true, Ordering::SeqCst);
                            let (active, peak) = (Arc::clone(&active), Arc::clone(&peak));
                            async move {
                                if !first {
                                    return halt_unit();
                                }
                                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                                peak.fetch_max(now, Ordering::SeqCst);
                                std::thread::sleep(Duration::from_millis(5));
                                active.fetch_sub(1, Ordering::SeqCst);
                                Ok(i)
                            }
                        }))
                    }
                })
            })
        })
        .merge_all(MergeAllOptions::with_concurrency(2));
        let out = block_on(channel.run_collect()).unwrap();
        assert_eq!(out.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        crate::test_complete!("concurrency_is_bounded");
    }

    #[test]
    fn child_failure_fails_merge() {
        init_test("child_failure_fails_merge");
        let channel = from_iterator::<_, _, &'static str>(|| {
            (0..4).map(|i| {
                from_effect(move || async move {
                    if i == 2 {
                        Err(Cause::Err("child 2"))
                    } else {
                        Ok(i)
                    }
                })
            })
        })
        .merge_all(MergeAllOptions::default());
        crate::assert_cause_err!(block_on(channel.run_collect()), "child 2");
        crate::test_complete!("child_failure_fails_merge");
    }

    #[test]
    fn no_children_ends_immediately() {
        init_test("no_children_ends_immediately");
        let channel = from_iterator::<_, _, Infallible>(|| {
            std::iter::empty::<crate::channel::Empty<u8, Infallible>>()
        })
        .merge_all(MergeAllOptions::default());
        assert_eq!(block_on(channel.run_collect()), Ok(Vec::new()));
        crate::test_complete!("no_children_ends_immediately");
    }
}
