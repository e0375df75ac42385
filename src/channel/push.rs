//! Push-based sources.
//!
//! [`async_push`] bridges callback-style producers into a pull-based channel.
//! The producer runs on a fiber in a scope forked from the run's scope and
//! pushes through an [`Emit`] handle into a private mailbox. The consumer
//! pulls from the mailbox. When the channel halts, fails, or is abandoned,
//! the forked scope closes: the producer fiber is interrupted and the
//! mailbox is shut down, so late emits are rejected instead of piling up.

use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_lite::FutureExt;

use super::bracket::bracket;
use super::from_mailbox::MailboxPull;
use super::{AnyChannel, Channel, TransformResult};
use crate::mailbox::{Mailbox, Strategy};
use crate::pull::{BoxFuture, Upstream};
use crate::scope::Scope;
use crate::types::{Cause, Outcome, PanicPayload};

/// Options for [`async_push_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AsyncPushOptions {
    /// Mailbox capacity. `None` uses the runtime's default buffer size.
    pub buffer_size: Option<usize>,
    /// What happens when the producer outruns the consumer.
    pub strategy: Strategy,
}

/// The producer's handle to an [`async_push`] channel.
///
/// Cheap to clone; callbacks registered by the producer may keep clones.
pub struct Emit<A, E> {
    mailbox: Mailbox<A, E>,
    scope: Scope,
}

impl<A, E> Clone for Emit<A, E> {
    fn clone(&self) -> Self {
        Self {
            mailbox: self.mailbox.clone(),
            scope: self.scope.clone(),
        }
    }
}

impl<A, E> std::fmt::Debug for Emit<A, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emit")
            .field("scope", &self.scope.id())
            .field("open", &self.mailbox.is_open())
            .finish()
    }
}

impl<A, E> Emit<A, E> {
    /// Pushes one element without waiting. Returns false if it was
    /// rejected: the buffer is full under `Suspend`, or the channel is done.
    pub fn single(&self, item: A) -> bool {
        self.mailbox.try_offer(item)
    }

    /// Pushes elements without waiting, returning the rejected ones.
    pub fn chunk<I>(&self, items: I) -> Vec<A>
    where
        I: IntoIterator<Item = A>,
    {
        self.mailbox.try_offer_all(items)
    }

    /// Pushes one element, waiting for space under `Suspend`.
    pub async fn offer(&self, item: A) -> bool {
        self.mailbox.offer(item).await
    }

    /// Pushes elements, waiting for space under `Suspend`. Returns the
    /// rejected ones.
    pub async fn offer_all<I>(&self, items: I) -> Vec<A>
    where
        I: IntoIterator<Item = A>,
    {
        self.mailbox.offer_all(items).await
    }

    /// Fails the channel after the buffered elements are consumed.
    pub fn fail(&self, error: E) -> bool {
        self.mailbox.fail(error)
    }

    /// Fails the channel with `cause`.
    pub fn fail_cause(&self, cause: Cause<E>) -> bool {
        self.mailbox.fail_cause(cause)
    }

    /// Fails the channel with a defect.
    pub fn die(&self, message: impl Into<String>) -> bool {
        self.mailbox.fail_cause(Cause::die(message))
    }

    /// Ends the channel after the buffered elements are consumed.
    pub fn end(&self) -> bool {
        self.mailbox.end()
    }

    /// Terminates the channel with `exit`.
    pub fn done(&self, exit: Outcome<(), E>) -> bool {
        self.mailbox.done(exit)
    }

    /// Returns true while elements are still accepted.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.mailbox.is_open()
    }

    /// The producer's scope. Finalizers added here run when the channel
    /// finishes, which is where producers unregister their callbacks.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

/// See [`async_push`].
pub struct AsyncPush<F, A, E> {
    producer: Arc<F>,
    options: AsyncPushOptions,
    _marker: PhantomData<fn() -> (A, E)>,
}

/// Builds a channel fed by `producer` with default options.
///
/// The producer must call [`Emit::end`] (or fail) to finish the channel.
/// Returning from `producer` does not end it, so callbacks registered by the
/// producer keep emitting. A producer that returns an error or panics fails
/// the channel.
pub fn async_push<F, Fut, A, E>(producer: F) -> AsyncPush<F, A, E>
where
    F: Fn(Emit<A, E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Cause<E>>> + Send + 'static,
{
    async_push_with(producer, AsyncPushOptions::default())
}

/// Like [`async_push`] with explicit buffering.
pub fn async_push_with<F, Fut, A, E>(
    producer: F,
    options: AsyncPushOptions,
) -> AsyncPush<F, A, E>
where
    F: Fn(Emit<A, E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Cause<E>>> + Send + 'static,
{
    AsyncPush {
        producer: Arc::new(producer),
        options,
        _marker: PhantomData,
    }
}

impl<F: Send + Sync + 'static, A: 'static, E: 'static> AnyChannel for AsyncPush<F, A, E> {}

impl<In, InErr, F, Fut, A, E> Channel<In, InErr> for AsyncPush<F, A, E>
where
    F: Fn(Emit<A, E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Cause<E>>> + Send + 'static,
    A: Send + 'static,
    E: Clone + Send + 'static,
{
    type Out = A;
    type OutErr = E;

    fn transform<'a>(
        &'a self,
        _upstream: Upstream<In, InErr>,
        scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<A, E>> {
        Box::pin(async move {
            let forked = scope.fork();
            let capacity = self
                .options
                .buffer_size
                .unwrap_or(forked.runtime().config().default_buffer_size);
            let mailbox = Mailbox::with_strategy(capacity, self.options.strategy);

            let closing = mailbox.clone();
            forked.add_finalizer_sync(move |_| {
                closing.shutdown();
            });

            let emit = Emit {
                mailbox: mailbox.clone(),
                scope: forked.clone(),
            };
            let producer = Arc::clone(&self.producer);
            let failures = mailbox.clone();
            let spawned = forked.fork_fiber(async move {
                let outcome = AssertUnwindSafe(async move { producer(emit).await })
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(cause)) => {
                        tracing::debug!("push producer failed");
                        failures.fail_cause(cause);
                    }
                    Err(payload) => {
                        let payload = PanicPayload::from_panic(payload);
                        tracing::warn!(%payload, "push producer panicked");
                        failures.fail_cause(Cause::Panicked(payload));
                    }
                }
            });

            if let Err(err) = spawned {
                let cause = Cause::from(err);
                forked.close(cause.erase()).await;
                return Err(cause);
            }
            tracing::trace!(scope = %forked.id(), capacity, "push channel started");
            Ok(bracket(Box::new(MailboxPull::new(mailbox)), forked))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelExt;
    use futures_lite::future::block_on;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn producer_emits_then_ends() {
        init_test("producer_emits_then_ends");
        let channel = async_push(|emit: Emit<u32, String>| async move {
            for i in 0..5 {
                emit.offer(i).await;
            }
            emit.end();
            Ok(())
        });
        assert_eq!(block_on(channel.run_collect()), Ok(vec![0, 1, 2, 3, 4]));
        crate::test_complete!("producer_emits_then_ends");
    }

    #[test]
    fn producer_error_fails_channel() {
        init_test("producer_error_fails_channel");
        let channel = async_push(|emit: Emit<u32, String>| async move {
            emit.offer(1).await;
            Err(Cause::Err("producer broke".to_string()))
        });
        let result = block_on(channel.run_collect());
        crate::assert_cause_err!(result, "producer broke".to_string());
        crate::test_complete!("producer_error_fails_channel");
    }

    #[test]
    fn producer_panic_is_defect() {
        init_test("producer_panic_is_defect");
        let channel = async_push(|_emit: Emit<u32, String>| async move {
            if true {
                panic!("producer bug");
            }
            Ok(())
        });
        crate::assert_cause_panicked!(block_on(channel.run_collect()));
        crate::test_complete!("producer_panic_is_defect");
    }

    #[test]
    fn background_callbacks_keep_emitting() {
        init_test("background_callbacks_keep_emitting");
        let channel = async_push(|emit: Emit<u32, String>| async move {
            let background = emit.clone();
            std::thread::spawn(move || {
                for i in 0..3 {
                    while !background.single(i) {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
                background.end();
            });
            Ok(())
        });
        assert_eq!(block_on(channel.run_collect()), Ok(vec![0, 1, 2]));
        crate::test_complete!("background_callbacks_keep_emitting");
    }

    #[test]
    fn finishing_shuts_down_producer() {
        init_test("finishing_shuts_down_producer");
        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&interrupted);
        let channel = async_push_with(
            move |emit: Emit<u32, String>| {
                let flag = Arc::clone(&flag);
                async move {
                    struct Flag(Arc<AtomicBool>);
                    impl Drop for Flag {
                        fn drop(&mut self) {
                            self.0.store(true, Ordering::SeqCst);
                        }
                    }
                    let _flag = Flag(flag);
                    emit.offer(1).await;
                    emit.fail("stop".to_string());
                    futures_lite::future::pending::<()>().await;
                    Ok(())
                }
            },
            AsyncPushOptions {
                buffer_size: Some(1),
                strategy: Strategy::Suspend,
            },
        );
        let result = block_on(channel.run_collect());
        crate::assert_cause_err!(result, "stop".to_string());
        assert!(interrupted.load(Ordering::SeqCst));
        crate::test_complete!("finishing_shuts_down_producer");
    }

    #[test]
    fn sliding_keeps_latest() {
        init_test("sliding_keeps_latest");
        let channel = async_push_with(
            |emit: Emit<u32, String>| async move {
                emit.chunk(0..10);
                emit.end();
                Ok(())
            },
            AsyncPushOptions {
                buffer_size: Some(3),
                strategy: Strategy::Sliding,
            },
        );
        assert_eq!(block_on(channel.run_collect()), Ok(vec![7, 8, 9]));
        crate::test_complete!("sliding_keeps_latest");
    }
}
