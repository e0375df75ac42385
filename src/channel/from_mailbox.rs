//! Channels that drain a [`Mailbox`].

use std::collections::VecDeque;

use super::{AnyChannel, Channel, TransformResult};
use crate::mailbox::Mailbox;
use crate::pull::{halt_unit, BoxFuture, Pull, PullResult, Upstream};
use crate::scope::Scope;
use crate::types::Cause;

/// Pulls single elements from a mailbox, taking whole batches at a time.
pub(crate) struct MailboxPull<A, E> {
    mailbox: Mailbox<A, E>,
    buffer: VecDeque<A>,
    done: bool,
}

impl<A, E: Clone> MailboxPull<A, E> {
    pub(crate) fn new(mailbox: Mailbox<A, E>) -> Self {
        Self {
            mailbox,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    async fn refill(&mut self) -> Result<(), Cause<E>> {
        let (items, done) = self.mailbox.take_all().await?;
        self.buffer.extend(items);
        self.done = done;
        Ok(())
    }
}

impl<A, E> Pull<A, E> for MailboxPull<A, E>
where
    A: Send + 'static,
    E: Clone + Send + 'static,
{
    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E>> {
        Box::pin(async move {
            loop {
                if let Some(item) = self.buffer.pop_front() {
                    return Ok(item);
                }
                if self.done {
                    return halt_unit();
                }
                self.refill().await?;
            }
        })
    }
}

/// Pulls whole batches from a mailbox.
struct MailboxChunkPull<A, E> {
    mailbox: Mailbox<A, E>,
    done: bool,
}

impl<A, E> Pull<Vec<A>, E> for MailboxChunkPull<A, E>
where
    A: Send + 'static,
    E: Clone + Send + 'static,
{
    fn pull(&mut self) -> BoxFuture<'_, PullResult<Vec<A>, E>> {
        Box::pin(async move {
            if self.done {
                return halt_unit();
            }
            let (items, done) = self.mailbox.take_all().await?;
            self.done = done;
            if items.is_empty() {
                halt_unit()
            } else {
                Ok(items)
            }
        })
    }
}

/// See [`from_mailbox`].
#[derive(Debug)]
pub struct FromMailbox<A, E> {
    mailbox: Mailbox<A, E>,
}

/// Emits what is offered to `mailbox` until it is ended or fails.
///
/// Every run drains the same mailbox.
pub fn from_mailbox<A, E>(mailbox: Mailbox<A, E>) -> FromMailbox<A, E> {
    FromMailbox { mailbox }
}

impl<A: Send + 'static, E: Send + 'static> AnyChannel for FromMailbox<A, E> {}

impl<In, InErr, A, E> Channel<In, InErr> for FromMailbox<A, E>
where
    A: Send + 'static,
    E: Clone + Send + 'static,
{
    type Out = A;
    type OutErr = E;

    fn transform<'a>(
        &'a self,
        _upstream: Upstream<In, InErr>,
        _scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<A, E>> {
        let pull: Box<dyn Pull<A, E>> = Box::new(MailboxPull::new(self.mailbox.clone()));
        Box::pin(std::future::ready(Ok(pull)))
    }
}

/// See [`from_mailbox_chunk`].
#[derive(Debug)]
pub struct FromMailboxChunk<A, E> {
    mailbox: Mailbox<A, E>,
}

/// Emits each batch available in `mailbox` as one `Vec`.
pub fn from_mailbox_chunk<A, E>(mailbox: Mailbox<A, E>) -> FromMailboxChunk<A, E> {
    FromMailboxChunk { mailbox }
}

impl<A: Send + 'static, E: Send + 'static> AnyChannel for FromMailboxChunk<A, E> {}

impl<In, InErr, A, E> Channel<In, InErr> for FromMailboxChunk<A, E>
where
    A: Send + 'static,
    E: Clone + Send + 'static,
{
    type Out = Vec<A>;
    type OutErr = E;

    fn transform<'a>(
        &'a self,
        _upstream: Upstream<In, InErr>,
        _scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<Vec<A>, E>> {
        let pull: Box<dyn Pull<Vec<A>, E>> = Box::new(MailboxChunkPull {
            mailbox: self.mailbox.clone(),
            done: false,
        });
        Box::pin(std::future::ready(Ok(pull)))
    }
}
