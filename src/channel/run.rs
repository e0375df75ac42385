//! Runners: drive a channel to completion inside a fresh scope.
//!
//! Every runner opens a scope, allocates the channel's pull against an
//! exhausted upstream, drives it until it halts or fails, then closes the
//! scope with the run's exit. A run that panics reports the panic as a
//! defect. A run whose future is dropped midway closes its scope from a
//! background fiber.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_lite::FutureExt;

use super::Channel;
use crate::pull::{BoxPull, Upstream};
use crate::scope::{Scope, ScopeGuard};
use crate::types::{Cause, Outcome, PanicPayload};

async fn drain_into<C, S, F, Fut>(
    channel: &C,
    scope: &Scope,
    init: S,
    step: &mut F,
) -> Result<S, Cause<C::OutErr>>
where
    C: Channel,
    F: FnMut(S, C::Out) -> Fut,
    Fut: Future<Output = Result<S, Cause<C::OutErr>>>,
{
    let mut pull = channel.transform(Upstream::halted(), scope).await?;
    let mut state = init;
    loop {
        match pull.pull().await {
            Ok(value) => state = step(state, value).await?,
            Err(err) => {
                err.into_halt()?;
                return Ok(state);
            }
        }
    }
}

async fn drive<C, S, F, Fut>(channel: &C, init: S, mut step: F) -> Result<S, Cause<C::OutErr>>
where
    C: Channel,
    S: Send,
    F: FnMut(S, C::Out) -> Fut + Send,
    Fut: Future<Output = Result<S, Cause<C::OutErr>>> + Send,
{
    let scope = Scope::new();
    let guard = ScopeGuard::new(scope.clone());
    tracing::debug!(scope = %scope.id(), "run started");

    let result = AssertUnwindSafe(drain_into(channel, &scope, init, &mut step))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(Cause::Panicked(PanicPayload::from_panic(payload))));

    let exit = match &result {
        Ok(_) => Outcome::Ok(()),
        Err(cause) => cause.erase(),
    };
    guard.disarm();
    scope.close(exit).await;
    tracing::debug!(scope = %scope.id(), ok = result.is_ok(), "run finished");
    result
}

pub(super) async fn run_drain<C: Channel>(channel: &C) -> Result<(), Cause<C::OutErr>> {
    drive(channel, (), |(), _| std::future::ready(Ok(()))).await
}

pub(super) async fn run_for_each<C, F, Fut>(channel: &C, mut f: F) -> Result<(), Cause<C::OutErr>>
where
    C: Channel,
    F: FnMut(C::Out) -> Fut + Send,
    Fut: Future<Output = Result<(), Cause<C::OutErr>>> + Send,
{
    drive(channel, (), move |(), value| f(value)).await
}

pub(super) async fn run_collect<C: Channel>(channel: &C) -> Result<Vec<C::Out>, Cause<C::OutErr>> {
    drive(channel, Vec::new(), |mut out, value| {
        out.push(value);
        std::future::ready(Ok(out))
    })
    .await
}

pub(super) async fn run_fold<C, S, F>(channel: &C, init: S, mut f: F) -> Result<S, Cause<C::OutErr>>
where
    C: Channel,
    S: Send,
    F: FnMut(S, C::Out) -> S + Send,
{
    drive(channel, init, move |acc, value| std::future::ready(Ok(f(acc, value)))).await
}

pub(super) async fn to_pull<C: Channel>(
    channel: &C,
    scope: &Scope,
) -> Result<ChannelPull<C::Out, C::OutErr>, Cause<C::OutErr>> {
    let pull = channel.transform(Upstream::halted(), scope).await?;
    Ok(ChannelPull { pull })
}

/// A channel's pull handed to the caller for incremental consumption.
///
/// Halt is translated into `Ok(None)`; further calls keep returning
/// `Ok(None)`.
pub struct ChannelPull<A, E> {
    pull: BoxPull<A, E>,
}

impl<A, E> ChannelPull<A, E> {
    /// Pulls the next element. `Ok(None)` means the channel is exhausted.
    pub async fn next(&mut self) -> Result<Option<A>, Cause<E>> {
        match self.pull.pull().await {
            Ok(value) => Ok(Some(value)),
            Err(err) => err.into_halt().map(|()| None),
        }
    }

    /// Returns the underlying pull.
    #[must_use]
    pub fn into_inner(self) -> BoxPull<A, E> {
        self.pull
    }
}

impl<A, E> std::fmt::Debug for ChannelPull<A, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPull").finish_non_exhaustive()
    }
}
