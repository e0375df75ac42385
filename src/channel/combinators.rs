//! Element-wise and wiring combinators.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use super::bracket::bracket;
use super::{AnyChannel, Channel, TransformResult};
use crate::pull::{BoxFuture, BoxPull, Pull, PullResult, Upstream};
use crate::scope::Scope;
use crate::types::Cause;

/// See [`ChannelExt::map`](super::ChannelExt::map).
pub struct Map<C, F> {
    channel: C,
    f: Arc<F>,
}

impl<C, F> Map<C, F> {
    pub(crate) fn new(channel: C, f: F) -> Self {
        Self {
            channel,
            f: Arc::new(f),
        }
    }
}

impl<C: AnyChannel, F: Send + Sync + 'static> AnyChannel for Map<C, F> {}

struct MapPull<A, E, F> {
    pull: BoxPull<A, E>,
    f: Arc<F>,
}

impl<A, B, E, F> Pull<B, E> for MapPull<A, E, F>
where
    F: Fn(A) -> B + Send + Sync,
    A: Send + 'static,
    B: Send + 'static,
    E: Send + 'static,
{
    fn pull(&mut self) -> BoxFuture<'_, PullResult<B, E>> {
        Box::pin(async move {
            let value = self.pull.pull().await?;
            Ok((self.f)(value))
        })
    }
}

impl<In, InErr, C, F, B> Channel<In, InErr> for Map<C, F>
where
    In: Send + 'static,
    InErr: Send + 'static,
    C: Channel<In, InErr>,
    F: Fn(C::Out) -> B + Send + Sync + 'static,
    B: Send + 'static,
{
    type Out = B;
    type OutErr = C::OutErr;

    fn transform<'a>(
        &'a self,
        upstream: Upstream<In, InErr>,
        scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<B, C::OutErr>> {
        Box::pin(async move {
            let pull = self.channel.transform(upstream, scope).await?;
            let mapped: Box<dyn Pull<B, C::OutErr>> = Box::new(MapPull {
                pull,
                f: Arc::clone(&self.f),
            });
            Ok(mapped)
        })
    }
}

/// See [`ChannelExt::map_err`](super::ChannelExt::map_err).
pub struct MapErr<C, F> {
    channel: C,
    f: Arc<F>,
}

impl<C, F> MapErr<C, F> {
    pub(crate) fn new(channel: C, f: F) -> Self {
        Self {
            channel,
            f: Arc::new(f),
        }
    }
}

impl<C: AnyChannel, F: Send + Sync + 'static> AnyChannel for MapErr<C, F> {}

struct MapErrPull<A, E, F> {
    pull: BoxPull<A, E>,
    f: Arc<F>,
}

impl<A, E, E2, F> Pull<A, E2> for MapErrPull<A, E, F>
where
    F: Fn(E) -> E2 + Send + Sync,
    A: Send + 'static,
    E: Send + 'static,
    E2: Send + 'static,
{
    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E2>> {
        Box::pin(async move {
            let f = &self.f;
            self.pull.pull().await.map_err(|err| err.map_err(|e| f(e)))
        })
    }
}

impl<In, InErr, C, F, E2> Channel<In, InErr> for MapErr<C, F>
where
    In: Send + 'static,
    InErr: Send + 'static,
    C: Channel<In, InErr>,
    F: Fn(C::OutErr) -> E2 + Send + Sync + 'static,
    E2: Send + 'static,
{
    type Out = C::Out;
    type OutErr = E2;

    fn transform<'a>(
        &'a self,
        upstream: Upstream<In, InErr>,
        scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<C::Out, E2>> {
        Box::pin(async move {
            let pull = match self.channel.transform(upstream, scope).await {
                Ok(pull) => pull,
                Err(cause) => return Err(cause.map_err(|e| (self.f)(e))),
            };
            let mapped: Box<dyn Pull<C::Out, E2>> = Box::new(MapErrPull {
                pull,
                f: Arc::clone(&self.f),
            });
            Ok(mapped)
        })
    }
}

/// See [`ChannelExt::pipe_to`](super::ChannelExt::pipe_to).
pub struct PipeTo<C, D> {
    left: C,
    right: D,
}

impl<C, D> PipeTo<C, D> {
    pub(crate) fn new(left: C, right: D) -> Self {
        Self { left, right }
    }
}

impl<C: AnyChannel, D: AnyChannel> AnyChannel for PipeTo<C, D> {}

impl<In, InErr, C, D> Channel<In, InErr> for PipeTo<C, D>
where
    In: Send + 'static,
    InErr: Send + 'static,
    C: Channel<In, InErr>,
    D: Channel<C::Out, C::OutErr>,
    D::OutErr: From<C::OutErr>,
{
    type Out = D::Out;
    type OutErr = D::OutErr;

    fn transform<'a>(
        &'a self,
        upstream: Upstream<In, InErr>,
        scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<D::Out, D::OutErr>> {
        Box::pin(async move {
            let middle = self
                .left
                .transform(upstream, scope)
                .await
                .map_err(|cause| cause.map_err(<D::OutErr as From<C::OutErr>>::from))?;
            self.right.transform(Upstream::new(middle), scope).await
        })
    }
}

/// See [`embed_input`].
pub struct EmbedInput<C, F> {
    channel: C,
    input: F,
}

/// Runs `input` on a fiber with the real upstream while `channel` runs
/// against an exhausted one. Typically `input` forwards upstream elements
/// into a mailbox that `channel` drains.
///
/// The fiber lives in a scope forked for the run and is interrupted when
/// `channel` finishes.
pub fn embed_input<C, F>(channel: C, input: F) -> EmbedInput<C, F> {
    EmbedInput { channel, input }
}

impl<C: AnyChannel, F: Send + Sync + 'static> AnyChannel for EmbedInput<C, F> {}

impl<In, InErr, C, F, Fut> Channel<In, InErr> for EmbedInput<C, F>
where
    In: Send + 'static,
    InErr: Send + 'static,
    C: Channel<(), Infallible>,
    F: Fn(Upstream<In, InErr>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    type Out = C::Out;
    type OutErr = C::OutErr;

    fn transform<'a>(
        &'a self,
        upstream: Upstream<In, InErr>,
        scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<C::Out, C::OutErr>> {
        Box::pin(async move {
            let forked = scope.fork();
            if let Err(err) = forked.fork_fiber((self.input)(upstream)) {
                let cause = Cause::from(err);
                forked.close(cause.erase()).await;
                return Err(cause);
            }
            match self.channel.transform(Upstream::halted(), &forked).await {
                Ok(pull) => Ok(bracket(pull, forked)),
                Err(cause) => {
                    forked.close(cause.erase()).await;
                    Err(cause)
                }
            }
        })
    }
}
