//! Primitive channels.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use super::{AnyChannel, Channel, TransformResult};
use crate::pull::{halt_unit, BoxFuture, FailPull, HaltedPull, Pull, PullResult, Upstream};
use crate::scope::Scope;
use crate::types::Cause;

/// Channel built from a pull allocator. See [`from_pull`].
pub struct FromPull<F> {
    f: F,
}

/// Builds a channel whose pull is produced by `f`. The upstream is ignored.
pub fn from_pull<F, Fut, A, E>(f: F) -> FromPull<F>
where
    F: Fn(Scope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TransformResult<A, E>> + Send + 'static,
{
    FromPull { f }
}

impl<F: Send + Sync + 'static> AnyChannel for FromPull<F> {}

impl<In, InErr, F, Fut, A, E> Channel<In, InErr> for FromPull<F>
where
    F: Fn(Scope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TransformResult<A, E>> + Send + 'static,
    A: Send + 'static,
    E: Send + 'static,
{
    type Out = A;
    type OutErr = E;

    fn transform<'a>(
        &'a self,
        _upstream: Upstream<In, InErr>,
        scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<A, E>> {
        Box::pin((self.f)(scope.clone()))
    }
}

/// Channel built from a full transform function. See [`from_transform`].
pub struct FromTransform<F> {
    f: F,
}

/// Builds a channel from a function of the upstream and the run's scope.
pub fn from_transform<F, Fut, In, InErr, A, E>(f: F) -> FromTransform<F>
where
    F: Fn(Upstream<In, InErr>, Scope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TransformResult<A, E>> + Send + 'static,
{
    FromTransform { f }
}

impl<F: Send + Sync + 'static> AnyChannel for FromTransform<F> {}

impl<In, InErr, F, Fut, A, E> Channel<In, InErr> for FromTransform<F>
where
    F: Fn(Upstream<In, InErr>, Scope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TransformResult<A, E>> + Send + 'static,
    A: Send + 'static,
    E: Send + 'static,
{
    type Out = A;
    type OutErr = E;

    fn transform<'a>(
        &'a self,
        upstream: Upstream<In, InErr>,
        scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<A, E>> {
        Box::pin((self.f)(upstream, scope.clone()))
    }
}

/// Channel that passes its upstream through. See [`identity`].
pub struct Identity<A, E> {
    _marker: PhantomData<fn() -> (A, E)>,
}

/// Returns the channel whose pull is its upstream.
#[must_use]
pub fn identity<A, E>() -> Identity<A, E> {
    Identity {
        _marker: PhantomData,
    }
}

impl<A: 'static, E: 'static> AnyChannel for Identity<A, E> {}

impl<A, E> Channel<A, E> for Identity<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    type Out = A;
    type OutErr = E;

    fn transform<'a>(
        &'a self,
        upstream: Upstream<A, E>,
        _scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<A, E>> {
        Box::pin(async move { Ok(Box::new(upstream) as Box<dyn Pull<A, E>>) })
    }
}

/// Yields one element, then halts.
struct OncePull<A> {
    value: Option<A>,
}

impl<A: Send + 'static, E: Send + 'static> Pull<A, E> for OncePull<A> {
    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E>> {
        let result = self.value.take().map_or_else(halt_unit, Ok);
        Box::pin(std::future::ready(result))
    }
}

/// Channel emitting a single value. See [`succeed`].
pub struct Succeed<A, E> {
    value: A,
    _marker: PhantomData<fn() -> E>,
}

/// Emits `value` once, then halts.
pub fn succeed<A, E>(value: A) -> Succeed<A, E> {
    Succeed {
        value,
        _marker: PhantomData,
    }
}

impl<A: Send + Sync + 'static, E: 'static> AnyChannel for Succeed<A, E> {}

impl<In, InErr, A, E> Channel<In, InErr> for Succeed<A, E>
where
    A: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    type Out = A;
    type OutErr = E;

    fn transform<'a>(
        &'a self,
        _upstream: Upstream<In, InErr>,
        _scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<A, E>> {
        let pull: Box<dyn Pull<A, E>> = Box::new(OncePull {
            value: Some(self.value.clone()),
        });
        Box::pin(std::future::ready(Ok(pull)))
    }
}

/// Channel that halts immediately. See [`empty`].
pub struct Empty<A, E> {
    _marker: PhantomData<fn() -> (A, E)>,
}

/// Emits nothing.
#[must_use]
pub fn empty<A, E>() -> Empty<A, E> {
    Empty {
        _marker: PhantomData,
    }
}

impl<A: 'static, E: 'static> AnyChannel for Empty<A, E> {}

impl<In, InErr, A, E> Channel<In, InErr> for Empty<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    type Out = A;
    type OutErr = E;

    fn transform<'a>(
        &'a self,
        _upstream: Upstream<In, InErr>,
        _scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<A, E>> {
        let pull: Box<dyn Pull<A, E>> = Box::new(HaltedPull);
        Box::pin(std::future::ready(Ok(pull)))
    }
}

struct NeverPull;

impl<A: Send + 'static, E: Send + 'static> Pull<A, E> for NeverPull {
    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E>> {
        Box::pin(futures_lite::future::pending())
    }
}

/// Channel whose pull never completes. See [`never`].
pub struct Never<A, E> {
    _marker: PhantomData<fn() -> (A, E)>,
}

/// Never emits and never halts. Only interruption ends it.
#[must_use]
pub fn never<A, E>() -> Never<A, E> {
    Never {
        _marker: PhantomData,
    }
}

impl<A: 'static, E: 'static> AnyChannel for Never<A, E> {}

impl<In, InErr, A, E> Channel<In, InErr> for Never<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    type Out = A;
    type OutErr = E;

    fn transform<'a>(
        &'a self,
        _upstream: Upstream<In, InErr>,
        _scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<A, E>> {
        let pull: Box<dyn Pull<A, E>> = Box::new(NeverPull);
        Box::pin(std::future::ready(Ok(pull)))
    }
}

/// Channel that fails on its first pull. See [`fail`] and [`fail_cause`].
pub struct FailCause<A, E> {
    cause: Cause<E>,
    _marker: PhantomData<fn() -> A>,
}

/// Fails with the domain error `error`.
pub fn fail<A, E>(error: E) -> FailCause<A, E> {
    fail_cause(Cause::Err(error))
}

/// Fails with `cause`.
pub fn fail_cause<A, E>(cause: Cause<E>) -> FailCause<A, E> {
    FailCause {
        cause,
        _marker: PhantomData,
    }
}

impl<A: 'static, E: Send + Sync + 'static> AnyChannel for FailCause<A, E> {}

impl<In, InErr, A, E> Channel<In, InErr> for FailCause<A, E>
where
    A: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Out = A;
    type OutErr = E;

    fn transform<'a>(
        &'a self,
        _upstream: Upstream<In, InErr>,
        _scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<A, E>> {
        let pull: Box<dyn Pull<A, E>> = Box::new(FailPull::new(self.cause.clone()));
        Box::pin(std::future::ready(Ok(pull)))
    }
}

impl<A, E: fmt::Debug> fmt::Debug for FailCause<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailCause").field("cause", &self.cause).finish()
    }
}

/// Runs a deferred effect on the first pull.
struct EffectPull<A, E> {
    effect: Option<BoxFuture<'static, Result<A, Cause<E>>>>,
}

impl<A: Send + 'static, E: Send + 'static> Pull<A, E> for EffectPull<A, E> {
    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E>> {
        Box::pin(async move {
            match self.effect.take() {
                Some(effect) => effect.await.map_err(Into::into),
                None => halt_unit(),
            }
        })
    }
}

/// Channel emitting the result of an effect. See [`from_effect`].
pub struct FromEffect<F> {
    f: F,
}

/// Emits the value produced by `f`, or fails with its cause. The effect
/// runs on the first pull, once per run.
pub fn from_effect<F, Fut, A, E>(f: F) -> FromEffect<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<A, Cause<E>>> + Send + 'static,
{
    FromEffect { f }
}

impl<F: Send + Sync + 'static> AnyChannel for FromEffect<F> {}

impl<In, InErr, F, Fut, A, E> Channel<In, InErr> for FromEffect<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<A, Cause<E>>> + Send + 'static,
    A: Send + 'static,
    E: Send + 'static,
{
    type Out = A;
    type OutErr = E;

    fn transform<'a>(
        &'a self,
        _upstream: Upstream<In, InErr>,
        _scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<A, E>> {
        let pull: Box<dyn Pull<A, E>> = Box::new(EffectPull {
            effect: Some(Box::pin((self.f)())),
        });
        Box::pin(std::future::ready(Ok(pull)))
    }
}
