//! Pulls tied to a forked scope, and scoped resources.

use std::future::Future;
use std::sync::Arc;

use super::{AnyChannel, Channel, TransformResult};
use crate::pull::{BoxFuture, BoxPull, Pull, PullResult, Upstream};
use crate::scope::{Scope, ScopeExit};
use crate::types::Cause;

/// Wraps a pull whose resources live in `scope`.
///
/// The first halt or failure closes the scope with the matching exit (a halt
/// closes it successfully). If the pull is abandoned instead, the scope
/// closes with its parent.
pub(crate) struct BracketPull<A, E> {
    pull: BoxPull<A, E>,
    scope: Scope,
    closed: bool,
}

impl<A, E> BracketPull<A, E> {
    pub(crate) fn new(pull: BoxPull<A, E>, scope: Scope) -> Self {
        Self {
            pull,
            scope,
            closed: false,
        }
    }
}

impl<A, E> Pull<A, E> for BracketPull<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E>> {
        Box::pin(async move {
            let result = self.pull.pull().await;
            if let Err(err) = &result {
                if !self.closed {
                    self.closed = true;
                    self.scope.close(err.scope_exit()).await;
                }
            }
            result
        })
    }
}

/// Boxes `pull` as a [`BracketPull`] over `scope`.
pub(crate) fn bracket<A, E>(pull: BoxPull<A, E>, scope: Scope) -> BoxPull<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    Box::new(BracketPull::new(pull, scope))
}

/// See [`acquire_use_release`].
pub struct AcquireUseRelease<Acq, U, Rel> {
    acquire: Acq,
    use_: U,
    release: Arc<Rel>,
}

/// Acquires a resource when the channel is allocated, runs the channel
/// `use_` builds from it, and releases it when that channel finishes.
///
/// `release` runs exactly once per successful acquisition and observes how
/// the channel ended: a halt is a success, a failure or interruption is
/// reported as such. If the consumer abandons the run, release happens
/// when the run's scope closes. A failed acquisition releases nothing.
pub fn acquire_use_release<Acq, AFut, R, E, U, Rel, RFut>(
    acquire: Acq,
    use_: U,
    release: Rel,
) -> AcquireUseRelease<Acq, U, Rel>
where
    Acq: Fn() -> AFut + Send + Sync + 'static,
    AFut: Future<Output = Result<R, Cause<E>>> + Send,
    Rel: Fn(R, ScopeExit) -> RFut + Send + Sync + 'static,
    RFut: Future<Output = ()> + Send + 'static,
{
    AcquireUseRelease {
        acquire,
        use_,
        release: Arc::new(release),
    }
}

impl<Acq, U, Rel> AnyChannel for AcquireUseRelease<Acq, U, Rel>
where
    Acq: Send + Sync + 'static,
    U: Send + Sync + 'static,
    Rel: Send + Sync + 'static,
{
}

impl<In, InErr, Acq, AFut, R, U, D, Rel, RFut> Channel<In, InErr> for AcquireUseRelease<Acq, U, Rel>
where
    In: Send + 'static,
    InErr: Send + 'static,
    Acq: Fn() -> AFut + Send + Sync + 'static,
    AFut: Future<Output = Result<R, Cause<D::OutErr>>> + Send,
    R: Clone + Send + 'static,
    U: Fn(R) -> D + Send + Sync + 'static,
    D: Channel<In, InErr>,
    Rel: Fn(R, ScopeExit) -> RFut + Send + Sync + 'static,
    RFut: Future<Output = ()> + Send + 'static,
{
    type Out = D::Out;
    type OutErr = D::OutErr;

    fn transform<'a>(
        &'a self,
        upstream: Upstream<In, InErr>,
        scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<D::Out, D::OutErr>> {
        Box::pin(async move {
            let resource = (self.acquire)().await?;
            let forked = scope.fork();
            let release = Arc::clone(&self.release);
            let held = resource.clone();
            forked
                .add_finalizer(move |exit| async move { release(held, exit).await })
                .await;

            let channel = (self.use_)(resource);
            match channel.transform(upstream, &forked).await {
                Ok(pull) => Ok(bracket(pull, forked)),
                Err(cause) => {
                    forked.close(cause.erase()).await;
                    Err(cause)
                }
            }
        })
    }
}
