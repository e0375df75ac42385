//! Sequential flattening.

use std::sync::Arc;

use super::{AnyChannel, Channel, TransformResult};
use crate::pull::{BoxFuture, BoxPull, Pull, PullError, PullResult, Upstream};
use crate::scope::Scope;

/// See [`ChannelExt::flat_map`](super::ChannelExt::flat_map).
///
/// Children share the run's upstream and scope. Wrap a child in
/// [`acquire_use_release`](super::acquire_use_release) to give it its own
/// sub-scope that closes as soon as the child halts.
pub struct FlatMap<C, F> {
    channel: C,
    f: Arc<F>,
}

impl<C, F> FlatMap<C, F> {
    pub(crate) fn new(channel: C, f: F) -> Self {
        Self {
            channel,
            f: Arc::new(f),
        }
    }
}

impl<C: AnyChannel, F: Send + Sync + 'static> AnyChannel for FlatMap<C, F> {}

/// Drives the active child until it halts, then pulls the parent for the
/// next one.
struct FlatMapPull<P, B, E, In, InErr, F> {
    parent: BoxPull<P, E>,
    child: Option<BoxPull<B, E>>,
    f: Arc<F>,
    upstream: Upstream<In, InErr>,
    scope: Scope,
}

impl<P, B, E, In, InErr, F, D> Pull<B, E> for FlatMapPull<P, B, E, In, InErr, F>
where
    P: Send + 'static,
    B: Send + 'static,
    E: Send + 'static,
    In: Send + 'static,
    InErr: Send + 'static,
    F: Fn(P) -> D + Send + Sync,
    D: Channel<In, InErr, Out = B, OutErr = E>,
{
    fn pull(&mut self) -> BoxFuture<'_, PullResult<B, E>> {
        Box::pin(async move {
            loop {
                if let Some(child) = self.child.as_mut() {
                    match child.pull().await {
                        Ok(value) => return Ok(value),
                        Err(PullError::Halt(())) => {
                            tracing::trace!(scope = %self.scope.id(), "flat_map child halted");
                            self.child = None;
                            continue;
                        }
                        Err(err) => return Err(err),
                    }
                }
                let element = self.parent.pull().await?;
                let channel = (self.f)(element);
                let pull = channel.transform(self.upstream.clone(), &self.scope).await?;
                self.child = Some(pull);
            }
        })
    }
}

impl<In, InErr, C, F, D> Channel<In, InErr> for FlatMap<C, F>
where
    In: Send + 'static,
    InErr: Send + 'static,
    C: Channel<In, InErr>,
    F: Fn(C::Out) -> D + Send + Sync + 'static,
    D: Channel<In, InErr, OutErr = C::OutErr>,
{
    type Out = D::Out;
    type OutErr = C::OutErr;

    fn transform<'a>(
        &'a self,
        upstream: Upstream<In, InErr>,
        scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<D::Out, C::OutErr>> {
        Box::pin(async move {
            let parent = self.channel.transform(upstream.clone(), scope).await?;
            let pull: Box<dyn Pull<D::Out, C::OutErr>> = Box::new(FlatMapPull {
                parent,
                child: None,
                f: Arc::clone(&self.f),
                upstream,
                scope: scope.clone(),
            });
            Ok(pull)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{acquire_use_release, from_effect, from_iterable, ChannelExt};
    use crate::types::Cause;
    use futures_lite::future::block_on;
    use parking_lot::Mutex;
    use std::convert::Infallible;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn children_run_in_order() {
        init_test("children_run_in_order");
        let channel = from_iterable::<_, Infallible>(vec![1_usize, 2, 3])
            .flat_map(|n: usize| from_iterable::<_, Infallible>(vec![n; n]));
        assert_eq!(
            block_on(channel.run_collect()),
            Ok(vec![1, 2, 2, 3, 3, 3])
        );
        crate::test_complete!("children_run_in_order");
    }

    #[test]
    fn empty_children_are_skipped() {
        init_test("empty_children_are_skipped");
        let channel = from_iterable::<_, Infallible>(vec![0_usize, 2, 0])
            .flat_map(|n: usize| from_iterable::<_, Infallible>(vec!['x'; n]));
        assert_eq!(block_on(channel.run_collect()), Ok(vec!['x', 'x']));
        crate::test_complete!("empty_children_are_skipped");
    }

    #[test]
    fn child_failure_stops_the_run() {
        init_test("child_failure_stops_the_run");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let channel = from_iterable::<_, String>(vec![1, 2, 3]).flat_map(|x: i32| {
            from_effect(move || async move {
                if x == 2 {
                    Err(Cause::Err(format!("bad {x}")))
                } else {
                    Ok(x)
                }
            })
        });
        let result = block_on(channel.run_for_each(move |x| {
            sink.lock().push(x);
            std::future::ready(Ok(()))
        }));
        crate::assert_cause_err!(result, "bad 2".to_string());
        assert_eq!(*seen.lock(), vec![1]);
        crate::test_complete!("child_failure_stops_the_run");
    }

    #[test]
    fn bracketed_children_release_before_next() {
        init_test("bracketed_children_release_before_next");
        let log = Arc::new(Mutex::new(Vec::new()));
        let outer = Arc::clone(&log);
        let channel = from_iterable::<_, Infallible>(vec![1, 2]).flat_map(move |x: i32| {
            let acquire_log = Arc::clone(&outer);
            let release_log = Arc::clone(&outer);
            acquire_use_release(
                move || {
                    acquire_log.lock().push(format!("acquire {x}"));
                    async move { Ok::<_, Cause<Infallible>>(x) }
                },
                |r: i32| from_iterable::<_, Infallible>(vec![r * 10]),
                move |r, _exit| {
                    let log = Arc::clone(&release_log);
                    async move { log.lock().push(format!("release {r}")) }
                },
            )
        });
        assert_eq!(block_on(channel.run_collect()), Ok(vec![10, 20]));
        assert_eq!(
            *log.lock(),
            vec!["acquire 1", "release 1", "acquire 2", "release 2"]
        );
        crate::test_complete!("bracketed_children_release_before_next");
    }
}
