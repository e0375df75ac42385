//! Channels: reusable, scope-aware pull transformers.
//!
//! A [`Channel`] is a recipe. Each run allocates a fresh pull by calling
//! [`Channel::transform`] with an upstream and the [`Scope`] that owns the
//! run's resources. The allocated pull yields elements, fails with a
//! [`Cause`], or halts.
//!
//! # Building blocks
//!
//! - **Constructors**: [`from_iterable`], [`from_mailbox`], [`async_push`],
//!   [`acquire_use_release`], [`succeed`], [`fail`], and friends
//! - **Combinators** on [`ChannelExt`]: `map`, `map_err`, `flat_map`,
//!   `pipe_to`, `embed_input`, `merge_all`
//! - **Runners** on [`ChannelExt`]: `run_drain`, `run_for_each`,
//!   `run_collect`, `run_fold`, and `to_pull` for incremental consumption
//!
//! # Example
//!
//! ```
//! use flowcore::channel::{from_iterable, ChannelExt};
//! use flowcore::types::Cause;
//! use std::convert::Infallible;
//!
//! let doubled = from_iterable::<_, Infallible>(vec![1, 2, 3]).map(|x| x * 2);
//! let out = futures_lite::future::block_on(doubled.run_collect());
//! assert_eq!(out, Ok::<_, Cause<Infallible>>(vec![2, 4, 6]));
//! ```
//!
//! # Halt containment
//!
//! Halt is how pulls signal exhaustion. Combinators turn an inner halt into
//! "advance to the next thing" and runners turn the final halt into a normal
//! return. Halt never surfaces as a failure from any runner.

use std::convert::Infallible;
use std::future::Future;

use crate::pull::{BoxFuture, BoxPull, Upstream};
use crate::scope::Scope;
use crate::types::Cause;

mod bracket;
mod combinators;
mod constructors;
mod flat_map;
mod from_mailbox;
mod iter;
mod merge;
mod push;
mod run;

pub use bracket::{acquire_use_release, AcquireUseRelease};
pub use combinators::{embed_input, EmbedInput, Map, MapErr, PipeTo};
pub use constructors::{
    empty, fail, fail_cause, from_effect, from_pull, from_transform, identity, never, succeed,
    Empty, FailCause, FromEffect, FromPull, FromTransform, Identity, Never, Succeed,
};
pub use flat_map::FlatMap;
pub use from_mailbox::{from_mailbox, from_mailbox_chunk, FromMailbox, FromMailboxChunk};
pub use iter::{
    from_iterable, from_iterable_chunk, from_iterator, from_iterator_chunk, FromIterable,
    FromIterableChunk, FromIterator, FromIteratorChunk,
};
pub use merge::{MergeAll, MergeAllOptions};
pub use push::{async_push, async_push_with, AsyncPush, AsyncPushOptions, Emit};
pub use run::ChannelPull;

/// The result of allocating a pull.
pub type TransformResult<A, E> = Result<BoxPull<A, E>, Cause<E>>;

/// A reusable transformer from an upstream pull to a downstream pull.
///
/// `In`/`InErr` are the upstream's element and error types. Sources ignore
/// their upstream and implement this for every `In`.
pub trait Channel<In = (), InErr = Infallible>: Send + Sync + 'static {
    /// Element type of the allocated pull.
    type Out: Send + 'static;
    /// Error type of the allocated pull.
    type OutErr: Send + 'static;

    /// Allocates a fresh pull. Setup may acquire resources and register
    /// their release on `scope`; a failing setup raises its cause here.
    fn transform<'a>(
        &'a self,
        upstream: Upstream<In, InErr>,
        scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<Self::Out, Self::OutErr>>;
}

/// Marker for types that are channels for some upstream.
///
/// [`ChannelExt`] is implemented for every marked type.
pub trait AnyChannel: Send + Sync + Sized + 'static {}

/// Combinators and runners.
pub trait ChannelExt: AnyChannel {
    /// Applies `f` to every element.
    fn map<F>(self, f: F) -> Map<Self, F> {
        Map::new(self, f)
    }

    /// Applies `f` to the domain error. Interruptions and defects pass
    /// through unchanged.
    fn map_err<F>(self, f: F) -> MapErr<Self, F> {
        MapErr::new(self, f)
    }

    /// For each element, runs the channel `f` returns to completion before
    /// pulling the next element.
    fn flat_map<F>(self, f: F) -> FlatMap<Self, F> {
        FlatMap::new(self, f)
    }

    /// Feeds this channel's output into `that` as its upstream.
    ///
    /// If this channel fails to allocate, `that` is never allocated and the
    /// run fails with the same cause.
    fn pipe_to<D>(self, that: D) -> PipeTo<Self, D> {
        PipeTo::new(self, that)
    }

    /// Hands the real upstream to `input`, run on a fiber, while this
    /// channel sees an exhausted upstream.
    fn embed_input<F>(self, input: F) -> EmbedInput<Self, F> {
        embed_input(self, input)
    }

    /// Runs the channels this channel emits concurrently, interleaving their
    /// elements.
    fn merge_all(self, options: MergeAllOptions) -> MergeAll<Self> {
        MergeAll::new(self, options)
    }

    /// Runs to completion, discarding elements.
    fn run_drain(&self) -> impl Future<Output = Result<(), Cause<<Self as Channel>::OutErr>>> + Send + '_
    where
        Self: Channel,
    {
        run::run_drain(self)
    }

    /// Runs to completion, calling `f` on every element. An error from `f`
    /// stops the run.
    fn run_for_each<F, Fut>(
        &self,
        f: F,
    ) -> impl Future<Output = Result<(), Cause<<Self as Channel>::OutErr>>> + Send + '_
    where
        Self: Channel,
        F: FnMut(<Self as Channel>::Out) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Cause<<Self as Channel>::OutErr>>> + Send + 'static,
    {
        run::run_for_each(self, f)
    }

    /// Runs to completion, collecting every element.
    #[allow(clippy::type_complexity)]
    fn run_collect(
        &self,
    ) -> impl Future<Output = Result<Vec<<Self as Channel>::Out>, Cause<<Self as Channel>::OutErr>>>
           + Send
           + '_
    where
        Self: Channel,
    {
        run::run_collect(self)
    }

    /// Runs to completion, folding elements into an accumulator.
    fn run_fold<S, F>(
        &self,
        init: S,
        f: F,
    ) -> impl Future<Output = Result<S, Cause<<Self as Channel>::OutErr>>> + Send + '_
    where
        Self: Channel,
        S: Send + 'static,
        F: FnMut(S, <Self as Channel>::Out) -> S + Send + 'static,
    {
        run::run_fold(self, init, f)
    }

    /// Allocates a pull inside `scope` for incremental consumption.
    ///
    /// The caller owns `scope` and closes it when done.
    fn to_pull<'a>(
        &'a self,
        scope: &'a Scope,
    ) -> impl Future<
        Output = Result<
            ChannelPull<<Self as Channel>::Out, <Self as Channel>::OutErr>,
            Cause<<Self as Channel>::OutErr>,
        >,
    > + Send
           + 'a
    where
        Self: Channel,
    {
        run::to_pull(self, scope)
    }
}

impl<C: AnyChannel> ChannelExt for C {}
