//! Channels over iterators.
//!
//! The `*_iterator` constructors take a factory so every run gets a fresh
//! iterator; the `*_iterable` constructors clone the collection per run.
//! Chunked variants emit `Vec`s of at most `chunk_size` elements. A chunk
//! size of zero is treated as one.

use std::marker::PhantomData;

use super::{AnyChannel, Channel, TransformResult};
use crate::pull::{halt_unit, BoxFuture, Pull, PullResult, Upstream};
use crate::scope::Scope;

/// Yields the iterator's items one per pull, then halts for good.
struct IterPull<I> {
    iter: Option<I>,
}

impl<I, E> Pull<I::Item, E> for IterPull<I>
where
    I: Iterator + Send,
    I::Item: Send + 'static,
    E: Send + 'static,
{
    fn pull(&mut self) -> BoxFuture<'_, PullResult<I::Item, E>> {
        let next = self.iter.as_mut().and_then(Iterator::next);
        let result = match next {
            Some(item) => Ok(item),
            None => {
                self.iter = None;
                halt_unit()
            }
        };
        Box::pin(std::future::ready(result))
    }
}

/// Yields up to `chunk_size` items per pull.
struct IterChunkPull<I> {
    iter: Option<I>,
    chunk_size: usize,
}

impl<I, E> Pull<Vec<I::Item>, E> for IterChunkPull<I>
where
    I: Iterator + Send,
    I::Item: Send + 'static,
    E: Send + 'static,
{
    fn pull(&mut self) -> BoxFuture<'_, PullResult<Vec<I::Item>, E>> {
        let chunk: Vec<I::Item> = match self.iter.as_mut() {
            Some(iter) => iter.by_ref().take(self.chunk_size).collect(),
            None => Vec::new(),
        };
        let result = if chunk.is_empty() {
            self.iter = None;
            halt_unit()
        } else {
            Ok(chunk)
        };
        Box::pin(std::future::ready(result))
    }
}

fn boxed<P, A, E>(pull: P) -> BoxFuture<'static, TransformResult<A, E>>
where
    P: Pull<A, E> + 'static,
    A: Send + 'static,
    E: Send + 'static,
{
    let pull: Box<dyn Pull<A, E>> = Box::new(pull);
    Box::pin(std::future::ready(Ok(pull)))
}

/// See [`from_iterator`].
pub struct FromIterator<F, E> {
    make: F,
    _marker: PhantomData<fn() -> E>,
}

/// Emits the items of the iterator `make` returns, one per pull.
pub fn from_iterator<F, I, E>(make: F) -> FromIterator<F, E>
where
    F: Fn() -> I + Send + Sync + 'static,
    I: IntoIterator,
{
    FromIterator {
        make,
        _marker: PhantomData,
    }
}

impl<F: Send + Sync + 'static, E: 'static> AnyChannel for FromIterator<F, E> {}

impl<In, InErr, F, I, E> Channel<In, InErr> for FromIterator<F, E>
where
    F: Fn() -> I + Send + Sync + 'static,
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
    E: Send + 'static,
{
    type Out = I::Item;
    type OutErr = E;

    fn transform<'a>(
        &'a self,
        _upstream: Upstream<In, InErr>,
        _scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<I::Item, E>> {
        boxed(IterPull {
            iter: Some((self.make)().into_iter()),
        })
    }
}

/// See [`from_iterator_chunk`].
pub struct FromIteratorChunk<F, E> {
    make: F,
    chunk_size: usize,
    _marker: PhantomData<fn() -> E>,
}

/// Emits the items of the iterator `make` returns in chunks.
pub fn from_iterator_chunk<F, I, E>(make: F, chunk_size: usize) -> FromIteratorChunk<F, E>
where
    F: Fn() -> I + Send + Sync + 'static,
    I: IntoIterator,
{
    FromIteratorChunk {
        make,
        chunk_size: chunk_size.max(1),
        _marker: PhantomData,
    }
}

impl<F: Send + Sync + 'static, E: 'static> AnyChannel for FromIteratorChunk<F, E> {}

impl<In, InErr, F, I, E> Channel<In, InErr> for FromIteratorChunk<F, E>
where
    F: Fn() -> I + Send + Sync + 'static,
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
    E: Send + 'static,
{
    type Out = Vec<I::Item>;
    type OutErr = E;

    fn transform<'a>(
        &'a self,
        _upstream: Upstream<In, InErr>,
        _scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<Vec<I::Item>, E>> {
        boxed(IterChunkPull {
            iter: Some((self.make)().into_iter()),
            chunk_size: self.chunk_size,
        })
    }
}

/// See [`from_iterable`].
pub struct FromIterable<I, E> {
    items: I,
    _marker: PhantomData<fn() -> E>,
}

/// Emits the elements of `items`, one per pull. Each run iterates a clone.
pub fn from_iterable<I, E>(items: I) -> FromIterable<I, E>
where
    I: IntoIterator + Clone,
{
    FromIterable {
        items,
        _marker: PhantomData,
    }
}

impl<I: Send + Sync + 'static, E: 'static> AnyChannel for FromIterable<I, E> {}

impl<In, InErr, I, E> Channel<In, InErr> for FromIterable<I, E>
where
    I: IntoIterator + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
    E: Send + 'static,
{
    type Out = I::Item;
    type OutErr = E;

    fn transform<'a>(
        &'a self,
        _upstream: Upstream<In, InErr>,
        _scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<I::Item, E>> {
        boxed(IterPull {
            iter: Some(self.items.clone().into_iter()),
        })
    }
}

/// See [`from_iterable_chunk`].
pub struct FromIterableChunk<I, E> {
    items: I,
    chunk_size: usize,
    _marker: PhantomData<fn() -> E>,
}

/// Emits the elements of `items` in chunks. Each run iterates a clone.
pub fn from_iterable_chunk<I, E>(items: I, chunk_size: usize) -> FromIterableChunk<I, E>
where
    I: IntoIterator + Clone,
{
    FromIterableChunk {
        items,
        chunk_size: chunk_size.max(1),
        _marker: PhantomData,
    }
}

impl<I: Send + Sync + 'static, E: 'static> AnyChannel for FromIterableChunk<I, E> {}

impl<In, InErr, I, E> Channel<In, InErr> for FromIterableChunk<I, E>
where
    I: IntoIterator + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
    E: Send + 'static,
{
    type Out = Vec<I::Item>;
    type OutErr = E;

    fn transform<'a>(
        &'a self,
        _upstream: Upstream<In, InErr>,
        _scope: &'a Scope,
    ) -> BoxFuture<'a, TransformResult<Vec<I::Item>, E>> {
        boxed(IterChunkPull {
            iter: Some(self.items.clone().into_iter()),
            chunk_size: self.chunk_size,
        })
    }
}
