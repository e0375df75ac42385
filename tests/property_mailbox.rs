//! Property-based tests for mailbox strategies and the semaphore.
//!
//! # Mailbox Invariants
//! - FIFO: interleaved offers and bounded takes match a queue model
//! - Dropping keeps the first `capacity` items and hands back the rest
//! - Sliding keeps the last `capacity` items and rejects nothing
//! - Ending never loses buffered items
//!
//! # Semaphore Invariants
//! - Conservation: held + available = max_permits

#[macro_use]
mod common;

use common::*;
use flowcore::mailbox::{Mailbox, Strategy as Overflow};
use flowcore::sync::Semaphore;
use futures_lite::future::block_on;
use proptest::prelude::*;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
enum Op {
    Offer(Vec<u16>),
    Take(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::collection::vec(any::<u16>(), 0..8).prop_map(Op::Offer),
        (1usize..6).prop_map(Op::Take),
    ]
}

proptest! {
    #![proptest_config(test_proptest_config(128))]

    #[test]
    fn interleaved_ops_match_queue_model(ops in prop::collection::vec(op_strategy(), 0..40)) {
        init_test_logging_with_level(tracing::Level::WARN);
        let mailbox: Mailbox<u16> = Mailbox::unbounded();
        let mut model = VecDeque::new();
        for op in ops {
            match op {
                Op::Offer(items) => {
                    model.extend(items.iter().copied());
                    let rejected = mailbox.try_offer_all(items);
                    prop_assert!(rejected.is_empty());
                }
                Op::Take(n) => {
                    if model.is_empty() {
                        continue;
                    }
                    let (taken, done) = block_on(mailbox.take_n(n)).expect("open mailbox");
                    prop_assert!(!done);
                    let expected: Vec<u16> = model.drain(..n.min(model.len())).collect();
                    prop_assert_eq!(taken, expected);
                }
            }
            prop_assert_eq!(mailbox.size(), Some(model.len()));
        }
    }

    #[test]
    fn dropping_keeps_prefix(
        items in prop::collection::vec(any::<u16>(), 0..32),
        capacity in 1usize..10,
    ) {
        let mailbox: Mailbox<u16> = Mailbox::with_strategy(capacity, Overflow::Dropping);
        let rejected = block_on(mailbox.offer_all(items.clone()));
        let kept = capacity.min(items.len());
        prop_assert_eq!(&rejected[..], &items[kept..]);
        prop_assert_eq!(mailbox.size(), Some(kept));
        prop_assert!(mailbox.end());
        let (buffered, done) = block_on(mailbox.take_all()).expect("graceful end");
        prop_assert_eq!(&buffered[..], &items[..kept]);
        prop_assert!(done);
    }

    #[test]
    fn sliding_keeps_suffix(
        items in prop::collection::vec(any::<u16>(), 0..32),
        capacity in 1usize..10,
    ) {
        let mailbox: Mailbox<u16> = Mailbox::with_strategy(capacity, Overflow::Sliding);
        let rejected = block_on(mailbox.offer_all(items.clone()));
        prop_assert!(rejected.is_empty());
        let start = items.len().saturating_sub(capacity);
        prop_assert!(mailbox.end());
        let (buffered, done) = block_on(mailbox.take_all()).expect("graceful end");
        prop_assert_eq!(&buffered[..], &items[start..]);
        prop_assert!(done);
    }

    #[test]
    fn end_never_loses_items(
        batches in prop::collection::vec(prop::collection::vec(any::<u16>(), 0..6), 0..6),
        take in 1usize..5,
    ) {
        let mailbox: Mailbox<u16> = Mailbox::unbounded();
        let expected: Vec<u16> = batches.iter().flatten().copied().collect();
        for batch in batches {
            prop_assert!(mailbox.try_offer_all(batch).is_empty());
        }
        prop_assert!(mailbox.end());

        let mut drained = Vec::new();
        loop {
            let (items, done) = block_on(mailbox.take_n(take)).expect("graceful end");
            drained.extend(items);
            if done {
                break;
            }
        }
        prop_assert_eq!(drained, expected);
        prop_assert!(mailbox.is_done());
    }

    #[test]
    fn semaphore_conserves_permits(
        max in 1usize..16,
        requests in prop::collection::vec(1usize..6, 0..12),
    ) {
        let semaphore = Semaphore::new(max);
        let mut held = Vec::new();
        for count in requests {
            if let Ok(permit) = semaphore.try_acquire(count) {
                held.push(permit);
            }
            let in_use: usize = held.iter().map(|p| p.count()).sum();
            prop_assert_eq!(in_use + semaphore.available_permits(), max);
        }
        drop(held);
        prop_assert_eq!(semaphore.available_permits(), max);
    }
}
