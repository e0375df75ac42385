//! Internal records for runtime entities.
//!
//! These are the bookkeeping types behind [`crate::scope::Scope`].

pub mod finalizer;

pub use finalizer::{Finalizer, FinalizerKey, FinalizerStack};
