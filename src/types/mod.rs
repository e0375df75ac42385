//! Core types shared by every layer.
//!
//! - [`id`]: Identifier types (`FiberId`, `ScopeId`)
//! - [`outcome`]: Four-valued outcome type with severity lattice
//! - [`cancel`]: Cancellation reason and kind types

pub mod cancel;
pub mod id;
pub mod outcome;

pub use cancel::{CancelKind, CancelReason};
pub use id::{FiberId, ScopeId};
pub use outcome::{join_outcomes, Cause, Outcome, PanicPayload};
