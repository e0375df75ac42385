//! Flowcore: scope-aware, pull-based channels with backpressured mailboxes.
//!
//! # Overview
//!
//! A [`Channel`](channel::Channel) is a reusable recipe for a pull. Running it
//! allocates the pull inside a [`Scope`], drives it until it halts or fails,
//! and closes the scope so every resource the run acquired is released with
//! the run's exit. Producers that push instead of being pulled feed a
//! [`Mailbox`], whose strategy decides what happens when they outrun the
//! consumer.
//!
//! # Core Guarantees
//!
//! - **Halt is not an error**: exhaustion travels as [`pull::PullError::Halt`]
//!   and is absorbed by combinators and runners; it never reaches a caller
//! - **Structured lifetimes**: every fiber a channel forks belongs to a scope;
//!   closing the scope interrupts the fiber and waits for it
//! - **Release on every exit**: finalizers run once, in LIFO order, on
//!   success, failure, interruption, or panic
//! - **No lost data**: ending or failing a mailbox keeps buffered elements
//!   readable ahead of the termination
//!
//! # Module Structure
//!
//! - [`pull`]: The Halt/Pull protocol and shared upstream handles
//! - [`mailbox`]: Strategy-configurable concurrent queue
//! - [`channel`]: Constructors, combinators, and runners
//! - [`scope`]: Finalizer scopes and fiber ownership
//! - [`runtime`]: Fibers, runtime configuration, and the global runtime
//! - [`sync`]: Counting semaphore
//! - [`types`]: Identifiers, outcomes, causes, cancellation reasons
//! - [`record`]: Finalizer bookkeeping behind scopes
//! - [`error`]: Crate error type

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod channel;
pub mod error;
pub mod mailbox;
pub mod pull;
pub mod record;
pub mod runtime;
pub mod scope;
pub mod sync;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use channel::{AnyChannel, Channel, ChannelExt, ChannelPull};
pub use error::{ConfigError, Error, ErrorKind, Result};
pub use mailbox::{Mailbox, MailboxOptions, Strategy};
pub use pull::{halt, halt_unit, is_halt, BoxPull, Pull, PullError, PullResult, Upstream};
pub use runtime::{Fiber, Runtime, RuntimeBuilder, RuntimeConfig};
pub use scope::{Scope, ScopeExit};
pub use types::{CancelKind, CancelReason, Cause, FiberId, Outcome, PanicPayload, ScopeId};
