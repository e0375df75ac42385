//! Four-valued outcome type with severity lattice.
//!
//! The outcome type is the exit value of a concurrent operation:
//!
//! - `Ok(T)`: Success with value
//! - `Err(E)`: Domain error
//! - `Cancelled(CancelReason)`: Operation was interrupted
//! - `Panicked(PanicPayload)`: Defect (the operation panicked)
//!
//! These form a severity lattice: `Ok < Err < Cancelled < Panicked`
//!
//! [`Cause`] is the failure half of an outcome: everything except `Ok`.
//! Pulls never place a halt inside a `Cause`; see [`crate::pull`].

use super::cancel::CancelReason;
use core::fmt;
use std::any::Any;

/// Payload from a caught panic.
///
/// This wraps the panic value for safe transport across fiber boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Creates a new panic payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Builds a payload from the value returned by `catch_unwind`.
    ///
    /// String payloads (the common `panic!("...")` case) keep their text.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_) => "non-string panic payload".to_string(),
            },
        };
        Self { message }
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

/// The four-valued outcome of a concurrent operation.
///
/// Forms a severity lattice where worse outcomes dominate:
/// `Ok < Err < Cancelled < Panicked`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    /// Success with a value.
    Ok(T),
    /// Domain error.
    Err(E),
    /// The operation was interrupted.
    Cancelled(CancelReason),
    /// The operation panicked.
    Panicked(PanicPayload),
}

impl<T, E> Outcome<T, E> {
    /// Returns the severity level of this outcome (0 = Ok, 3 = Panicked).
    #[must_use]
    pub const fn severity(&self) -> u8 {
        match self {
            Self::Ok(_) => 0,
            Self::Err(_) => 1,
            Self::Cancelled(_) => 2,
            Self::Panicked(_) => 3,
        }
    }

    /// Returns true if this outcome is `Ok`.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Returns true if this outcome is `Err`.
    #[must_use]
    pub const fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// Returns true if this outcome is `Cancelled`.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if this outcome is `Panicked`.
    #[must_use]
    pub const fn is_panicked(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    /// Builds an outcome from a result whose error side is a [`Cause`].
    pub fn from_result(result: Result<T, Cause<E>>) -> Self {
        match result {
            Ok(v) => Self::Ok(v),
            Err(cause) => cause.into_outcome(),
        }
    }

    /// Converts this outcome to a standard Result, with every failure kind
    /// carried by [`Cause`].
    pub fn into_result(self) -> Result<T, Cause<E>> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::Err(e) => Err(Cause::Err(e)),
            Self::Cancelled(r) => Err(Cause::Cancelled(r)),
            Self::Panicked(p) => Err(Cause::Panicked(p)),
        }
    }

    /// Maps the success value using the provided function.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U, E> {
        match self {
            Self::Ok(v) => Outcome::Ok(f(v)),
            Self::Err(e) => Outcome::Err(e),
            Self::Cancelled(r) => Outcome::Cancelled(r),
            Self::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Maps the error value using the provided function.
    pub fn map_err<F2, G: FnOnce(E) -> F2>(self, g: G) -> Outcome<T, F2> {
        match self {
            Self::Ok(v) => Outcome::Ok(v),
            Self::Err(e) => Outcome::Err(g(e)),
            Self::Cancelled(r) => Outcome::Cancelled(r),
            Self::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Erases both the value and the domain error, keeping only the exit kind.
    ///
    /// This is the shape scope finalizers observe.
    #[must_use]
    pub fn erase(&self) -> Outcome<(), ()> {
        match self {
            Self::Ok(_) => Outcome::Ok(()),
            Self::Err(_) => Outcome::Err(()),
            Self::Cancelled(r) => Outcome::Cancelled(r.clone()),
            Self::Panicked(p) => Outcome::Panicked(p.clone()),
        }
    }

    /// Returns the success value or panics.
    ///
    /// # Panics
    ///
    /// Panics if the outcome is not `Ok`.
    #[track_caller]
    pub fn unwrap(self) -> T
    where
        E: fmt::Debug,
    {
        match self {
            Self::Ok(v) => v,
            Self::Err(e) => panic!("called `Outcome::unwrap()` on an `Err` value: {e:?}"),
            Self::Cancelled(r) => {
                panic!("called `Outcome::unwrap()` on a `Cancelled` value: {r:?}")
            }
            Self::Panicked(p) => panic!("called `Outcome::unwrap()` on a `Panicked` value: {p}"),
        }
    }

    /// Returns the success value or a default.
    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Self::Ok(v) => v,
            _ => default,
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => Self::Ok(v),
            Err(e) => Self::Err(e),
        }
    }
}

/// The failure side of an [`Outcome`]: domain error, interruption, or defect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause<E> {
    /// Domain error.
    Err(E),
    /// Interruption.
    Cancelled(CancelReason),
    /// Defect.
    Panicked(PanicPayload),
}

impl<E> Cause<E> {
    /// Creates a defect cause with the given message.
    #[must_use]
    pub fn die(message: impl Into<String>) -> Self {
        Self::Panicked(PanicPayload::new(message))
    }

    /// Returns the severity level of this cause (1 = Err, 3 = Panicked).
    #[must_use]
    pub const fn severity(&self) -> u8 {
        match self {
            Self::Err(_) => 1,
            Self::Cancelled(_) => 2,
            Self::Panicked(_) => 3,
        }
    }

    /// Returns true if this is a domain error.
    #[must_use]
    pub const fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// Returns true if this is an interruption.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if this is a defect.
    #[must_use]
    pub const fn is_panicked(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    /// Returns the domain error, if this is one.
    pub fn into_err(self) -> Option<E> {
        match self {
            Self::Err(e) => Some(e),
            _ => None,
        }
    }

    /// Maps the domain error.
    pub fn map_err<F2, G: FnOnce(E) -> F2>(self, g: G) -> Cause<F2> {
        match self {
            Self::Err(e) => Cause::Err(g(e)),
            Self::Cancelled(r) => Cause::Cancelled(r),
            Self::Panicked(p) => Cause::Panicked(p),
        }
    }

    /// Lifts this cause into a failed outcome.
    pub fn into_outcome<T>(self) -> Outcome<T, E> {
        match self {
            Self::Err(e) => Outcome::Err(e),
            Self::Cancelled(r) => Outcome::Cancelled(r),
            Self::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Erases the domain error, keeping only the failure kind.
    #[must_use]
    pub fn erase(&self) -> Outcome<(), ()> {
        match self {
            Self::Err(_) => Outcome::Err(()),
            Self::Cancelled(r) => Outcome::Cancelled(r.clone()),
            Self::Panicked(p) => Outcome::Panicked(p.clone()),
        }
    }
}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Err(e) => write!(f, "{e}"),
            Self::Cancelled(r) => write!(f, "cancelled: {r}"),
            Self::Panicked(p) => write!(f, "{p}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Cause<E> {}

/// Compares two outcomes by severity and returns the worse one.
///
/// This implements the lattice join operation.
pub fn join_outcomes<T, E>(a: Outcome<T, E>, b: Outcome<T, E>) -> Outcome<T, E> {
    if a.severity() >= b.severity() {
        a
    } else {
        b
    }
}
