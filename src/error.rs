//! Error types for runtime and configuration failures.
//!
//! Data-flow failures never use this type: they travel as [`Cause`] and
//! [`crate::pull::PullError`]. [`Error`] covers the machinery around them:
//!
//! - **Scope**: forking or registering on a scope that already closed
//! - **Spawn**: the OS refused to start a fiber thread
//! - **Config**: invalid environment or file configuration
//! - **Internal**: runtime bugs and invalid states
//!
//! An [`Error`] that reaches a pull is surfaced as a defect
//! (`Cause::Panicked`), since none of these are domain errors.

use core::fmt;
use std::sync::Arc;

use crate::types::{Cause, FiberId, PanicPayload, ScopeId};

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Scope is already closed.
    ScopeClosed,
    /// A fiber could not be started.
    SpawnFailed,
    /// Configuration could not be loaded or parsed.
    Config,
    /// Internal runtime error (bug).
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScopeClosed => write!(f, "scope closed"),
            Self::SpawnFailed => write!(f, "spawn failed"),
            Self::Config => write!(f, "configuration error"),
            Self::Internal => write!(f, "internal error"),
        }
    }
}

/// Diagnostic context for an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// The fiber involved, if any.
    pub fiber_id: Option<FiberId>,
    /// The scope involved, if any.
    pub scope_id: Option<ScopeId>,
}

/// The main error type for runtime operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    context: ErrorContext,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            context: ErrorContext {
                fiber_id: None,
                scope_id: None,
            },
        }
    }

    /// Creates a scope-closed error for the given scope.
    #[must_use]
    pub fn scope_closed(scope_id: ScopeId) -> Self {
        Self::new(ErrorKind::ScopeClosed).with_context(ErrorContext {
            fiber_id: None,
            scope_id: Some(scope_id),
        })
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the diagnostic context.
    #[must_use]
    pub const fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds structured context to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        self.context = ctx;
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if let Some(scope) = self.context.scope_id {
            write!(f, " ({scope})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl<E> From<Error> for Cause<E> {
    fn from(err: Error) -> Self {
        Self::Panicked(PanicPayload::new(err.to_string()))
    }
}

/// Errors raised while loading runtime configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidEnv {
        /// The variable name.
        var: &'static str,
        /// The raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file could not be parsed.
    #[cfg(feature = "config-file")]
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorKind::Config)
            .with_message(err.to_string())
            .with_source(err)
    }
}

/// A specialized Result type for runtime operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_without_message() {
        let err = Error::new(ErrorKind::Internal);
        assert_eq!(err.to_string(), "internal error");
    }

    #[test]
    fn display_with_message_and_scope() {
        let err = Error::scope_closed(ScopeId::new_for_test(4)).with_message("fork");
        assert_eq!(err.to_string(), "scope closed: fork (S4)");
        assert_eq!(err.kind(), ErrorKind::ScopeClosed);
    }

    #[test]
    fn source_chain_is_exposed() {
        let err = Error::new(ErrorKind::SpawnFailed).with_source(Underlying);
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "underlying");
    }

    #[test]
    fn runtime_error_becomes_defect() {
        let cause: Cause<String> = Error::new(ErrorKind::SpawnFailed).into();
        assert!(cause.is_panicked());
    }

    #[test]
    fn config_error_converts() {
        let err: Error = ConfigError::InvalidEnv {
            var: "X",
            value: "abc".into(),
            reason: "not a number".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.message().unwrap_or_default().contains("abc"));
    }
}
