//! Fiber runtime.
//!
//! - [`config`]: Runtime configuration types
//! - [`builder`]: Runtime builder and the [`Runtime`] handle
//! - [`env_config`]: Environment and config file overrides
//! - [`fiber`]: Fiber handles and exits
//!
//! # Runtime Builder
//!
//! The runtime is configured with a fluent, move-based builder. Each method
//! consumes `self` and returns the updated builder.
//!
//! ```ignore
//! use flowcore::runtime::RuntimeBuilder;
//!
//! let runtime = RuntimeBuilder::new()
//!     .with_env_overrides()?
//!     .thread_name_prefix("ingest")
//!     .build()?;
//! let fiber = runtime.spawn(async { 1 + 1 })?;
//! assert_eq!(runtime.block_on(fiber.join()).unwrap(), 2);
//! ```
//!
//! Scopes created with [`Scope::new`](crate::scope::Scope::new) use
//! [`Runtime::global`], which reads the environment once on first use.

pub mod builder;
pub mod config;
pub mod env_config;
pub mod fiber;

pub use builder::{Runtime, RuntimeBuilder};
pub use config::RuntimeConfig;
pub use fiber::{Fiber, FiberExit};
