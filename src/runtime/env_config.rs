//! Environment variable and config file support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`default_buffer_size(64)`)
//! 2. **Environment variables**: values from `FLOWCORE_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `FLOWCORE_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `FLOWCORE_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `FLOWCORE_DEFAULT_BUFFER_SIZE` | `usize` | `default_buffer_size` |

use crate::error::ConfigError;
use crate::runtime::config::RuntimeConfig;

/// Environment variable name for thread stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "FLOWCORE_THREAD_STACK_SIZE";
/// Environment variable name for thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "FLOWCORE_THREAD_NAME_PREFIX";
/// Environment variable name for the default channel buffer size.
pub const ENV_DEFAULT_BUFFER_SIZE: &str = "FLOWCORE_DEFAULT_BUFFER_SIZE";

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_DEFAULT_BUFFER_SIZE) {
        config.default_buffer_size = parse_usize(ENV_DEFAULT_BUFFER_SIZE, &val)?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidEnv {
            var,
            value: val.to_string(),
            reason: format!("expected unsigned integer: {e}"),
        })
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// ```toml
/// [fibers]
/// thread_stack_size = 2097152
/// thread_name_prefix = "myapp-fiber"
///
/// [channels]
/// default_buffer_size = 32
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeTomlConfig {
    /// Fiber thread settings.
    #[serde(default)]
    pub fibers: FibersToml,
    /// Channel settings.
    #[serde(default)]
    pub channels: ChannelsToml,
}

/// Fiber section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct FibersToml {
    /// Stack size per fiber thread in bytes.
    pub thread_stack_size: Option<usize>,
    /// Name prefix for fiber threads.
    pub thread_name_prefix: Option<String>,
}

/// Channel section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ChannelsToml {
    /// Mailbox size used when channel options leave it unset.
    pub default_buffer_size: Option<usize>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) {
    if let Some(v) = toml.fibers.thread_stack_size {
        config.thread_stack_size = v;
    }
    if let Some(ref v) = toml.fibers.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(v) = toml.channels.default_buffer_size {
        config.default_buffer_size = v;
    }
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, ConfigError> {
    Ok(toml::from_str(toml_str)?)
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================
