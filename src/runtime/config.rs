//! Runtime configuration types.
//!
//! In most cases you should use [`RuntimeBuilder`](super::builder::RuntimeBuilder)
//! to construct a runtime rather than creating a [`RuntimeConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `thread_stack_size` | 2 MiB |
//! | `thread_name_prefix` | `"flowcore-fiber"` |
//! | `default_buffer_size` | 16 |

use std::fmt;
use std::sync::Arc;

/// Default stack size for fiber threads.
pub const DEFAULT_THREAD_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Default fiber thread name prefix.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "flowcore-fiber";

/// Default mailbox size for channels that buffer between fibers.
pub const DEFAULT_BUFFER_SIZE: usize = 16;

/// Runtime configuration.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Stack size per fiber thread (default: 2MB).
    pub thread_stack_size: usize,
    /// Name prefix for fiber threads.
    pub thread_name_prefix: String,
    /// Mailbox size used by `async_push` and `merge_all` when their options
    /// leave it unset.
    pub default_buffer_size: usize,
    /// Callback executed when a fiber thread starts.
    pub on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Callback executed when a fiber thread stops.
    pub on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.thread_stack_size == 0 {
            self.thread_stack_size = DEFAULT_THREAD_STACK_SIZE;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
        if self.default_buffer_size == 0 {
            self.default_buffer_size = 1;
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_stack_size: DEFAULT_THREAD_STACK_SIZE,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            default_buffer_size: DEFAULT_BUFFER_SIZE,
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("thread_stack_size", &self.thread_stack_size)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("default_buffer_size", &self.default_buffer_size)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_fills_zeroes() {
        let mut config = RuntimeConfig {
            thread_stack_size: 0,
            thread_name_prefix: String::new(),
            default_buffer_size: 0,
            ..RuntimeConfig::default()
        };
        config.normalize();
        assert_eq!(config.thread_stack_size, DEFAULT_THREAD_STACK_SIZE);
        assert_eq!(config.thread_name_prefix, DEFAULT_THREAD_NAME_PREFIX);
        assert_eq!(config.default_buffer_size, 1);
    }

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.default_buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(config.on_thread_start.is_none());
        assert!(format!("{config:?}").contains("flowcore-fiber"));
    }
}
