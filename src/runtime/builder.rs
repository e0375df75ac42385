//! Runtime builder and handles.

use crate::error::{Error, ErrorContext, ErrorKind};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::fiber::{Fiber, FiberShared};
use crate::types::FiberId;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Builder for constructing a runtime with custom configuration.
#[derive(Clone)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    /// Set the fiber thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = size;
        self
    }

    /// Set the fiber thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Set the mailbox size channels use when their options leave it unset.
    #[must_use]
    pub fn default_buffer_size(mut self, size: usize) -> Self {
        self.config.default_buffer_size = size;
        self
    }

    /// Register a callback to run when a fiber thread starts.
    #[must_use]
    pub fn on_thread_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_start = Some(Arc::new(f));
        self
    }

    /// Register a callback to run when a fiber thread stops.
    #[must_use]
    pub fn on_thread_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_stop = Some(Arc::new(f));
        self
    }

    /// Apply `FLOWCORE_*` environment variable overrides.
    ///
    /// Call this before the programmatic setters that should win over the
    /// environment.
    pub fn with_env_overrides(mut self) -> Result<Self, Error> {
        super::env_config::apply_env_overrides(&mut self.config)?;
        Ok(self)
    }

    /// Apply settings from a TOML file.
    #[cfg(feature = "config-file")]
    pub fn with_config_file(mut self, path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let parsed = super::env_config::parse_toml_file(path.as_ref())?;
        super::env_config::apply_toml_config(&mut self.config, &parsed);
        Ok(self)
    }

    /// Build a runtime from this configuration.
    pub fn build(self) -> Result<Runtime, Error> {
        Runtime::with_config(self.config)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime instance created from a [`RuntimeBuilder`].
///
/// Every fiber runs on its own named thread.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Construct a runtime from the given configuration.
    pub fn with_config(mut config: RuntimeConfig) -> Result<Self, Error> {
        config.normalize();
        Ok(Self {
            inner: Arc::new(RuntimeInner::new(config)),
        })
    }

    /// Returns the process-wide runtime, built on first use from defaults
    /// plus environment overrides.
    ///
    /// Invalid environment values are logged and ignored.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<Runtime> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let mut config = RuntimeConfig::default();
            if let Err(err) = super::env_config::apply_env_overrides(&mut config) {
                tracing::warn!(error = %err, "ignoring invalid runtime environment");
                config = RuntimeConfig::default();
            }
            config.normalize();
            Self {
                inner: Arc::new(RuntimeInner::new(config)),
            }
        })
    }

    /// Run a future to completion on the current thread.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        futures_lite::future::block_on(future)
    }

    /// Spawns `future` as a new fiber.
    pub fn spawn<F>(&self, future: F) -> Result<Fiber<F::Output>, Error>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.spawn(future)
    }

    /// Spawns a fiber nobody will join.
    pub fn spawn_detached<F>(&self, future: F) -> Result<FiberId, Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.spawn(future).map(|fiber| fiber.id())
    }

    /// Returns a reference to the runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

struct RuntimeInner {
    config: RuntimeConfig,
    next_worker_id: AtomicUsize,
}

impl RuntimeInner {
    fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            next_worker_id: AtomicUsize::new(0),
        }
    }

    fn next_thread_name(&self) -> String {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        format!("{}-{id}", self.config.thread_name_prefix)
    }

    fn spawn<F>(&self, future: F) -> Result<Fiber<F::Output>, Error>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let id = FiberId::next();
        let shared = Arc::new(FiberShared::new(id));
        let runner = Arc::clone(&shared);
        let config = self.config.clone();

        let builder = std::thread::Builder::new()
            .name(self.next_thread_name())
            .stack_size(self.config.thread_stack_size);

        builder
            .spawn(move || {
                if let Some(callback) = config.on_thread_start.as_ref() {
                    callback();
                }
                runner.run(future);
                if let Some(callback) = config.on_thread_stop.as_ref() {
                    callback();
                }
            })
            .map_err(|err| {
                Error::new(ErrorKind::SpawnFailed)
                    .with_message("failed to start fiber thread")
                    .with_context(ErrorContext {
                        fiber_id: Some(id),
                        scope_id: None,
                    })
                    .with_source(err)
            })?;

        tracing::trace!(fiber = %id, "fiber spawned");
        Ok(Fiber::from_shared(shared))
    }
}
