//! Explicit runtime context
//!
//! Everything the media pipeline needs from "the process" lives here instead of in
//! hidden statics: the async runtime that drives capture timers, logging setup, the
//! factory for control queues and the id sequence shared by sources. The application
//! creates one [`RuntimeContext`] and passes clones into every constructor; the
//! runtime shuts down when the last clone is dropped.

use crate::error::{CoreError, CoreResult};
use crate::queue::TaskQueue;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info};

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Worker threads for the owned async runtime
    pub worker_threads: usize,
    /// Prefix for runtime thread names
    pub thread_name: String,
    /// `EnvFilter` directive; when set a fmt subscriber is installed
    pub log_filter: Option<String>,
    /// Default capacity for per-source buffer pools
    pub default_pool_capacity: usize,
}

impl RuntimeConfig {
    /// Small footprint for embedded capture devices
    pub fn embedded() -> Self {
        Self {
            worker_threads: 1,
            thread_name: "rtcsource".to_string(),
            log_filter: None,
            default_pool_capacity: 3,
        }
    }

    /// Desktop defaults
    pub fn desktop() -> Self {
        Self {
            worker_threads: 2,
            thread_name: "rtcsource".to_string(),
            log_filter: None,
            default_pool_capacity: 8,
        }
    }

    /// Enable logging with the given filter directive
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> CoreResult<()> {
        if self.worker_threads == 0 {
            return Err(CoreError::InvalidConfiguration {
                message: "worker_threads must be > 0".to_string(),
            });
        }
        if self.default_pool_capacity == 0 {
            return Err(CoreError::InvalidConfiguration {
                message: "default_pool_capacity must be > 0".to_string(),
            });
        }
        if self.thread_name.is_empty() {
            return Err(CoreError::InvalidConfiguration {
                message: "thread_name must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::desktop()
    }
}

/// Reference-counted runtime context
#[derive(Clone)]
pub struct RuntimeContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    config: RuntimeConfig,
    handle: Handle,
    /// Present only when the context owns its runtime
    owned_runtime: Mutex<Option<Runtime>>,
    next_id: AtomicU64,
}

impl RuntimeContext {
    /// Create a context that owns a multi-threaded runtime
    pub fn new(config: RuntimeConfig) -> CoreResult<Self> {
        config.validate()?;
        install_logging(&config)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(|e| CoreError::Initialization {
                reason: format!("Failed to create async runtime: {}", e),
            })?;
        let handle = runtime.handle().clone();

        info!(
            "Runtime context initialized ({} worker threads)",
            config.worker_threads
        );
        Ok(Self {
            inner: Arc::new(ContextInner {
                config,
                handle,
                owned_runtime: Mutex::new(Some(runtime)),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Create a context on top of a runtime owned by the application
    pub fn with_handle(handle: Handle, config: RuntimeConfig) -> CoreResult<Self> {
        config.validate()?;
        install_logging(&config)?;

        Ok(Self {
            inner: Arc::new(ContextInner {
                config,
                handle,
                owned_runtime: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Create a context on the runtime the caller is currently running in
    pub fn from_current(config: RuntimeConfig) -> CoreResult<Self> {
        let handle = Handle::try_current().map_err(|e| CoreError::Initialization {
            reason: format!("No current async runtime: {}", e),
        })?;
        Self::with_handle(handle, config)
    }

    /// Handle of the async runtime used for capture timers
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Configuration this context was built with
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Create a new control queue
    pub fn create_queue(&self, name: &str) -> CoreResult<TaskQueue> {
        TaskQueue::new(format!("{}-{}", self.inner.config.thread_name, name))
    }

    /// Next value of the context-wide id sequence (starts at 1)
    pub fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Whether this context owns its async runtime
    pub fn owns_runtime(&self) -> bool {
        self.inner.owned_runtime.lock().is_some()
    }

    /// Number of live clones of this context
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("config", &self.inner.config)
            .field("owns_runtime", &self.owns_runtime())
            .finish()
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.owned_runtime.get_mut().take() {
            // Safe from inside another runtime too; nothing here waits on tasks.
            runtime.shutdown_background();
            debug!("Runtime context shut down");
        }
    }
}

fn install_logging(config: &RuntimeConfig) -> CoreResult<()> {
    let Some(filter) = config.log_filter.as_deref() else {
        return Ok(());
    };
    let env_filter =
        tracing_subscriber::EnvFilter::try_new(filter).map_err(|e| {
            CoreError::InvalidConfiguration {
                message: format!("Invalid log filter '{}': {}", filter, e),
            }
        })?;
    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
        .is_err()
    {
        debug!("Global tracing subscriber already installed; keeping it");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_presets() {
        assert_eq!(RuntimeConfig::default(), RuntimeConfig::desktop());
        assert_eq!(RuntimeConfig::embedded().worker_threads, 1);
        assert!(RuntimeConfig::embedded().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RuntimeConfig::desktop();
        config.worker_threads = 0;
        assert!(config.validate().is_err());

        let mut config = RuntimeConfig::desktop();
        config.default_pool_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_owned_runtime_lifecycle() {
        let ctx = RuntimeContext::new(RuntimeConfig::embedded()).unwrap();
        assert!(ctx.owns_runtime());

        let clone = ctx.clone();
        assert_eq!(ctx.ref_count(), 2);
        drop(clone);
        assert_eq!(ctx.ref_count(), 1);

        let value = ctx.handle().block_on(async { 21 * 2 });
        assert_eq!(value, 42);
    }

    #[test]
    fn test_id_sequence() {
        let ctx = RuntimeContext::new(RuntimeConfig::embedded()).unwrap();
        assert_eq!(ctx.next_id(), 1);
        assert_eq!(ctx.next_id(), 2);
        assert_eq!(ctx.clone().next_id(), 3);
    }

    #[test]
    fn test_invalid_log_filter_rejected() {
        let config = RuntimeConfig::embedded().with_log_filter("rtcsource=loud");
        assert!(matches!(
            RuntimeContext::new(config),
            Err(CoreError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn test_from_current_does_not_own_runtime() {
        let ctx = RuntimeContext::from_current(RuntimeConfig::embedded()).unwrap();
        assert!(!ctx.owns_runtime());

        let queue = ctx.create_queue("control").unwrap();
        assert_eq!(queue.name(), "rtcsource-control");
    }
}
