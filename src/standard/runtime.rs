//! Process-wide configuration and the init/shutdown lifecycle gate.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::standard::buffer_policy::BufferPolicy;

/// Process-wide options recognised by [`runtime_init`].
///
/// Constructed via [`RuntimeConfig::builder`] using the same chained
/// setter-then-`build()` convention as this crate's other builders.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    num_cpu_workers: usize,
    gpu_enabled: bool,
    dsp_enabled: bool,
    log_verbosity: log::LevelFilter,
    buffer_statistics_enabled: bool,
    statistics_print_on_dealloc: bool,
}

impl Default for RuntimeConfig {
    fn default() -> RuntimeConfig {
        RuntimeConfig {
            num_cpu_workers: num_cpus_fallback(),
            gpu_enabled: true,
            dsp_enabled: false,
            log_verbosity: log::LevelFilter::Info,
            buffer_statistics_enabled: false,
            statistics_print_on_dealloc: false,
        }
    }
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

impl RuntimeConfig {
    /// Returns a [`RuntimeConfigBuilder`]. This is the preferred way to
    /// build a `RuntimeConfig`.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    pub fn num_cpu_workers(&self) -> usize {
        self.num_cpu_workers
    }

    pub fn gpu_enabled(&self) -> bool {
        self.gpu_enabled
    }

    pub fn dsp_enabled(&self) -> bool {
        self.dsp_enabled
    }

    pub fn log_verbosity(&self) -> log::LevelFilter {
        self.log_verbosity
    }

    pub fn buffer_statistics_enabled(&self) -> bool {
        self.buffer_statistics_enabled
    }

    pub fn statistics_print_on_dealloc(&self) -> bool {
        self.statistics_print_on_dealloc
    }
}

/// Builder for [`RuntimeConfig`].
#[must_use = "builders do nothing unless '::build' is called"]
#[derive(Debug, Clone)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    pub fn new() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder { config: RuntimeConfig::default() }
    }

    pub fn num_cpu_workers(&mut self, n: usize) -> &mut Self {
        self.config.num_cpu_workers = n;
        self
    }

    pub fn gpu_enabled(&mut self, enabled: bool) -> &mut Self {
        self.config.gpu_enabled = enabled;
        self
    }

    pub fn dsp_enabled(&mut self, enabled: bool) -> &mut Self {
        self.config.dsp_enabled = enabled;
        self
    }

    pub fn log_verbosity(&mut self, level: log::LevelFilter) -> &mut Self {
        self.config.log_verbosity = level;
        self
    }

    pub fn buffer_statistics_enabled(&mut self, enabled: bool) -> &mut Self {
        self.config.buffer_statistics_enabled = enabled;
        self
    }

    pub fn statistics_print_on_dealloc(&mut self, enabled: bool) -> &mut Self {
        self.config.statistics_print_on_dealloc = enabled;
        self
    }

    pub fn build(&self) -> RuntimeConfig {
        self.config.clone()
    }

    /// Builds the config and immediately calls `runtime_init` with it.
    pub fn build_and_init(&self) -> Result<()> {
        runtime_init(self.build())
    }
}

impl Default for RuntimeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide singleton gating when tasks and buffers may be
/// created, and holding the `BufferPolicy` and object-id counters'
/// configuration.
pub struct Runtime {
    config: RuntimeConfig,
    policy: BufferPolicy,
}

impl Runtime {
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn policy(&self) -> &BufferPolicy {
        &self.policy
    }
}

static RUNTIME: Lazy<RwLock<Option<Arc<Runtime>>>> = Lazy::new(|| RwLock::new(None));

/// Idempotent. Installs the process-wide `Runtime`; a second call while
/// already initialised simply replaces the stored config (still a no-op
/// from the caller's point of view: the window stays open).
pub fn runtime_init(config: RuntimeConfig) -> Result<()> {
    let _ = log::set_max_level(config.log_verbosity());
    let mut slot = RUNTIME.write();
    *slot = Some(Arc::new(Runtime { config, policy: BufferPolicy::new() }));
    Ok(())
}

/// Idempotent. Tears down the process-wide `Runtime`; task and buffer
/// creation fails with `Error::RuntimeNotInitialized` until the next
/// `runtime_init`.
pub fn runtime_shutdown() -> Result<()> {
    let mut slot = RUNTIME.write();
    *slot = None;
    Ok(())
}

pub fn is_initialized() -> bool {
    RUNTIME.read().is_some()
}

/// Returns the current `Runtime`, or `Error::RuntimeNotInitialized` if
/// `runtime_init` has not (yet, or any longer) been called.
pub fn current() -> Result<Arc<Runtime>> {
    RUNTIME.read().clone().ok_or(Error::RuntimeNotInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn lifecycle_is_idempotent_and_gates_current() {
        let _ = runtime_shutdown();
        assert!(current().is_err());
        runtime_init(RuntimeConfig::default()).unwrap();
        runtime_init(RuntimeConfig::default()).unwrap();
        assert!(current().is_ok());
        runtime_shutdown().unwrap();
        runtime_shutdown().unwrap();
        assert!(current().is_err());
    }

    #[test]
    #[serial]
    fn builder_round_trips_options() {
        let cfg = RuntimeConfig::builder()
            .num_cpu_workers(2)
            .gpu_enabled(false)
            .dsp_enabled(true)
            .buffer_statistics_enabled(true)
            .build();
        assert_eq!(cfg.num_cpu_workers(), 2);
        assert!(!cfg.gpu_enabled());
        assert!(cfg.dsp_enabled());
        assert!(cfg.buffer_statistics_enabled());
    }
}
