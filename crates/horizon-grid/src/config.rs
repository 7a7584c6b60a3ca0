//! Engine configuration.
//!
//! [`GridConfig`] decides how a table runs its off-thread work. It can be
//! built in code or loaded from TOML:
//!
//! ```toml
//! max_workers = 2
//! thread_name = "sheet-recalc"
//! pool = "threaded"
//! ```

use std::path::Path;
use std::sync::Arc;

use horizon_grid_core::{FaultSink, InlinePool, ThreadPool, ThreadPoolConfig, WorkerPool};
use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};

/// Default number of recomputation workers.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Which worker pool a table creates when none is injected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    /// A bounded rayon pool of `max_workers` threads.
    #[default]
    Threaded,
    /// Everything runs on the calling thread.
    Inline,
}

/// Configuration for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Upper bound on concurrent recomputation and delivery jobs.
    pub max_workers: usize,
    /// Name prefix for worker threads.
    pub thread_name: String,
    /// Stack size for worker threads in bytes.
    pub stack_size: Option<usize>,
    /// Which pool to create.
    pub pool: PoolKind,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            thread_name: "horizon-grid".to_string(),
            stack_size: None,
            pool: PoolKind::default(),
        }
    }
}

impl GridConfig {
    /// Create a configuration with a custom worker count.
    pub fn with_workers(max_workers: usize) -> Self {
        Self {
            max_workers,
            ..Default::default()
        }
    }

    /// Create a configuration that runs everything on the calling thread.
    pub fn inline() -> Self {
        Self {
            pool: PoolKind::Inline,
            ..Default::default()
        }
    }

    /// Set the thread name prefix.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the worker stack size.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| GridError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| GridError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Serialize to a TOML document.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GridError::InvalidConfig(e.to_string()))
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(GridError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.thread_name.is_empty() {
            return Err(GridError::InvalidConfig(
                "thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The rayon pool settings this configuration describes.
    pub fn thread_pool_config(&self) -> ThreadPoolConfig {
        let mut config =
            ThreadPoolConfig::with_threads(self.max_workers).thread_name(&self.thread_name);
        if let Some(bytes) = self.stack_size {
            config = config.stack_size(bytes);
        }
        config
    }

    /// Create the pool this configuration describes. Job panics go to
    /// `faults`.
    pub fn build_pool(&self, faults: Arc<dyn FaultSink>) -> Result<Arc<dyn WorkerPool>> {
        self.validate()?;
        Ok(match self.pool {
            PoolKind::Threaded => {
                Arc::new(ThreadPool::new(self.thread_pool_config())?.with_fault_sink(faults))
            }
            PoolKind::Inline => Arc::new(InlinePool::new().with_fault_sink(faults)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GridConfig::default();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.thread_name, "horizon-grid");
        assert_eq!(config.pool, PoolKind::Threaded);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = GridConfig::from_toml_str("max_workers = 2\npool = \"inline\"\n").unwrap();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.pool, PoolKind::Inline);
        assert_eq!(config.thread_name, "horizon-grid");
        assert_eq!(config.stack_size, None);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = GridConfig::from_toml_str("max_workers = 0").unwrap_err();
        assert!(matches!(err, GridError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_pool_rejected() {
        assert!(GridConfig::from_toml_str("pool = \"fibers\"").is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = GridConfig::with_workers(3)
            .thread_name("recalc")
            .stack_size(1 << 20);
        let text = config.to_toml_string().unwrap();
        assert_eq!(GridConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.toml");
        std::fs::write(&path, "thread_name = \"sheet\"\n").unwrap();

        let config = GridConfig::load(&path).unwrap();
        assert_eq!(config.thread_name, "sheet");

        let missing = GridConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, GridError::Io { .. }));
    }

    #[test]
    fn test_build_pool() {
        let faults = Arc::new(horizon_grid_core::CollectingFaultSink::new());
        let pool = GridConfig::with_workers(2).build_pool(faults.clone()).unwrap();
        assert!(pool.is_idle());

        let inline = GridConfig::inline().build_pool(faults.clone()).unwrap();
        inline.submit(Box::new(|| panic!("stray job"))).unwrap();
        assert!(inline.is_idle());
        assert_eq!(faults.count(horizon_grid_core::FaultKind::JobPanic), 1);
    }
}
