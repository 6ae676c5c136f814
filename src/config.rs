//! Runtime configuration
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults
//! 2. A TOML file: explicit path, `FRAMEVM_CONFIG_PATH`, or `./framevm.toml` if present
//! 3. Environment variables `FRAMEVM_<SECTION>__<KEY>` (e.g. `FRAMEVM_HEAP__CAPACITY`)
//! 4. Builder overrides (CLI flags)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const ENV_PREFIX: &str = "FRAMEVM";
const CONFIG_PATH_ENV: &str = "FRAMEVM_CONFIG_PATH";
const DEFAULT_CONFIG_NAME: &str = "framevm";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub heap: HeapConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Maximum number of live objects
    pub capacity: usize,
    /// Allocations between collections
    pub gc_threshold: usize,
    /// Depth of the temp-root stack
    pub temp_roots: usize,
    /// Collect before every allocation
    pub stress: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            capacity: 65_536,
            gc_threshold: 4_096,
            temp_roots: 64,
            stress: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Instructions a thread runs before it may be rotated at a backward
    /// jump; 0 rotates only on `yield_thread()`
    pub quantum: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { quantum: 1_000 }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from file and environment with no overrides
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.heap.capacity > 0, "heap.capacity must be greater than zero");
        anyhow::ensure!(
            self.heap.gc_threshold > 0,
            "heap.gc_threshold must be greater than zero"
        );
        anyhow::ensure!(
            self.heap.temp_roots > 0,
            "heap.temp_roots must be greater than zero"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    heap_capacity: Option<usize>,
    gc_stress: Option<bool>,
    quantum: Option<u32>,
    skip_env: bool,
}

impl ConfigBuilder {
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn heap_capacity(mut self, capacity: Option<usize>) -> Self {
        self.heap_capacity = capacity;
        self
    }

    pub fn gc_stress(mut self, stress: Option<bool>) -> Self {
        self.gc_stress = stress;
        self
    }

    pub fn quantum(mut self, quantum: Option<u32>) -> Self {
        self.quantum = quantum;
        self
    }

    /// Ignore `FRAMEVM_*` variables and the default file search
    pub fn isolated(mut self) -> Self {
        self.skip_env = true;
        self
    }

    pub fn build(self) -> Result<Config> {
        let defaults = Config::default();
        let mut builder = ::config::Config::builder()
            .set_default("heap.capacity", defaults.heap.capacity as i64)?
            .set_default("heap.gc_threshold", defaults.heap.gc_threshold as i64)?
            .set_default("heap.temp_roots", defaults.heap.temp_roots as i64)?
            .set_default("heap.stress", defaults.heap.stress)?
            .set_default("scheduler.quantum", i64::from(defaults.scheduler.quantum))?;

        let path = match self.config_path {
            Some(path) => Some(path),
            None if !self.skip_env => std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from),
            None => None,
        };
        match path {
            Some(path) => {
                anyhow::ensure!(path.exists(), "Config file not found: {}", path.display());
                builder = builder.add_source(::config::File::from(path.as_path()).required(true));
            }
            None if !self.skip_env => {
                builder =
                    builder.add_source(::config::File::with_name(DEFAULT_CONFIG_NAME).required(false));
            }
            None => {}
        }

        if !self.skip_env {
            builder = builder.add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        if let Some(capacity) = self.heap_capacity {
            builder = builder.set_override("heap.capacity", capacity as i64)?;
        }
        if let Some(stress) = self.gc_stress {
            builder = builder.set_override("heap.stress", stress)?;
        }
        if let Some(quantum) = self.quantum {
            builder = builder.set_override("scheduler.quantum", i64::from(quantum))?;
        }

        let config: Config = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }
}
