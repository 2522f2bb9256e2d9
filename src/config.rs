// Tue Jan 13 2026 - Alex

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Load address override; `None` keeps the container's own `__TEXT` vmaddr.
    pub base_address: Option<u64>,
    pub cache_capacity: usize,
    pub max_function_size: u64,
    pub min_string_length: usize,
    pub heuristic_functions: bool,
    pub parallel: bool,
    pub max_threads: usize,
    pub stale_after_secs: u64,
    pub use_mmap: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_address: None,
            cache_capacity: 4096,
            max_function_size: 0x10_0000,
            min_string_length: 4,
            heuristic_functions: true,
            parallel: true,
            max_threads: num_cpus::get(),
            stale_after_secs: 300,
            use_mmap: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
        let config: Config =
            serde_json::from_str(&text).map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_base_address(mut self, base: u64) -> Self {
        self.base_address = Some(base);
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_max_function_size(mut self, size: u64) -> Self {
        self.max_function_size = size;
        self
    }

    pub fn with_min_string_length(mut self, len: usize) -> Self {
        self.min_string_length = len;
        self
    }

    pub fn with_heuristic_functions(mut self, enabled: bool) -> Self {
        self.heuristic_functions = enabled;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = threads;
        self
    }

    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.cache_capacity == 0 {
            return Err("cache_capacity must be greater than 0".to_string());
        }
        if self.max_threads == 0 {
            return Err("max_threads must be greater than 0".to_string());
        }
        if self.min_string_length == 0 {
            return Err("min_string_length must be at least 1".to_string());
        }
        if self.max_function_size < 4 {
            return Err("max_function_size must cover at least one instruction".to_string());
        }
        Ok(())
    }
}
