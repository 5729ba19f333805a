//! Worker pool configuration with environment overrides.
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic** — values set on a [`PoolConfig`] before use
//! 2. **Environment variables** — values from `CONTINUO_*` env vars
//! 3. **Defaults** — [`PoolConfig::default`]
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `CONTINUO_POOL_MIN_THREADS` | `usize` | `min_threads` |
//! | `CONTINUO_POOL_MAX_THREADS` | `usize` | `max_threads` |
//! | `CONTINUO_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |

use crate::error::ConfigError;
use std::time::Duration;

/// Environment variable name for the pool's minimum thread count.
pub const ENV_POOL_MIN_THREADS: &str = "CONTINUO_POOL_MIN_THREADS";
/// Environment variable name for the pool's maximum thread count.
pub const ENV_POOL_MAX_THREADS: &str = "CONTINUO_POOL_MAX_THREADS";
/// Environment variable name for the worker thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "CONTINUO_THREAD_NAME_PREFIX";

/// Default idle timeout before retiring excess worker threads.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the process-wide worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Minimum number of worker threads kept alive.
    pub min_threads: usize,
    /// Maximum number of worker threads.
    pub max_threads: usize,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
    /// Idle timeout before retiring threads above `min_threads`.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4);
        Self {
            min_threads: 1,
            max_threads: parallelism.max(4),
            thread_name_prefix: "continuo".to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl PoolConfig {
    /// Resolves a configuration from defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `CONTINUO_*` environment overrides to this configuration.
    ///
    /// Only variables present in the environment are applied. Returns an
    /// error if a variable is set but unparseable.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(val) = read_env(ENV_POOL_MIN_THREADS) {
            self.min_threads = parse_usize(ENV_POOL_MIN_THREADS, &val)?;
        }
        if let Some(val) = read_env(ENV_POOL_MAX_THREADS) {
            self.max_threads = parse_usize(ENV_POOL_MAX_THREADS, &val)?;
        }
        if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
            self.thread_name_prefix = val;
        }
        Ok(())
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads == 0 {
            return Err(ConfigError::Invalid(
                "max_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue {
            var,
            expected: "unsigned integer",
            value: val.to_string(),
        })
}
