//! Configuration settings and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::UNBOUNDED_DEPTH;
use crate::watcher::DEBOUNCE_DURATION;
use crate::{Error, Result};

/// Upper bound for the event debounce window, in milliseconds.
const MAX_DEBOUNCE_MS: u64 = 60_000;

/// Main configuration for a file tree cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON.
    pub log_json: bool,

    /// Directories to register on startup.
    pub watch_dirs: Vec<PathBuf>,

    /// Depth for registered directories. `-1` caches only the root entry.
    pub max_depth: i32,

    /// Follow symbolic links and watch their targets.
    pub follow_links: bool,

    /// Rescan a whole directory subtree whenever it reports a change.
    pub rescan_on_update: bool,

    /// Debounce window for raw watcher events, in milliseconds.
    pub debounce_ms: u64,

    /// Gitignore-style patterns for paths that are never cached.
    pub ignore_patterns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            watch_dirs: Vec::new(),
            max_depth: UNBOUNDED_DEPTH,
            follow_links: true,
            rescan_on_update: false,
            debounce_ms: u64::try_from(DEBOUNCE_DURATION.as_millis()).unwrap_or(MAX_DEBOUNCE_MS),
            ignore_patterns: Vec::new(),
        }
    }
}

impl Config {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::config(format!("invalid config file '{}': {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "invalid log level '{}', must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.max_depth < -1 {
            return Err(Error::config(format!(
                "max_depth must be -1 or greater, got {}",
                self.max_depth
            )));
        }

        if self.debounce_ms == 0 {
            return Err(Error::config("debounce_ms cannot be 0"));
        }

        if self.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(Error::config(format!(
                "debounce_ms cannot exceed {MAX_DEBOUNCE_MS}"
            )));
        }

        if self.ignore_patterns.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::config("ignore patterns cannot be empty"));
        }

        Ok(())
    }

    /// Debounce window as a `Duration`.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
