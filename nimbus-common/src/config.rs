//! Configuration loading for Nimbus client components
//!
//! Configuration values resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level client configuration file contents
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    /// Audio pipeline settings
    #[serde(default)]
    pub audio: AudioSettings,
}

/// Tunables for the audio playback pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Output device name (None = system default)
    pub device: Option<String>,

    /// Replace device output with timed sleeps (headless environments)
    pub simulate: bool,

    /// Number of pre-allocated decode buffers; also bounds queue depth
    pub pool_slots: usize,

    /// Sample capacity of each decode buffer
    pub slot_samples: usize,

    /// Consumer thread gives up after this long with no new frames
    pub consumer_timeout_ms: u64,

    /// Queue is cleared (resync) when the overflow clock exceeds this
    pub resync_after_ms: u64,

    /// Every Nth frame-level event is logged
    pub log_interval: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            device: None,
            simulate: false,
            pool_slots: 80,
            slot_samples: 1920,
            consumer_timeout_ms: 3000,
            resync_after_ms: 1000,
            log_interval: 200,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))
    }
}

/// Resolve the config file path following the priority order above
pub fn resolve_config_path(cli_arg: Option<&str>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return Some(PathBuf::from(path));
    }

    // Priority 3: conventional location, if it exists
    let conventional = PathBuf::from("nimbus.toml");
    if conventional.exists() {
        return Some(conventional);
    }

    // Priority 4: compiled defaults (no file)
    None
}
