//! Configuration management for the render core
//!
//! Runtime configuration is loaded from a JSON file so render period, engine
//! batch size and queue depths can be tuned without recompiling. Every section
//! falls back to defaults when missing, and a missing or malformed file falls
//! back to the full default configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::audio::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_GENERATE_BATCH, DEFAULT_MAX_ADAPTERS};

/// Default location of the config file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "assets/render_config.json";

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub render: RenderConfig,
    pub playback: PlaybackConfig,
    pub output: OutputConfig,
}

/// Render-domain sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Samples per render callback (hint for device backends)
    pub block_size: usize,
    /// Samples requested from the engine per `generate` call
    pub generate_batch: usize,
    /// Queue depth of each control channel direction
    pub channel_capacity: usize,
    /// Render adapters a shared context can host
    pub max_controllers: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            block_size: 128,
            generate_batch: DEFAULT_GENERATE_BATCH,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_controllers: DEFAULT_MAX_ADAPTERS,
        }
    }
}

/// Control-domain playback behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Rate used when a controller does not ask for one
    pub default_sample_rate: u32,
    /// Parse expressions on the control side before sending `play`
    pub validate_before_play: bool,
    /// How long `wait_ready` callers should wait by default
    pub ready_timeout_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_sample_rate: 44100,
            validate_before_play: true,
            ready_timeout_ms: 2000,
        }
    }
}

/// Output device selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Device name; `None` picks the host default
    pub device: Option<String>,
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The loaded configuration, or the defaults if the file is missing,
    /// malformed or fails validation
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                return Self::default();
            }
        };

        let config: AppConfig = match serde_json::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                log::warn!(
                    "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                return Self::default();
            }
        };

        if let Err(reason) = config.validate() {
            log::warn!(
                "[Config] Invalid configuration in {:?}: {}. Using defaults.",
                path.as_ref(),
                reason
            );
            return Self::default();
        }

        log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
        config
    }

    /// Load configuration from the default location
    pub fn load() -> Self {
        Self::load_from_file(DEFAULT_CONFIG_PATH)
    }

    /// Reject values the render core cannot run with
    pub fn validate(&self) -> Result<(), String> {
        let sizes = [
            ("render.block_size", self.render.block_size),
            ("render.generate_batch", self.render.generate_batch),
            ("render.channel_capacity", self.render.channel_capacity),
            ("render.max_controllers", self.render.max_controllers),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(format!("{} must be greater than 0", name));
            }
        }
        if self.playback.default_sample_rate == 0 {
            return Err("playback.default_sample_rate must be greater than 0".to_string());
        }
        Ok(())
    }
}
