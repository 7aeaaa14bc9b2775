//! Configuration management for xdna-upscale.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (XDNA_UPSCALE_MAX_CYCLES, etc.)
//! 2. Project-local config file (`./xdna-upscale.toml`)
//! 3. User config file (`~/.config/xdna-upscale/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # xdna-upscale.toml
//!
//! # Watchdog for a single run
//! max_cycles = 1000000
//!
//! # Record and print the scheduler trace
//! trace = false
//!
//! # Directory searched for <preset>.toml before the built-in presets
//! preset_dir = "presets"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// xdna-upscale configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Cycles a run may take before the watchdog fails it.
    pub max_cycles: Option<u64>,

    /// Record the scheduler trace and print it after the run.
    pub trace: Option<bool>,

    /// Directory holding user pipeline declarations.
    pub preset_dir: Option<String>,

    /// Preset run when none is named on the command line.
    pub default_preset: Option<String>,
}

impl Config {
    pub const DEFAULT_MAX_CYCLES: u64 = 1_000_000;

    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `xdna-upscale.toml`
    /// 3. User config `~/.config/xdna-upscale/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    pub fn max_cycles(&self) -> u64 {
        self.max_cycles.unwrap_or(Self::DEFAULT_MAX_CYCLES)
    }

    pub fn trace(&self) -> bool {
        self.trace.unwrap_or(false)
    }

    /// Preset directory, `./presets` by default.
    pub fn preset_dir(&self) -> PathBuf {
        PathBuf::from(self.preset_dir.as_deref().unwrap_or("presets"))
    }

    pub fn default_preset(&self) -> String {
        self.default_preset
            .clone()
            .unwrap_or_else(|| "tent3x3".to_string())
    }

    /// Load user configuration from ~/.config/xdna-upscale/config.toml
    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./xdna-upscale.toml
    fn load_local_config() -> Option<Self> {
        let local_path = Path::new("xdna-upscale.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("xdna-upscale.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.max_cycles.is_some() {
            self.max_cycles = other.max_cycles;
        }
        if other.trace.is_some() {
            self.trace = other.trace;
        }
        if other.preset_dir.is_some() {
            self.preset_dir = other.preset_dir;
        }
        if other.default_preset.is_some() {
            self.default_preset = other.default_preset;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(value) = var("XDNA_UPSCALE_MAX_CYCLES") {
            match value.parse() {
                Ok(cycles) => {
                    log::info!("Using XDNA_UPSCALE_MAX_CYCLES from environment: {}", cycles);
                    self.max_cycles = Some(cycles);
                }
                Err(e) => log::warn!("Ignoring XDNA_UPSCALE_MAX_CYCLES={}: {}", value, e),
            }
        }
        if let Some(value) = var("XDNA_UPSCALE_TRACE") {
            self.trace = Some(matches!(value.as_str(), "1" | "true" | "yes" | "on"));
        }
        if let Some(dir) = var("XDNA_UPSCALE_PRESET_DIR") {
            log::info!("Using XDNA_UPSCALE_PRESET_DIR from environment: {}", dir);
            self.preset_dir = Some(dir);
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("xdna-upscale").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# xdna-upscale configuration
# Place this file at ~/.config/xdna-upscale/config.toml or ./xdna-upscale.toml

# Cycles a single run may take before it is failed
max_cycles = 1000000

# Print the scheduler trace (acquire/release/compute events) after each run
# trace = true

# Directory searched for <preset>.toml before the built-in presets
# preset_dir = "presets"

# Preset to run when none is given on the command line
# default_preset = "tent3x3"
"#
        .to_string()
    }
}
