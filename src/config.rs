//! Configuration for the watch tool.
//!
//! Settings are layered, later layers winning:
//! - Default values
//! - TOML configuration file (`ttswatch.toml`)
//! - Environment variable overrides
//! - CLI argument overrides (applied by the binary)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `TTSWATCH_` and use double
//! underscores to separate nested levels:
//! - `TTSWATCH_WATCH__DEBOUNCE_MS=250` sets `watch.debounce_ms`
//! - `TTSWATCH_WATCH__INCLUDE_DIR=lib` sets `watch.include_dir`
//! - `TTSWATCH_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default configuration file name, looked up in the current directory.
pub const CONFIG_FILE: &str = "ttswatch.toml";

const ENV_PREFIX: &str = "TTSWATCH_";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    /// Watched roots and quiet period
    #[serde(default)]
    pub watch: WatchConfig,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// Root of shared include files
    #[serde(default = "default_include_dir")]
    pub include_dir: PathBuf,

    /// Root of per-object scripts
    #[serde(default = "default_script_dir")]
    pub script_dir: PathBuf,

    /// Quiet period before a batch is delivered
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Extension of script and include files, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Level applied to every target without an override
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `ttswatch = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_include_dir() -> PathBuf { PathBuf::from("include") }
fn default_script_dir() -> PathBuf { PathBuf::from("scripts") }
fn default_debounce_ms() -> u64 { 500 }
fn default_extension() -> String { "ttslua".to_string() }
fn default_log_level() -> String { "warn".to_string() }

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            include_dir: default_include_dir(),
            script_dir: default_script_dir(),
            debounce_ms: default_debounce_ms(),
            extension: default_extension(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources, using `ttswatch.toml` in the
    /// current directory when present.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::load_from(CONFIG_FILE)
    }

    /// Load configuration from a specific file plus the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref(), ENV_PREFIX)
            .extract()
            .map_err(Box::new)
    }

    fn figment(path: &Path, env_prefix: &str) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path))
            // Double underscore separates nested levels; single underscores
            // stay part of the field name
            .merge(Env::prefixed(env_prefix).split("__"))
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file in the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}
