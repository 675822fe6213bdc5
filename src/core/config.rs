//! Configuration management for the perfect-map generator
//!
//! The library itself only takes configuration by value; this module is how
//! the command line front end assembles those values from a TOML file, the
//! environment and built-in defaults.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "perfect-map.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External hash solver
    pub solver: SolverConfig,

    /// Generated text options
    pub output: OutputConfig,

    /// Enum reverse-map driver
    pub enum_maps: EnumMapsConfig,

    /// Logging staging-table driver
    pub log_table: LogTableConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// External solver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Program to run (looked up on PATH)
    pub program: String,

    /// Randomised search iterations per run
    pub iterations: u32,

    /// Hash table size multiple
    pub size_multiple: u32,

    /// Randomise the initial weight table (disable for reproducible output)
    pub randomize: bool,

    /// Extra arguments appended after the fixed flag set
    pub extra_args: Vec<String>,
}

/// Generated text options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Emit the generated documentation comment above each function
    pub header_comments: bool,
}

/// Enum reverse-map driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumMapsConfig {
    /// Enum names never turned into maps
    pub skip: Vec<String>,

    /// Label prefixes stripped for enums whose name has a given prefix
    pub label_prefixes: Vec<LabelPrefixRule>,
}

/// Strip `label_prefix` from labels of enums whose name starts with `enum_prefix`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPrefixRule {
    /// Enum name prefix the rule applies to
    pub enum_prefix: String,
    /// Label prefix removed from the payload string
    pub label_prefix: String,
}

/// Logging staging-table driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogTableConfig {
    /// Enum listing the standard log keys
    pub enum_name: String,

    /// Number of slots reserved for ad-hoc key/value pairs
    pub adhoc_slots: usize,

    /// Default values for standard keys, by label
    pub defaults: BTreeMap<String, String>,

    /// Name of the generated key-to-slot lookup function
    pub lookup_name: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, compact)
    pub format: String,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            program: "gperf".to_string(),
            iterations: 200,
            size_multiple: 4,
            randomize: true,
            extra_args: Vec::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { header_comments: true }
    }
}

impl Default for EnumMapsConfig {
    fn default() -> Self {
        Self {
            skip: Vec::new(),
            label_prefixes: vec![LabelPrefixRule {
                enum_prefix: "kv_log".to_string(),
                label_prefix: "K_".to_string(),
            }],
        }
    }
}

impl Default for LogTableConfig {
    fn default() -> Self {
        let mut defaults = BTreeMap::new();
        defaults.insert("type".to_string(), "unknown".to_string());
        defaults.insert("severity".to_string(), "SEV_UNKNOWN".to_string());
        Self {
            enum_name: "gx_log_standard_keys".to_string(),
            adhoc_slots: 40,
            defaults,
            lookup_name: "_gx_log_key_idx".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default file (if present) and environment
    pub fn load() -> Result<Self> {
        let mut config = if Path::new(DEFAULT_CONFIG_FILE).exists() {
            Self::read_file(DEFAULT_CONFIG_FILE)?
        } else {
            Config::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without consulting the environment
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(program) = var("PM_SOLVER") {
            self.solver.program = program;
        }

        if let Some(iterations) = var("PM_SOLVER_ITERATIONS") {
            self.solver.iterations = iterations
                .parse()
                .map_err(|e| Error::config(format!("Invalid solver iterations: {}", e)))?;
        }

        if let Some(level) = var("PM_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = var("PM_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.solver.program.trim().is_empty() {
            return Err(Error::config("Solver program must not be empty"));
        }

        if self.solver.iterations == 0 {
            return Err(Error::config("Solver iterations must be at least 1"));
        }

        if self.solver.size_multiple == 0 {
            return Err(Error::config("Solver size multiple must be at least 1"));
        }

        if self.log_table.enum_name.is_empty() || self.log_table.lookup_name.is_empty() {
            return Err(Error::config("Log table enum and lookup names must be set"));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config("Invalid log level")),
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" => {}
            _ => return Err(Error::config("Invalid log format (pretty, compact)")),
        }

        Ok(())
    }
}
