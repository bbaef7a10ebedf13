//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - kontra.toml (default configuration)
//! - kontra.local.toml (git-ignored local overrides)
//! - Environment variables (KONTRA_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # kontra.toml
//! [execution]
//! preplan = "auto"
//! pushdown = "auto"
//! sample_budget = 50
//!
//! [storage]
//! state_dir = "/var/lib/kontra/state"
//! stage_csv = true
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! KONTRA_EXECUTION__PUSHDOWN=off
//! KONTRA_STORAGE__STATE_DIR=/custom/path
//! ```

use crate::options::{ExecutionOptions, TierMode};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default execution options for validation calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Metadata preplan tier (on/off/auto)
    #[serde(default)]
    pub preplan: TierMode,

    /// SQL pushdown tier (on/off/auto)
    #[serde(default)]
    pub pushdown: TierMode,

    /// Restrict materialization to required columns
    #[serde(default = "default_true")]
    pub projection: bool,

    /// Default tally for rules without an explicit setting
    #[serde(default)]
    pub tally: bool,

    /// Per-rule sample cap default
    #[serde(default)]
    pub sample: usize,

    /// Per-call sample budget (0 = only per-rule caps apply)
    #[serde(default)]
    pub sample_budget: usize,

    /// Push approximate SQL translations down anyway
    #[serde(default)]
    pub approximate_sql: bool,

    /// IN (...) list size cap before demotion to local
    #[serde(default = "default_in_list_max")]
    pub in_list_max: usize,

    /// Worker threads for the fallback executor (0 = all cores)
    #[serde(default)]
    pub num_threads: usize,
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for scoped staging; system temp when unset
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// State-store directory for saved validation runs
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Stage CSV datasets as Parquet before repeated reads
    #[serde(default)]
    pub stage_csv: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_true() -> bool {
    true
}
fn default_in_list_max() -> usize {
    1000
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("./kontra-state")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            preplan: TierMode::Auto,
            pushdown: TierMode::Auto,
            projection: true,
            tally: false,
            sample: 0,
            sample_budget: 0,
            approximate_sql: false,
            in_list_max: default_in_list_max(),
            num_threads: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            staging_dir: None,
            state_dir: default_state_dir(),
            stage_csv: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. kontra.toml (base configuration)
    /// 2. kontra.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (KONTRA_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("kontra.toml"))
            .merge(Toml::file("kontra.local.toml"))
            .merge(Env::prefixed("KONTRA_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("KONTRA_").split("__"))
            .extract()
    }

    /// Per-call options seeded from the configured defaults
    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            preplan: self.execution.preplan,
            pushdown: self.execution.pushdown,
            projection: self.execution.projection,
            tally_default: self.execution.tally,
            tally_override: None,
            sample: self.execution.sample,
            sample_budget: self.execution.sample_budget,
            sample_columns: Default::default(),
            approximate_sql: self.execution.approximate_sql,
            in_list_max: self.execution.in_list_max,
            dry_run: false,
            deadline: None,
        }
    }
}

/// Install a tracing subscriber per the logging config. Intended for
/// binaries and tests; embedding applications bring their own.
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    // A second init in the same process keeps the first subscriber
    let _ = result;
}
