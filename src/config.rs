//! Ingestion options.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// How the sorter decides when to release packets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortingMode {
    /// Use flush/read-buffer barriers to release incrementally.
    #[default]
    DefaultHeuristics,
    /// Buffer the whole trace and release once at end of file.
    ForceFullSort,
    /// Deprecated alias; behaves exactly like `default_heuristics`.
    ForceFlushPeriodWindowedSort,
}

impl SortingMode {
    pub fn is_full_sort(self) -> bool {
        matches!(self, SortingMode::ForceFullSort)
    }
}

/// Where the downstream ftrace module starts keeping data. The core only
/// publishes the service-event timestamps this policy needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropFtraceDataBefore {
    #[default]
    TracingStarted,
    NoDrop,
    AllDataSourcesStarted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sorting_mode: SortingMode,
    /// Passed through to the downstream ftrace module; core behavior is
    /// unaffected.
    pub ingest_ftrace_in_raw_table: bool,
    pub drop_ftrace_data_before: DropFtraceDataBefore,
    /// Consumed by the metrics layer, not the core.
    pub skip_builtin_metric_paths: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sorting_mode: SortingMode::default(),
            ingest_ftrace_in_raw_table: true,
            drop_ftrace_data_before: DropFtraceDataBefore::default(),
            skip_builtin_metric_paths: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
