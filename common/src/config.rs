use config::{Config, ConfigError};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

pub const DEFAULT_DATETIME_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub modeling: ModelingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_path")]
    pub path: PathBuf,
    #[serde(default = "default_datetime_format")]
    pub datetime_format: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WarehouseConfig {
    #[serde(default = "default_warehouse_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_report_path")]
    pub path: PathBuf,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

/// Knobs of the dimensional-modeling step.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelingConfig {
    #[serde(default)]
    pub key_order: KeyOrder,
    #[serde(default)]
    pub key_match: KeyMatch,
    #[serde(default)]
    pub join_miss: JoinMissPolicy,
}

/// Order in which distinct natural keys receive surrogate keys.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrder {
    /// Sorted by natural key, stable for a given set of combinations.
    #[default]
    Natural,
    /// Order of first occurrence in the source extract.
    FirstAppearance,
}

/// How text natural-key columns are compared when deduplicating and joining.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyMatch {
    #[default]
    Exact,
    CaseInsensitive,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JoinMissPolicy {
    /// Leave the foreign key null and keep the fact row.
    #[default]
    Null,
    Fail,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: default_source_path(),
            datetime_format: default_datetime_format(),
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: default_warehouse_path(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: default_report_path(),
            top_n: default_top_n(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_source_path() -> PathBuf {
    PathBuf::from("data/SuperMarket Analysis.csv")
}

fn default_datetime_format() -> String {
    DEFAULT_DATETIME_FORMAT.to_string()
}

fn default_warehouse_path() -> PathBuf {
    PathBuf::from("db/sales")
}

fn default_report_path() -> PathBuf {
    PathBuf::from("data/report.csv")
}

fn default_top_n() -> usize {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Loads settings from `path` (optional) layered under `APP_*` environment variables.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;

        debug!(
            source = %settings.source.path.display(),
            warehouse = %settings.warehouse.path.display(),
            modeling = ?settings.modeling,
            "Loaded settings"
        );

        Ok(settings)
    }
}
