use arrow::error::ArrowError;
use datafusion::error::DataFusionError;
use parquet::errors::ParquetError;
use thiserror::Error;

pub mod config;
pub mod telemetry;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("DataFusion error: {0}")]
    DataFusion(#[from] DataFusionError),

    /// The source extract does not have the expected header or a field fails to parse.
    #[error("Input format error: {0}")]
    InputFormat(String),

    /// Raised only when the join-miss policy is `fail`.
    #[error("{rows} fact row(s) have no matching {dimension} entry")]
    JoinMiss { dimension: String, rows: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Schema missing: {0}")]
    SchemaMissing(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Errors raised while reading the persisted schema back for reporting.
    pub fn is_report_query_error(&self) -> bool {
        matches!(self, Error::SchemaMissing(_) | Error::SchemaMismatch(_))
    }
}
