//! Error taxonomy for the feed pipeline.

use crate::season::Period;
use crate::table::TableName;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Transport failure or non-success status while fetching a document.
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// A feed index row whose start date is not `YYYYMMDD`.
    #[error("malformed feed record: feed_start_date {raw_date:?} is not YYYYMMDD")]
    MalformedFeedRecord { raw_date: String },

    #[error("table {table} not found in archive")]
    TableNotFound { table: TableName },

    #[error("table {table} is missing essential column {column}")]
    MissingEssentialColumn { table: String, column: String },

    /// Two non-empty tables joined into nothing, usually a key normalization mismatch.
    #[error("joining {left} with {right} on {on} produced no rows")]
    JoinProducedEmptyResult {
        left: String,
        right: String,
        on: String,
    },

    #[error("no feed published for {0}")]
    NoFeedForPeriod(Period),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Bad flags, unknown names, unusable configuration. Always fatal.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl PipelineError {
    pub fn network(url: &str, message: impl ToString) -> Self {
        PipelineError::Network {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    pub fn missing_column(table: &str, column: &str) -> Self {
        PipelineError::MissingEssentialColumn {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    /// Whether the error only affects one (year, season, table) combination.
    ///
    /// Recoverable errors shrink the dataset and are reported; the rest abort the run.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PipelineError::InvalidInput(_))
    }

    /// Short machine-friendly label used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Network { .. } => "network_error",
            PipelineError::MalformedFeedRecord { .. } => "malformed_feed_record",
            PipelineError::TableNotFound { .. } => "table_not_found",
            PipelineError::MissingEssentialColumn { .. } => "missing_essential_column",
            PipelineError::JoinProducedEmptyResult { .. } => "join_produced_empty_result",
            PipelineError::NoFeedForPeriod(_) => "no_feed_for_period",
            PipelineError::Archive(_) => "archive_error",
            PipelineError::Csv(_) => "csv_error",
            PipelineError::Json(_) => "json_error",
            PipelineError::Io(_) => "io_error",
            PipelineError::InvalidInput(_) => "invalid_input",
        }
    }
}
