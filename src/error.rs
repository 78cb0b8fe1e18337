use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A sheet is missing one or more required columns. Fatal for the load.
    #[error("Schema error: sheet '{sheet}' is missing required column(s): {}", .missing.join(", "))]
    Schema { sheet: String, missing: Vec<String> },

    /// The combined filters excluded every row.
    #[error("No data matches the selected filters: {0}")]
    EmptyResult(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl PipelineError {
    pub fn is_empty_result(&self) -> bool {
        matches!(self, PipelineError::EmptyResult(_))
    }
}

impl From<polars::error::PolarsError> for PipelineError {
    fn from(err: polars::error::PolarsError) -> Self {
        PipelineError::Polars(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for PipelineError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        PipelineError::Export(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// A cell that failed numeric or date coercion. The value is loaded as null
/// and the row is kept.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ParseWarning {
    /// 1-based data row (header excluded).
    pub row: usize,
    pub column: String,
    pub value: String,
    pub reason: String,
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "row {}, column '{}': {} ({:?})",
            self.row, self.column, self.reason, self.value
        )
    }
}
