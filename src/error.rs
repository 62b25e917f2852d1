// Errors shared by every pipeline stage.
use thiserror::Error;

/// Everything that can stop the pipeline before predictions are written.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to fetch '{url}': {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("The required column '{0}' was not found in the input table.")]
    MissingColumn(String),
    #[error("Column '{column}' has no usable values ({reason}).")]
    InsufficientData { column: String, reason: String },
    #[error("Percentiles must satisfy 0 < lower < upper < 1 (got lower={lower}, upper={upper}).")]
    InvalidPercentiles { lower: f64, upper: f64 },
    #[error("Train fraction must lie in [0, 1], got {0}.")]
    InvalidFraction(f64),
    #[error("Row {0} has no strikeout group after imputation.")]
    MissingGroup(usize),
    #[error("Model fit failed: {0}")]
    Fit(String),
}

impl PipelineError {
    pub fn insufficient(column: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::InsufficientData {
            column: column.into(),
            reason: reason.into(),
        }
    }
}
