//! Error taxonomy for the RFML pipeline

use thiserror::Error;

/// Errors raised by feature building, segmentation and prediction
#[derive(Debug, Error)]
pub enum RfmlError {
    /// A required column is missing, has the wrong type or holds unusable values
    #[error("schema error: {0}")]
    Schema(String),

    /// A date cell could not be turned into a timestamp
    #[error("cannot parse {column} at row {row}: {value:?}")]
    Parse {
        column: String,
        row: usize,
        value: Option<String>,
    },

    /// Not enough distinguishable rows to fit the requested number of segments
    #[error("degenerate fit: {available} {what} for {segments} segments")]
    DegenerateFit {
        what: &'static str,
        available: usize,
        segments: usize,
    },

    /// A read method was called on a component that has not been fitted
    #[error("{0} has not been fitted")]
    NotFitted(&'static str),

    /// Two inputs that must line up row for row do not
    #[error("shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("mixture model: {0}")]
    Mixture(#[from] linfa_clustering::GmmError),

    #[error("feature scaling: {0}")]
    Scaling(#[from] linfa_preprocessing::PreprocessingError),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl RfmlError {
    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub(crate) fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
