//! Engine error types

use common::FeedError;
use thiserror::Error;

/// Errors that stop the engine from starting or running
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration rejected by validation
    #[error("Invalid configuration: {message}")]
    Config {
        /// Why the configuration was rejected
        message: String,
    },

    /// Warm-up history could not be fetched
    #[error("Warm-up failed for {pair}: {source}")]
    Warmup {
        /// Pair being primed
        pair: String,
        /// Underlying feed error
        source: FeedError,
    },

    /// Feed connection failed after retries
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    /// Configuration file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while writing series into a [`crate::DataFrame`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataFrameError {
    /// Series length differs from the frame length
    #[error("Series {name} has {actual} values, frame has {expected}")]
    LengthMismatch {
        /// Series name
        name: String,
        /// Frame length
        expected: usize,
        /// Provided length
        actual: usize,
    },

    /// Indicator name is blank
    #[error("Indicator name must not be empty")]
    EmptyName,
}
