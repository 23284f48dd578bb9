//! Error types for the perfshift change-point pipeline.
//!
//! All fallible operations in the crate return [`PerfShiftError`] through the
//! [`Result`] alias. The variants fall into four groups:
//!
//! - **Input and configuration** errors are raised before any stage runs.
//! - **Per-series analysis** errors are logged by the analysis pipeline and
//!   only exclude the affected series from the output.
//! - **Cancellation** is reported through [`PerfShiftError::Canceled`] and is
//!   never logged as a failure.
//! - **Internal consistency** errors (merge type mismatch, test collisions)
//!   indicate a logic bug upstream and are surfaced to the caller.

use thiserror::Error;

/// The main error type for the perfshift crate.
#[derive(Error, Debug)]
pub enum PerfShiftError {
    /// Malformed pipeline configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A stage name that the pipeline does not know about.
    #[error("Unknown stage '{name}'")]
    UnknownStage { name: String },

    /// A filter or analysis function name that the stage does not know about.
    #[error("Unknown {stage} function '{name}', expected one of {expected:?}")]
    UnknownFunction {
        /// Stage the function was configured for
        stage: String,
        /// Name given in the configuration
        name: String,
        /// Names accepted by the stage
        expected: Vec<String>,
    },

    /// A function parameter with the wrong arity or type.
    #[error("Invalid parameter for '{function}': {message}")]
    InvalidParameter { function: String, message: String },

    /// The flagged revision is the last one of its series, so there is no
    /// following revision to compare against.
    #[error("Revision '{revision}' is the last revision of test '{test}' and cannot be classified")]
    InvalidRevisionPosition { revision: String, test: String },

    /// A revision without any recorded samples.
    #[error("No samples recorded for revision '{revision}' of test '{test}'")]
    MissingRevisionData { revision: String, test: String },

    /// A revision that is not part of the series at all.
    #[error("Revision '{revision}' is not contained in test '{test}'")]
    UnknownRevision { revision: String, test: String },

    /// Two change points with different keys were asked to merge.
    #[error("Change points are not compatible: {left} != {right}")]
    IncompatibleChangePoints { left: String, right: String },

    /// Two detections claim the same (test, revision) pair.
    #[error("Test '{test}' was detected twice at revision '{revision}'")]
    TestCollision { test: String, revision: String },

    /// The analysis oracle failed for a series.
    #[error("Oracle '{oracle}' failed: {message}")]
    Oracle { oracle: String, message: String },

    /// The analysis oracle returned a result that does not match the
    /// expected shape.
    #[error("Oracle '{oracle}' returned a result of the wrong shape: expected {expected}, got {actual}")]
    ResultShape {
        oracle: String,
        expected: String,
        actual: String,
    },

    /// The operation observed cancellation.
    #[error("Operation canceled")]
    Canceled,

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, PerfShiftError>`.
pub type Result<T> = std::result::Result<T, PerfShiftError>;

impl PerfShiftError {
    /// Creates a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a new invalid parameter error.
    pub fn invalid_parameter(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Creates a new oracle failure.
    pub fn oracle(oracle: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Oracle {
            oracle: oracle.into(),
            message: message.into(),
        }
    }

    /// Creates a new result shape error.
    pub fn result_shape(
        oracle: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ResultShape {
            oracle: oracle.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Returns true if this error only reports cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl From<serde_json::Error> for PerfShiftError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for PerfShiftError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, msg: &str) -> Result<T>;

    /// Adds context with a lazy message.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<PerfShiftError>,
{
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| match e.into() {
            PerfShiftError::Internal(inner) => PerfShiftError::Internal(format!("{msg}: {inner}")),
            other => PerfShiftError::Internal(format!("{msg}: {other}")),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let msg = f();
            match e.into() {
                PerfShiftError::Internal(inner) => {
                    PerfShiftError::Internal(format!("{msg}: {inner}"))
                }
                other => PerfShiftError::Internal(format!("{msg}: {other}")),
            }
        })
    }
}
