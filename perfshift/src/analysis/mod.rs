//! Change-point detection over whole series sets.
//!
//! [`oracle`] defines what a detection procedure looks like and ships a
//! subprocess-backed implementation. [`pipeline`] fans the series of a set
//! out to a bounded pool of workers and folds the detections into one
//! [`ChangePointSet`](crate::changepoint::ChangePointSet).

pub mod oracle;
pub mod pipeline;

pub use oracle::{
    AnalysisOracle, CommandOracle, CommandSession, DetectionRule, OracleInput, OracleResponse,
};
pub use pipeline::{
    AnalysisOutcome, AnalysisPipeline, AnalysisReport, ProgressCallback, SeriesFailure,
    SeriesState, DEFAULT_MAX_WORKERS,
};
