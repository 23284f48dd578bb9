//! Prelude for commonly used types and traits in perfshift.

pub use crate::analysis::{
    AnalysisOracle, AnalysisOutcome, AnalysisPipeline, CommandOracle, DetectionRule, OracleInput,
    OracleResponse, SeriesState,
};
pub use crate::changepoint::{
    remove_duplicate_tests, ChangePoint, ChangePointSet, ChangePointType, Direction,
};
pub use crate::config::{PipelineConfig, PipelinePlan};
pub use crate::error::{ErrorContext, PerfShiftError, Result};
pub use crate::filter::{FilterPipeline, MinMean, MinMedian, MinVersions, SeriesFilter};
pub use crate::logging::LogConfig;
pub use crate::runner::{PipelineRunner, RunArtifacts};
pub use crate::series::{ExecutionSample, ExecutionSeries, SeriesBuilder, SeriesSet};
