//! Series filtering before analysis.
//!
//! A [`FilterPipeline`] runs an ordered chain of [`SeriesFilter`] stages over
//! every series of a [`SeriesSet`]. A series rejected by one stage is carried
//! through the rest of the chain as [`FilterVerdict::Rejected`] and dropped
//! from the output; no later stage can bring it back.
//!
//! # Examples
//!
//! ```rust
//! use perfshift::filter::{FilterPipeline, MinMean, MinVersions};
//! use perfshift::series::{SeriesBuilder, SeriesSet};
//!
//! let mut set = SeriesSet::new();
//! set.insert(SeriesBuilder::new("p", "short").revision("r1", &[5.0]).revision("r2", &[5.0]).build())?;
//! set.insert(
//!     SeriesBuilder::new("p", "long")
//!         .revision("r1", &[5.0])
//!         .revision("r2", &[5.0])
//!         .revision("r3", &[5.0])
//!         .build(),
//! )?;
//!
//! let pipeline = FilterPipeline::new()
//!     .add(MinVersions::new(3))
//!     .add(MinMean::new(1.0));
//! let kept = pipeline.apply(&set)?;
//! assert_eq!(kept.test_names(), ["long"]);
//! # Ok::<(), perfshift::error::PerfShiftError>(())
//! ```

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::log_rejection;
use crate::logging::{truncate_field, LogConfig};
use crate::series::{stats, ExecutionSeries, SeriesSet};

/// A predicate stage of the filter pipeline.
pub trait SeriesFilter: Send + Sync + fmt::Debug {
    /// Name used in logs and in pipeline configuration.
    fn name(&self) -> &str;

    /// Returns true if the series passes this stage.
    fn accepts(&self, series: &ExecutionSeries) -> bool;
}

/// Keeps series measured at no fewer than `min` revisions.
#[derive(Debug, Clone)]
pub struct MinVersions {
    min: usize,
}

impl MinVersions {
    pub fn new(min: usize) -> Self {
        Self { min }
    }
}

impl SeriesFilter for MinVersions {
    fn name(&self) -> &str {
        "minVersions"
    }

    fn accepts(&self, series: &ExecutionSeries) -> bool {
        series.len() >= self.min
    }
}

/// Keeps series whose mean of per-revision means reaches `min`.
#[derive(Debug, Clone)]
pub struct MinMean {
    min: f64,
}

impl MinMean {
    pub fn new(min: f64) -> Self {
        Self { min }
    }
}

impl SeriesFilter for MinMean {
    fn name(&self) -> &str {
        "minMean"
    }

    fn accepts(&self, series: &ExecutionSeries) -> bool {
        stats::mean_of_revision_means(series).is_some_and(|mean| mean >= self.min)
    }
}

/// Keeps series whose median of per-revision medians reaches `min`.
#[derive(Debug, Clone)]
pub struct MinMedian {
    min: f64,
}

impl MinMedian {
    pub fn new(min: f64) -> Self {
        Self { min }
    }
}

impl SeriesFilter for MinMedian {
    fn name(&self) -> &str {
        "minMedian"
    }

    fn accepts(&self, series: &ExecutionSeries) -> bool {
        stats::median_of_revision_medians(series).is_some_and(|median| median >= self.min)
    }
}

/// What a stage hands to the next one.
#[derive(Debug, Clone)]
pub enum FilterVerdict {
    /// The series passed every stage so far.
    Retained(Arc<ExecutionSeries>),
    /// The series was rejected by the named stage.
    Rejected { stage: String },
}

impl FilterVerdict {
    pub fn is_retained(&self) -> bool {
        matches!(self, FilterVerdict::Retained(_))
    }
}

/// Ordered chain of filter stages.
#[derive(Debug, Default)]
pub struct FilterPipeline {
    stages: Vec<Box<dyn SeriesFilter>>,
    log_config: LogConfig,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage to the chain.
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, stage: impl SeriesFilter + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Appends an already boxed stage.
    pub fn add_boxed(mut self, stage: Box<dyn SeriesFilter>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    /// Stage names in order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs one series through every stage.
    pub fn evaluate(&self, series: Arc<ExecutionSeries>) -> FilterVerdict {
        self.stages
            .iter()
            .fold(FilterVerdict::Retained(series), |verdict, stage| match verdict {
                FilterVerdict::Retained(series) if stage.accepts(&series) => {
                    FilterVerdict::Retained(series)
                }
                FilterVerdict::Retained(series) => {
                    log_rejection!(
                        self.log_config,
                        test = %truncate_field(series.test(), self.log_config.max_field_length),
                        stage = stage.name(),
                        "Series rejected"
                    );
                    FilterVerdict::Rejected {
                        stage: stage.name().to_string(),
                    }
                }
                rejected => rejected,
            })
    }

    /// Returns a new set holding only the series that pass every stage, in
    /// their original order.
    #[instrument(skip(self, set), fields(stages = self.stages.len(), series = set.len()))]
    pub fn apply(&self, set: &SeriesSet) -> Result<SeriesSet> {
        let mut kept = SeriesSet::with_heading(set.heading().to_vec());
        let mut rejected = 0usize;

        for series in set.iter() {
            match self.evaluate(Arc::clone(series)) {
                FilterVerdict::Retained(series) => kept.insert(series)?,
                FilterVerdict::Rejected { .. } => rejected += 1,
            }
        }

        if self.log_config.log_summaries {
            info!(kept = kept.len(), rejected, "Filter pipeline finished");
        } else {
            debug!(kept = kept.len(), rejected, "Filter pipeline finished");
        }
        Ok(kept)
    }
}
