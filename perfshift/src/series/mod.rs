//! Benchmark measurements grouped into per-test series.
//!
//! An [`ExecutionSeries`] holds every [`ExecutionSample`] recorded for one test,
//! grouped by revision in the order the revisions were first seen. A
//! [`SeriesSet`] is the insertion-ordered store of series for one input.
//!
//! ## Example
//!
//! ```rust
//! use perfshift::series::{SeriesBuilder, SeriesSet};
//!
//! let series = SeriesBuilder::new("parser", "bench::tokenize")
//!     .revision("r1", &[10.0, 10.2])
//!     .revision("r2", &[20.1])
//!     .build();
//!
//! let mut set = SeriesSet::new();
//! set.insert(series)?;
//! assert_eq!(set.len(), 1);
//! assert_eq!(set.get("bench::tokenize").unwrap().revisions(), ["r1", "r2"]);
//! # Ok::<(), perfshift::error::PerfShiftError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::changepoint::{ChangePoint, ChangePointSet};
use crate::error::{PerfShiftError, Result};

pub mod stats;

/// Column heading used when no input heading is known.
pub const DEFAULT_HEADING: [&str; 6] = [
    "project",
    "version",
    "commit",
    "configuration",
    "test",
    "value",
];

/// Label used for samples built without an explicit configuration.
const DEFAULT_CONFIGURATION: &str = "default";

/// One measured value of one test at one revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSample {
    /// Project the benchmark belongs to
    pub project: String,
    /// Release or version label the revision belongs to
    pub version: String,
    /// Revision identifier
    pub commit: String,
    /// Configuration label of the benchmark run
    pub configuration: String,
    /// Test name
    pub test: String,
    /// Measured value
    pub value: f64,
}

impl ExecutionSample {
    /// Creates a sample without a version label.
    pub fn new(
        project: impl Into<String>,
        commit: impl Into<String>,
        configuration: impl Into<String>,
        test: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            project: project.into(),
            version: String::new(),
            commit: commit.into(),
            configuration: configuration.into(),
            test: test.into(),
            value,
        }
    }

    /// Sets the version label.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Returns the sample as a row matching [`DEFAULT_HEADING`].
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.project.clone(),
            self.version.clone(),
            self.commit.clone(),
            self.configuration.clone(),
            self.test.clone(),
            self.value.to_string(),
        ]
    }
}

/// Ordered measurements of a single test.
///
/// The revision-order list and the per-revision sample map always have the
/// same cardinality: a revision is only listed once it has a sample.
#[derive(Debug, Clone)]
pub struct ExecutionSeries {
    project: String,
    test: String,
    revisions: Vec<String>,
    samples: HashMap<String, Vec<ExecutionSample>>,
    change_points: ChangePointSet,
}

impl ExecutionSeries {
    /// Creates an empty series.
    pub fn new(project: impl Into<String>, test: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            test: test.into(),
            revisions: Vec::new(),
            samples: HashMap::new(),
            change_points: ChangePointSet::new(),
        }
    }

    /// Records a sample. A revision seen for the first time is appended to
    /// the revision order.
    ///
    /// # Errors
    ///
    /// Returns an error if the sample belongs to a different test.
    pub fn push(&mut self, sample: ExecutionSample) -> Result<()> {
        if sample.test != self.test {
            return Err(PerfShiftError::invalid_parameter(
                "ExecutionSeries::push",
                format!(
                    "sample for test '{}' cannot be added to series '{}'",
                    sample.test, self.test
                ),
            ));
        }
        match self.samples.get_mut(&sample.commit) {
            Some(existing) => existing.push(sample),
            None => {
                self.revisions.push(sample.commit.clone());
                self.samples.insert(sample.commit.clone(), vec![sample]);
            }
        }
        debug_assert_eq!(self.revisions.len(), self.samples.len());
        Ok(())
    }

    /// Appends every sample of `other`, revision by revision.
    pub fn append(&mut self, other: &ExecutionSeries) -> Result<()> {
        for revision in &other.revisions {
            for sample in other.samples_at(revision).unwrap_or_default() {
                self.push(sample.clone())?;
            }
        }
        Ok(())
    }

    /// Attaches a change point detected in this series.
    pub fn attach_change_point(&mut self, change_point: ChangePoint) -> Result<()> {
        self.change_points.add(change_point)
    }

    /// Copies the series without its attached change points.
    pub fn without_change_points(&self) -> ExecutionSeries {
        ExecutionSeries {
            project: self.project.clone(),
            test: self.test.clone(),
            revisions: self.revisions.clone(),
            samples: self.samples.clone(),
            change_points: ChangePointSet::new(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn test(&self) -> &str {
        &self.test
    }

    /// Revisions in the order they were recorded.
    pub fn revisions(&self) -> &[String] {
        &self.revisions
    }

    /// Number of revisions.
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Total number of samples across all revisions.
    pub fn sample_count(&self) -> usize {
        self.samples.values().map(Vec::len).sum()
    }

    /// Position of a revision in the revision order.
    pub fn position(&self, revision: &str) -> Option<usize> {
        self.revisions.iter().position(|r| r == revision)
    }

    /// Samples recorded at a revision.
    pub fn samples_at(&self, revision: &str) -> Option<&[ExecutionSample]> {
        self.samples.get(revision).map(Vec::as_slice)
    }

    /// Values recorded at a revision.
    pub fn values_at(&self, revision: &str) -> Option<Vec<f64>> {
        self.samples
            .get(revision)
            .map(|samples| samples.iter().map(|s| s.value).collect())
    }

    /// Mean value per revision, in revision order.
    pub fn revision_means(&self) -> Vec<f64> {
        self.per_revision(stats::mean)
    }

    /// Median value per revision, in revision order.
    pub fn revision_medians(&self) -> Vec<f64> {
        self.per_revision(stats::median)
    }

    fn per_revision(&self, reduce: fn(&[f64]) -> Option<f64>) -> Vec<f64> {
        self.revisions
            .iter()
            .filter_map(|r| self.values_at(r))
            .filter_map(|values| reduce(&values))
            .collect()
    }

    /// Change points detected in this series.
    pub fn change_points(&self) -> &ChangePointSet {
        &self.change_points
    }

    /// Every sample, revision by revision.
    pub fn samples(&self) -> impl Iterator<Item = &ExecutionSample> {
        self.revisions
            .iter()
            .filter_map(|r| self.samples.get(r))
            .flatten()
    }
}

/// Fluent construction of a series, mostly for fixtures and adapters.
#[derive(Debug)]
pub struct SeriesBuilder {
    series: ExecutionSeries,
    configuration: String,
}

impl SeriesBuilder {
    pub fn new(project: impl Into<String>, test: impl Into<String>) -> Self {
        Self {
            series: ExecutionSeries::new(project, test),
            configuration: DEFAULT_CONFIGURATION.to_string(),
        }
    }

    /// Sets the configuration label used for subsequent samples.
    pub fn configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = configuration.into();
        self
    }

    /// Records one sample per value at the given revision.
    pub fn revision(mut self, revision: &str, values: &[f64]) -> Self {
        for value in values {
            let sample = ExecutionSample::new(
                self.series.project.clone(),
                revision,
                self.configuration.clone(),
                self.series.test.clone(),
                *value,
            );
            if !self.series.samples.contains_key(revision) {
                self.series.revisions.push(revision.to_string());
            }
            self.series
                .samples
                .entry(revision.to_string())
                .or_default()
                .push(sample);
        }
        self
    }

    /// Records a raw sample.
    pub fn push(mut self, sample: ExecutionSample) -> Result<Self> {
        self.series.push(sample)?;
        Ok(self)
    }

    pub fn build(self) -> ExecutionSeries {
        self.series
    }
}

/// Insertion-ordered collection of series keyed by test name.
#[derive(Debug, Clone)]
pub struct SeriesSet {
    heading: Vec<String>,
    names: Vec<String>,
    series: HashMap<String, Arc<ExecutionSeries>>,
}

impl Default for SeriesSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SeriesSet {
    /// Creates an empty set with the default heading.
    pub fn new() -> Self {
        Self::with_heading(DEFAULT_HEADING.iter().map(|h| h.to_string()).collect())
    }

    /// Creates an empty set with a custom column heading.
    pub fn with_heading(heading: Vec<String>) -> Self {
        Self {
            heading,
            names: Vec::new(),
            series: HashMap::new(),
        }
    }

    /// Builds a set from raw samples, grouping them by test.
    pub fn from_samples(samples: impl IntoIterator<Item = ExecutionSample>) -> Result<Self> {
        let mut set = Self::new();
        for sample in samples {
            set.add_sample(sample)?;
        }
        Ok(set)
    }

    pub fn heading(&self) -> &[String] {
        &self.heading
    }

    /// Records a single sample, creating the test's series on first use.
    pub fn add_sample(&mut self, sample: ExecutionSample) -> Result<()> {
        match self.series.get_mut(&sample.test) {
            Some(existing) => Arc::make_mut(existing).push(sample),
            None => {
                let mut series = ExecutionSeries::new(sample.project.clone(), sample.test.clone());
                let test = sample.test.clone();
                series.push(sample)?;
                self.names.push(test.clone());
                self.series.insert(test, Arc::new(series));
                Ok(())
            }
        }
    }

    /// Inserts a series. If the test is already present, the new samples are
    /// appended to the existing series and its change points are added to the
    /// existing ones. A detection both series carry is kept once.
    pub fn insert(&mut self, series: impl Into<Arc<ExecutionSeries>>) -> Result<()> {
        let series = series.into();
        match self.series.get_mut(series.test()) {
            Some(existing) => {
                let existing = Arc::make_mut(existing);
                existing.append(&series)?;
                for change_point in series.change_points().all() {
                    // a series has at most one test per key, so a known key is a duplicate
                    if existing
                        .change_points
                        .get(change_point.revision(), change_point.change_type())
                        .is_none()
                    {
                        existing.change_points.add(change_point)?;
                    }
                }
                Ok(())
            }
            None => {
                self.names.push(series.test().to_string());
                self.series.insert(series.test().to_string(), series);
                Ok(())
            }
        }
    }

    /// Replaces the series stored for a test, keeping its position.
    pub(crate) fn replace(&mut self, series: Arc<ExecutionSeries>) {
        if !self.series.contains_key(series.test()) {
            self.names.push(series.test().to_string());
        }
        self.series.insert(series.test().to_string(), series);
    }

    /// Removes a test from the set.
    pub fn remove(&mut self, test: &str) -> Result<Arc<ExecutionSeries>> {
        let removed = self.series.remove(test).ok_or_else(|| {
            PerfShiftError::invalid_parameter("SeriesSet::remove", format!("no test named '{test}'"))
        })?;
        self.names.retain(|n| n != test);
        Ok(removed)
    }

    pub fn get(&self, test: &str) -> Option<&Arc<ExecutionSeries>> {
        self.series.get(test)
    }

    pub fn contains(&self, test: &str) -> bool {
        self.series.contains_key(test)
    }

    /// Test names in insertion order.
    pub fn test_names(&self) -> &[String] {
        &self.names
    }

    /// Series in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ExecutionSeries>> {
        self.names.iter().filter_map(|n| self.series.get(n))
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Flattens the set back into sample rows, test by test in insertion
    /// order and revision by revision within a test.
    pub fn to_records(&self) -> Vec<ExecutionSample> {
        self.iter()
            .flat_map(|series| series.samples().cloned().collect::<Vec<_>>())
            .collect()
    }
}

/// Merges several sets into one. Tests present in more than one input have
/// their samples concatenated in input order.
pub fn merge_series_sets(sets: &[SeriesSet]) -> Result<SeriesSet> {
    let heading = sets
        .iter()
        .map(|s| s.heading().to_vec())
        .find(|h| !h.is_empty())
        .unwrap_or_else(|| DEFAULT_HEADING.iter().map(|h| h.to_string()).collect());

    let mut merged = SeriesSet::with_heading(heading);
    for set in sets {
        for series in set.iter() {
            merged.insert(Arc::new(series.without_change_points()))?;
        }
    }
    Ok(merged)
}
