use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::kind::{classify, ChangePointType};
use crate::error::{PerfShiftError, Result};
use crate::series::ExecutionSeries;

/// Identity of a change point inside a [`ChangePointSet`](super::ChangePointSet).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangePointKey {
    pub revision: String,
    pub change_type: ChangePointType,
}

impl fmt::Display for ChangePointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.revision, self.change_type)
    }
}

/// A revision flagged in one or more tests with the same direction and
/// magnitude.
///
/// A change point always carries at least one test. It is never mutated once
/// built: merging produces a new value, so readers holding the old one keep
/// seeing it unchanged.
#[derive(Clone)]
pub struct ChangePoint {
    revision: String,
    change_type: ChangePointType,
    tests: Vec<String>,
    series: HashMap<String, Arc<ExecutionSeries>>,
}

impl ChangePoint {
    /// Classifies `revision` in `series` and creates a single-test change
    /// point from the result.
    pub fn detect(revision: &str, series: Arc<ExecutionSeries>) -> Result<Self> {
        let change_type = classify(&series, revision)?;
        Ok(Self::reconstruct(revision, change_type, series))
    }

    /// Rebuilds a change point from a stored record without re-classifying.
    pub fn reconstruct(
        revision: impl Into<String>,
        change_type: ChangePointType,
        series: Arc<ExecutionSeries>,
    ) -> Self {
        let test = series.test().to_string();
        Self {
            revision: revision.into(),
            change_type,
            tests: vec![test.clone()],
            series: HashMap::from([(test, series)]),
        }
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn change_type(&self) -> ChangePointType {
        self.change_type
    }

    pub fn key(&self) -> ChangePointKey {
        ChangePointKey {
            revision: self.revision.clone(),
            change_type: self.change_type,
        }
    }

    /// Affected test names in the order they were merged in.
    pub fn test_names(&self) -> &[String] {
        &self.tests
    }

    /// Number of affected tests.
    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    /// Series the change point was detected in, by test name.
    pub fn series(&self, test: &str) -> Option<&Arc<ExecutionSeries>> {
        self.series.get(test)
    }

    /// Combines two detections of the same revision and type.
    ///
    /// # Errors
    ///
    /// - [`PerfShiftError::IncompatibleChangePoints`] if the keys differ
    /// - [`PerfShiftError::TestCollision`] if both sides already carry a test
    pub fn merge(&self, other: &ChangePoint) -> Result<ChangePoint> {
        if self.revision != other.revision || self.change_type != other.change_type {
            return Err(PerfShiftError::IncompatibleChangePoints {
                left: self.key().to_string(),
                right: other.key().to_string(),
            });
        }

        let mut merged = self.clone();
        for test in &other.tests {
            if merged.series.contains_key(test) {
                return Err(PerfShiftError::TestCollision {
                    test: test.clone(),
                    revision: self.revision.clone(),
                });
            }
            if let Some(series) = other.series.get(test) {
                merged.series.insert(test.clone(), Arc::clone(series));
                merged.tests.push(test.clone());
            }
        }
        Ok(merged)
    }

    /// Returns a copy without the given tests, or `None` if nothing is left.
    pub(crate) fn without_tests(&self, exclude: impl Fn(&str) -> bool) -> Option<ChangePoint> {
        let tests: Vec<String> = self
            .tests
            .iter()
            .filter(|t| !exclude(t.as_str()))
            .cloned()
            .collect();
        if tests.is_empty() {
            return None;
        }
        let series = tests
            .iter()
            .filter_map(|t| self.series.get(t).map(|s| (t.clone(), Arc::clone(s))))
            .collect();
        Some(ChangePoint {
            revision: self.revision.clone(),
            change_type: self.change_type,
            tests,
            series,
        })
    }

    pub fn to_record(&self) -> ChangePointRecord {
        ChangePointRecord {
            revision: self.revision.clone(),
            change_type: self.change_type,
            tests: self.tests.clone(),
        }
    }
}

impl fmt::Debug for ChangePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangePoint")
            .field("revision", &self.revision)
            .field("change_type", &self.change_type.label())
            .field("tests", &self.tests)
            .finish()
    }
}

/// Serialized form of a change point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePointRecord {
    pub revision: String,
    #[serde(rename = "type")]
    pub change_type: ChangePointType,
    pub tests: Vec<String>,
}
