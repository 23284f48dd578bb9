//! Direction and magnitude of a change point.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{PerfShiftError, Result};
use crate::series::{stats, ExecutionSeries};

/// Number of 10%-wide magnitude buckets.
pub const CATEGORY_COUNT: u8 = 10;

/// Whether the measured value got worse or better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The value increased from the flagged revision to the next one.
    Regression,
    /// The value stayed equal or decreased.
    Improvement,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Regression => "regression",
            Direction::Improvement => "improvement",
        }
    }

    /// The opposite direction.
    pub fn flipped(self) -> Self {
        match self {
            Direction::Regression => Direction::Improvement,
            Direction::Improvement => Direction::Regression,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 10%-wide magnitude bucket, `0` for 0-9% up to `9` for 90-99%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangeCategory(u8);

impl ChangeCategory {
    /// Creates a category from its bucket index.
    pub fn new(bucket: u8) -> Result<Self> {
        if bucket >= CATEGORY_COUNT {
            return Err(PerfShiftError::invalid_parameter(
                "ChangeCategory::new",
                format!("bucket {bucket} is out of range 0..{CATEGORY_COUNT}"),
            ));
        }
        Ok(Self(bucket))
    }

    /// Buckets a relative change. Exact multiples of 0.1 land in the higher
    /// bucket and anything at or above 0.9 is capped to the last one.
    pub fn from_relative_change(change: f64) -> Self {
        if !change.is_finite() || change <= 0.0 {
            return Self(0);
        }
        let capped = change.min(0.999);
        let bucket = (1..CATEGORY_COUNT)
            .filter(|k| capped >= f64::from(*k) / 10.0)
            .count();
        Self(bucket as u8)
    }

    /// Buckets the relative difference between two means.
    pub fn from_means(first: f64, second: f64) -> Self {
        Self::from_relative_change(stats::relative_change(first, second))
    }

    pub fn bucket(&self) -> u8 {
        self.0
    }

    /// Lower bound of the bucket in percent.
    pub fn lower_percent(&self) -> u32 {
        u32::from(self.0) * 10
    }

    /// Upper bound of the bucket in percent.
    pub fn upper_percent(&self) -> u32 {
        self.lower_percent() + 9
    }

    /// All categories from 0-9% to 90-99%.
    pub fn all() -> impl Iterator<Item = ChangeCategory> {
        (0..CATEGORY_COUNT).map(ChangeCategory)
    }
}

/// Direction plus magnitude. Two types are equal iff both parts match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangePointType {
    pub direction: Direction,
    pub category: ChangeCategory,
}

impl ChangePointType {
    pub fn new(direction: Direction, category: ChangeCategory) -> Self {
        Self {
            direction,
            category,
        }
    }

    /// Classifies the change from `before` to `after`: a regression iff the
    /// value grew.
    pub fn from_means(before: f64, after: f64) -> Self {
        let direction = if before < after {
            Direction::Regression
        } else {
            Direction::Improvement
        };
        Self::new(direction, ChangeCategory::from_means(before, after))
    }

    pub fn is_regression(&self) -> bool {
        self.direction == Direction::Regression
    }

    pub fn is_improvement(&self) -> bool {
        self.direction == Direction::Improvement
    }

    /// Every type, regressions first, each direction in ascending magnitude.
    pub fn all() -> Vec<ChangePointType> {
        [Direction::Regression, Direction::Improvement]
            .into_iter()
            .flat_map(|d| ChangeCategory::all().map(move |c| ChangePointType::new(d, c)))
            .collect()
    }

    /// Position of this type within [`ChangePointType::all`].
    pub fn index(&self) -> usize {
        let offset = match self.direction {
            Direction::Regression => 0,
            Direction::Improvement => usize::from(CATEGORY_COUNT),
        };
        offset + usize::from(self.category.bucket())
    }

    /// Human readable label, e.g. `regression: 10-19%`.
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChangePointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}-{}%",
            self.direction,
            self.category.lower_percent(),
            self.category.upper_percent()
        )
    }
}

impl FromStr for ChangePointType {
    type Err = PerfShiftError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            PerfShiftError::invalid_parameter(
                "ChangePointType::from_str",
                format!("'{s}' is not a change point type label"),
            )
        };
        let (direction, range) = s.split_once(':').ok_or_else(invalid)?;
        let direction = match direction.trim() {
            "regression" => Direction::Regression,
            "improvement" => Direction::Improvement,
            _ => return Err(invalid()),
        };
        let lower = range
            .trim()
            .trim_end_matches('%')
            .split('-')
            .next()
            .and_then(|n| n.trim().parse::<u8>().ok())
            .ok_or_else(invalid)?;
        if lower % 10 != 0 {
            return Err(invalid());
        }
        let category = ChangeCategory::new(lower / 10).map_err(|_| invalid())?;
        Ok(Self::new(direction, category))
    }
}

impl Serialize for ChangePointType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChangePointType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}

/// Classifies a flagged revision by comparing its mean with the mean of the
/// next revision in series order.
///
/// # Errors
///
/// - [`PerfShiftError::UnknownRevision`] if the series does not contain `revision`
/// - [`PerfShiftError::InvalidRevisionPosition`] if `revision` is the last one
/// - [`PerfShiftError::MissingRevisionData`] if either revision has no samples
pub fn classify(series: &ExecutionSeries, revision: &str) -> Result<ChangePointType> {
    let position = series
        .position(revision)
        .ok_or_else(|| PerfShiftError::UnknownRevision {
            revision: revision.to_string(),
            test: series.test().to_string(),
        })?;
    let next = series
        .revisions()
        .get(position + 1)
        .ok_or_else(|| PerfShiftError::InvalidRevisionPosition {
            revision: revision.to_string(),
            test: series.test().to_string(),
        })?;

    let before = revision_mean(series, revision)?;
    let after = revision_mean(series, next)?;
    Ok(ChangePointType::from_means(before, after))
}

fn revision_mean(series: &ExecutionSeries, revision: &str) -> Result<f64> {
    series
        .values_at(revision)
        .and_then(|values| stats::mean(&values))
        .ok_or_else(|| PerfShiftError::MissingRevisionData {
            revision: revision.to_string(),
            test: series.test().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::SeriesBuilder;

    fn category(bucket: u8) -> ChangeCategory {
        ChangeCategory::new(bucket).unwrap()
    }

    #[test]
    fn test_bucket_boundaries_go_up() {
        for k in 1..10u8 {
            let exact = f64::from(k) / 10.0;
            assert_eq!(ChangeCategory::from_relative_change(exact).bucket(), k);
            assert_eq!(
                ChangeCategory::from_relative_change(exact - 1e-9).bucket(),
                k - 1
            );
        }
    }

    #[test]
    fn test_bucket_caps_at_ninety() {
        assert_eq!(ChangeCategory::from_relative_change(0.95).bucket(), 9);
        assert_eq!(ChangeCategory::from_relative_change(1.0).bucket(), 9);
        assert_eq!(ChangeCategory::from_relative_change(f64::NAN).bucket(), 0);
        assert_eq!(ChangeCategory::from_relative_change(0.0).bucket(), 0);
    }

    #[test]
    fn test_direction_from_means() {
        let up = ChangePointType::from_means(1.0, 2.0);
        assert!(up.is_regression());
        assert_eq!(up.category.bucket(), 5);

        let down = ChangePointType::from_means(2.0, 1.0);
        assert!(down.is_improvement());
        assert_eq!(down.category, up.category);

        let flat = ChangePointType::from_means(3.0, 3.0);
        assert!(flat.is_improvement());
        assert_eq!(flat.category.bucket(), 0);
    }

    #[test]
    fn test_labels() {
        let t = ChangePointType::new(Direction::Regression, category(1));
        assert_eq!(t.to_string(), "regression: 10-19%");
        let t = ChangePointType::new(Direction::Improvement, category(0));
        assert_eq!(t.label(), "improvement: 0-9%");
    }

    #[test]
    fn test_label_parsing() {
        for t in ChangePointType::all() {
            assert_eq!(t.label().parse::<ChangePointType>().unwrap(), t);
        }
        assert!("sideways: 0-9%".parse::<ChangePointType>().is_err());
        assert!("regression: 15-24%".parse::<ChangePointType>().is_err());
        assert!("regression".parse::<ChangePointType>().is_err());
    }

    #[test]
    fn test_all_types_and_index() {
        let all = ChangePointType::all();
        assert_eq!(all.len(), 20);
        for (i, t) in all.iter().enumerate() {
            assert_eq!(t.index(), i);
        }
        assert!(all[0].is_regression());
        assert!(all[10].is_improvement());
    }

    #[test]
    fn test_serde_uses_label() {
        let t = ChangePointType::new(Direction::Regression, category(9));
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"regression: 90-99%\"");
        let back: ChangePointType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_classify() {
        let series = SeriesBuilder::new("p", "A")
            .revision("r1", &[10.0, 10.0])
            .revision("r2", &[100.0])
            .revision("r3", &[100.0])
            .build();

        let t = classify(&series, "r1").unwrap();
        assert!(t.is_regression());
        assert_eq!(t.category.bucket(), 9);

        let t = classify(&series, "r2").unwrap();
        assert!(t.is_improvement());
        assert_eq!(t.category.bucket(), 0);
    }

    #[test]
    fn test_classify_last_revision_fails() {
        let series = SeriesBuilder::new("p", "A")
            .revision("r1", &[1.0])
            .revision("r2", &[2.0])
            .build();
        let err = classify(&series, "r2").unwrap_err();
        assert!(matches!(err, PerfShiftError::InvalidRevisionPosition { .. }));
    }

    #[test]
    fn test_classify_unknown_revision_fails() {
        let series = SeriesBuilder::new("p", "A").revision("r1", &[1.0]).build();
        let err = classify(&series, "r7").unwrap_err();
        assert!(matches!(err, PerfShiftError::UnknownRevision { .. }));
    }
}
