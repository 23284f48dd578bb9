//! Summary statistics over measured values.

use statrs::statistics::{Data, Median, Statistics};

use super::ExecutionSeries;

/// Arithmetic mean, or `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().mean())
}

/// Median, or `None` for an empty slice. Even-length inputs average the two
/// middle values.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(Data::new(values.to_vec()).median())
}

/// Mean of the per-revision means, so revisions with many repeated samples
/// do not dominate.
pub fn mean_of_revision_means(series: &ExecutionSeries) -> Option<f64> {
    mean(&series.revision_means())
}

/// Median of the per-revision medians.
pub fn median_of_revision_medians(series: &ExecutionSeries) -> Option<f64> {
    median(&series.revision_medians())
}

/// Relative change from `before` to `after`, as an absolute fraction of the
/// larger of the two values.
pub fn relative_change(before: f64, after: f64) -> f64 {
    let larger = before.abs().max(after.abs());
    if larger == 0.0 {
        return 0.0;
    }
    ((after - before) / larger).abs()
}
