//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use perfshift::analysis::{AnalysisOracle, DetectionRule, OracleInput, OracleResponse};
use perfshift::error::Result;
use perfshift::series::{SeriesBuilder, SeriesSet};
use std::time::Duration;

/// Flags a revision when its mean differs from the next one by more than
/// `tolerance`, answering with one probability per revision.
pub struct StepOracle {
    pub tolerance: f64,
    pub delay: Option<Duration>,
}

impl StepOracle {
    pub fn new() -> Self {
        Self {
            tolerance: 0.05,
            delay: None,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }
}

#[async_trait]
impl AnalysisOracle for StepOracle {
    type Session = usize;

    fn name(&self) -> &str {
        "step"
    }

    fn detection_rule(&self) -> DetectionRule {
        DetectionRule::Threshold(0.5)
    }

    async fn open_session(&self) -> Result<usize> {
        Ok(0)
    }

    async fn analyse(&self, calls: &mut usize, input: &OracleInput) -> Result<OracleResponse> {
        *calls += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let means = input.representative();
        let probabilities = means
            .iter()
            .enumerate()
            .map(|(i, mean)| match means.get(i + 1) {
                Some(next) if (next - mean).abs() > self.tolerance * mean.abs().max(*next) => 1.0,
                _ => 0.0,
            })
            .collect();
        Ok(OracleResponse::Probabilities(probabilities))
    }
}

/// Builds a set with one series per `(test, per-revision values)`, all sharing
/// revisions `r1..`.
pub fn series_set(tests: &[(&str, &[&[f64]])]) -> SeriesSet {
    let mut set = SeriesSet::new();
    for (test, revisions) in tests {
        let builder = revisions
            .iter()
            .enumerate()
            .fold(SeriesBuilder::new("bench", *test), |b, (i, values)| {
                b.revision(&format!("r{}", i + 1), values)
            });
        set.insert(builder.build()).unwrap();
    }
    set
}
