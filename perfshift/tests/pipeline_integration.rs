//! End-to-end tests for filtering, analysis and export.

mod common;

use common::{series_set, StepOracle};
use perfshift::changepoint::export;
use perfshift::config::PipelineConfig;
use perfshift::prelude::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_single_regression_is_reported_once() {
    let set = series_set(&[
        ("A", &[&[10.0, 10.0], &[100.0, 100.0], &[100.0]]),
        ("B", &[&[5.0], &[5.0], &[5.0]]),
    ]);

    let outcome = AnalysisPipeline::new(StepOracle::new())
        .run(&set, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.change_points.len(), 1);
    let cp = &outcome.change_points.all()[0];
    assert_eq!(cp.revision(), "r1");
    assert_eq!(cp.change_type().direction, Direction::Regression);
    assert_eq!(cp.change_type().category.bucket(), 9);
    assert_eq!(cp.test_names(), ["A"]);

    assert_eq!(outcome.series.len(), 2);
    assert!(outcome.series.get("B").unwrap().change_points().is_empty());
    assert_eq!(outcome.report.completed(), 2);
}

#[tokio::test]
async fn test_doubling_lands_in_fifty_percent_bucket() {
    let set = series_set(&[("A", &[&[1.0], &[2.0], &[2.0]])]);

    let outcome = AnalysisPipeline::new(StepOracle::new())
        .run(&set, &CancellationToken::new())
        .await
        .unwrap();

    let cp = &outcome.change_points.all()[0];
    assert_eq!(cp.change_type().to_string(), "regression: 50-59%");
}

#[tokio::test]
async fn test_improvements_and_regressions_at_one_revision_stay_apart() {
    let set = series_set(&[
        ("up", &[&[10.0], &[20.0], &[20.0]]),
        ("down", &[&[20.0], &[10.0], &[10.0]]),
        ("up2", &[&[30.0], &[60.0], &[60.0]]),
    ]);

    let outcome = AnalysisPipeline::new(StepOracle::new())
        .run(&set, &CancellationToken::new())
        .await
        .unwrap();

    let at_r1 = outcome.change_points.at("r1");
    assert_eq!(at_r1.len(), 2);
    let regression = at_r1
        .iter()
        .find(|cp| cp.change_type().is_regression())
        .unwrap();
    let mut tests = regression.test_names().to_vec();
    tests.sort();
    assert_eq!(tests, ["up", "up2"]);
}

#[tokio::test]
async fn test_filter_then_analyse() {
    let set = series_set(&[
        ("short", &[&[1.0], &[50.0]]),
        ("tiny", &[&[0.001], &[0.01], &[0.01]]),
        ("kept", &[&[10.0], &[30.0], &[30.0]]),
    ]);

    let filtered = FilterPipeline::new()
        .add(MinVersions::new(3))
        .add(MinMean::new(1.0))
        .apply(&set)
        .unwrap();
    assert_eq!(filtered.test_names(), ["kept"]);

    let outcome = AnalysisPipeline::new(StepOracle::new())
        .run(&filtered, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.change_points.affected_tests(), 1);
}

#[tokio::test]
async fn test_export_after_analysis() {
    let set = series_set(&[
        ("A", &[&[10.0], &[20.0], &[20.0], &[10.0]]),
        ("B", &[&[10.0], &[20.0], &[20.0], &[20.0]]),
    ]);

    let outcome = AnalysisPipeline::new(StepOracle::new())
        .run(&set, &CancellationToken::new())
        .await
        .unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&export::to_json_string(&outcome.change_points).unwrap()).unwrap();
    let records = json.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["revision"], "r1");
    assert_eq!(records[0]["type"], "regression: 50-59%");
    assert_eq!(records[0]["tests"].as_array().unwrap().len(), 2);
    assert_eq!(records[1]["revision"], "r3");
    assert_eq!(records[1]["type"], "improvement: 50-59%");

    let order = export::revision_order(&outcome.series);
    let rows = export::summarize(&outcome.change_points, &order);
    let mut csv = Vec::new();
    export::write_summary_csv(&rows, &mut csv).unwrap();
    let csv = String::from_utf8(csv).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[2].starts_with("r2;0;0;0"));
    assert_eq!(rows[1].total(), 0);
    assert_eq!(rows[0].total(), 2);
}

#[tokio::test]
async fn test_runner_from_json_config() {
    let config = PipelineConfig::from_json(
        r#"{
            "stages": ["filter", "merge", "analyse", "save"],
            "transform": [{"name": "minVersions", "params": [3]}],
            "analyse": {"name": "probability", "params": ["step-oracle", 0.5]},
            "max_workers": 2
        }"#,
    )
    .unwrap();
    let plan = config.validate(2).unwrap();

    let inputs = vec![
        series_set(&[("A", &[&[10.0], &[20.0], &[20.0]])]),
        series_set(&[
            ("B", &[&[10.0], &[20.0], &[20.0]]),
            ("C", &[&[10.0], &[20.0]]),
        ]),
    ];
    let artifacts = PipelineRunner::with_oracle(plan, StepOracle::new())
        .run(inputs, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(artifacts.series.len(), 1);
    assert_eq!(artifacts.series[0].test_names(), ["A", "B"]);
    assert_eq!(artifacts.reports[0].worker_count, 2);

    let saved = &artifacts.saved[0];
    assert_eq!(saved.change_points.len(), 1);
    assert_eq!(saved.change_points[0].all()[0].test_count(), 2);
}

#[test]
fn test_invalid_config_fails_before_running() {
    let config = PipelineConfig::new(["filter", "analyse"])
        .with_transform("minVersions", vec![json!("three")])
        .with_analyse("probability", vec![json!("oracle"), json!(0.5)]);
    assert!(matches!(
        config.validate(1),
        Err(PerfShiftError::InvalidParameter { .. })
    ));
}
