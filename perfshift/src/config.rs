//! Pipeline configuration.
//!
//! A pipeline is described by an ordered list of stage names plus the
//! functions the `filter` and `analyse` stages run:
//!
//! ```json
//! {
//!   "stages": ["filter", "analyse", "save"],
//!   "transform": [{"name": "minVersions", "params": [3]}, {"name": "minMean", "params": [0.5]}],
//!   "analyse": {"name": "probability", "params": ["/usr/local/bin/bcp-oracle", 0.6]},
//!   "max_workers": 10
//! }
//! ```
//!
//! [`PipelineConfig::validate`] checks everything up front and returns a
//! typed [`PipelinePlan`], so no stage starts with a configuration that a
//! later stage would reject.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::analysis::{CommandOracle, DetectionRule, DEFAULT_MAX_WORKERS};
use crate::error::{PerfShiftError, Result};
use crate::filter::{FilterPipeline, MinMean, MinMedian, MinVersions, SeriesFilter};

const FILTER_FUNCTIONS: [&str; 3] = ["minVersions", "minMean", "minMedian"];
const ANALYSIS_FUNCTIONS: [&str; 2] = ["probability", "positions"];

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

/// A named function with positional parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl FunctionSpec {
    pub fn new(name: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    fn expect_arity(&self, arity: usize) -> Result<()> {
        if self.params.len() != arity {
            return Err(PerfShiftError::invalid_parameter(
                &self.name,
                format!("expected {arity} parameter(s), got {}", self.params.len()),
            ));
        }
        Ok(())
    }

    fn integer(&self, index: usize) -> Result<u64> {
        self.params[index].as_u64().ok_or_else(|| {
            PerfShiftError::invalid_parameter(
                &self.name,
                format!(
                    "parameter {} must be a non-negative integer, got {}",
                    index + 1,
                    self.params[index]
                ),
            )
        })
    }

    fn number(&self, index: usize) -> Result<f64> {
        self.params[index].as_f64().ok_or_else(|| {
            PerfShiftError::invalid_parameter(
                &self.name,
                format!(
                    "parameter {} must be a number, got {}",
                    index + 1,
                    self.params[index]
                ),
            )
        })
    }

    fn string(&self, index: usize) -> Result<String> {
        match self.params[index].as_str() {
            Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
            _ => Err(PerfShiftError::invalid_parameter(
                &self.name,
                format!(
                    "parameter {} must be a non-empty string, got {}",
                    index + 1,
                    self.params[index]
                ),
            )),
        }
    }
}

/// Raw pipeline configuration as read from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Stage names in execution order.
    pub stages: Vec<String>,
    /// Functions of the `filter` stage, applied in order.
    #[serde(default)]
    pub transform: Vec<FunctionSpec>,
    /// Function of the `analyse` stage.
    #[serde(default)]
    pub analyse: Option<FunctionSpec>,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Time allowed for one oracle call, in seconds.
    #[serde(default)]
    pub oracle_timeout_secs: Option<u64>,
}

impl PipelineConfig {
    pub fn new<I, S>(stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stages: stages.into_iter().map(Into::into).collect(),
            transform: Vec::new(),
            analyse: None,
            max_workers: DEFAULT_MAX_WORKERS,
            oracle_timeout_secs: None,
        }
    }

    /// Parses a configuration from JSON without validating it.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PerfShiftError::configuration(e.to_string()))
    }

    /// Appends a filter function.
    pub fn with_transform(mut self, name: impl Into<String>, params: Vec<Value>) -> Self {
        self.transform.push(FunctionSpec::new(name, params));
        self
    }

    /// Sets the analysis function.
    pub fn with_analyse(mut self, name: impl Into<String>, params: Vec<Value>) -> Self {
        self.analyse = Some(FunctionSpec::new(name, params));
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Checks the configuration for `input_count` input sets and builds the
    /// executable plan.
    ///
    /// # Errors
    ///
    /// Fails on an empty stage list, unknown stage or function names, wrong
    /// parameter arity or types, a stage without its function, `merge` with
    /// fewer than two inputs and `max_workers == 0`.
    pub fn validate(&self, input_count: usize) -> Result<PipelinePlan> {
        if self.stages.is_empty() {
            return Err(PerfShiftError::configuration("no stages configured"));
        }
        if self.max_workers == 0 {
            return Err(PerfShiftError::configuration(
                "max_workers must be at least 1",
            ));
        }

        let mut stages = Vec::with_capacity(self.stages.len());
        for name in &self.stages {
            let stage = match name.parse::<StageName>()? {
                StageName::Filter => {
                    if self.transform.is_empty() {
                        return Err(PerfShiftError::configuration(
                            "stage 'filter' needs at least one transform function",
                        ));
                    }
                    let specs = self
                        .transform
                        .iter()
                        .map(FilterSpec::from_function)
                        .collect::<Result<Vec<_>>>()?;
                    Stage::Filter(specs)
                }
                StageName::Merge => {
                    if input_count < 2 {
                        return Err(PerfShiftError::configuration(format!(
                            "stage 'merge' needs at least two inputs, got {input_count}"
                        )));
                    }
                    Stage::Merge
                }
                StageName::Analyse => {
                    let function = self.analyse.as_ref().ok_or_else(|| {
                        PerfShiftError::configuration("stage 'analyse' needs an analyse function")
                    })?;
                    Stage::Analyse(AnalyseSpec::from_function(function)?)
                }
                StageName::Save => Stage::Save,
            };
            stages.push(stage);
        }

        Ok(PipelinePlan {
            stages,
            max_workers: self.max_workers,
            oracle_timeout: self.oracle_timeout_secs.map(Duration::from_secs),
        })
    }
}

/// Stages the runner knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageName {
    Filter,
    Merge,
    Analyse,
    Save,
}

impl StageName {
    pub const ALL: [StageName; 4] = [
        StageName::Filter,
        StageName::Merge,
        StageName::Analyse,
        StageName::Save,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Filter => "filter",
            StageName::Merge => "merge",
            StageName::Analyse => "analyse",
            StageName::Save => "save",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = PerfShiftError;

    fn from_str(s: &str) -> Result<Self> {
        StageName::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| PerfShiftError::UnknownStage {
                name: s.to_string(),
            })
    }
}

/// A validated filter function.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterSpec {
    MinVersions(usize),
    MinMean(f64),
    MinMedian(f64),
}

impl FilterSpec {
    fn from_function(function: &FunctionSpec) -> Result<Self> {
        match function.name.as_str() {
            "minVersions" => {
                function.expect_arity(1)?;
                let min = usize::try_from(function.integer(0)?).map_err(|_| {
                    PerfShiftError::invalid_parameter(&function.name, "parameter 1 is too large")
                })?;
                Ok(FilterSpec::MinVersions(min))
            }
            "minMean" => {
                function.expect_arity(1)?;
                Ok(FilterSpec::MinMean(function.number(0)?))
            }
            "minMedian" => {
                function.expect_arity(1)?;
                Ok(FilterSpec::MinMedian(function.number(0)?))
            }
            other => Err(PerfShiftError::UnknownFunction {
                stage: StageName::Filter.to_string(),
                name: other.to_string(),
                expected: FILTER_FUNCTIONS.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }

    pub fn to_filter(&self) -> Box<dyn SeriesFilter> {
        match self {
            FilterSpec::MinVersions(min) => Box::new(MinVersions::new(*min)),
            FilterSpec::MinMean(min) => Box::new(MinMean::new(*min)),
            FilterSpec::MinMedian(min) => Box::new(MinMedian::new(*min)),
        }
    }
}

/// Analysis functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisFunction {
    /// The oracle returns one probability per revision.
    Probability,
    /// The oracle returns 1-based positions of flagged revisions.
    Positions,
}

impl AnalysisFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisFunction::Probability => "probability",
            AnalysisFunction::Positions => "positions",
        }
    }
}

/// A validated analysis function: the oracle command plus its numeric
/// parameter (probability threshold or minimum segment hint).
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyseSpec {
    pub function: AnalysisFunction,
    pub command: String,
    pub parameter: f64,
}

impl AnalyseSpec {
    fn from_function(function: &FunctionSpec) -> Result<Self> {
        let kind = match function.name.as_str() {
            "probability" => AnalysisFunction::Probability,
            "positions" => AnalysisFunction::Positions,
            other => {
                return Err(PerfShiftError::UnknownFunction {
                    stage: StageName::Analyse.to_string(),
                    name: other.to_string(),
                    expected: ANALYSIS_FUNCTIONS.iter().map(|s| s.to_string()).collect(),
                })
            }
        };
        function.expect_arity(2)?;
        let command = function.string(0)?;
        let parameter = match kind {
            AnalysisFunction::Probability => {
                let threshold = function.number(1)?;
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(PerfShiftError::invalid_parameter(
                        &function.name,
                        format!("threshold {threshold} is outside 0..=1"),
                    ));
                }
                threshold
            }
            AnalysisFunction::Positions => function.integer(1)? as f64,
        };
        Ok(Self {
            function: kind,
            command,
            parameter,
        })
    }

    /// Builds the subprocess oracle. The command is split on whitespace
    /// into program and arguments.
    pub fn to_oracle(&self) -> Result<CommandOracle> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            PerfShiftError::invalid_parameter(self.function.as_str(), "empty oracle command")
        })?;
        let oracle = match self.function {
            AnalysisFunction::Probability => CommandOracle::new(
                self.function.as_str(),
                program,
                DetectionRule::Threshold(self.parameter),
            ),
            AnalysisFunction::Positions => {
                CommandOracle::new(self.function.as_str(), program, DetectionRule::Positions)
                    .with_parameter(self.parameter)
            }
        };
        Ok(oracle.with_args(parts))
    }
}

/// One validated stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Filter(Vec<FilterSpec>),
    Merge,
    Analyse(AnalyseSpec),
    Save,
}

impl Stage {
    pub fn name(&self) -> StageName {
        match self {
            Stage::Filter(_) => StageName::Filter,
            Stage::Merge => StageName::Merge,
            Stage::Analyse(_) => StageName::Analyse,
            Stage::Save => StageName::Save,
        }
    }
}

/// A configuration that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelinePlan {
    pub stages: Vec<Stage>,
    pub max_workers: usize,
    pub oracle_timeout: Option<Duration>,
}

impl PipelinePlan {
    /// Builds the filter pipeline for a filter stage.
    pub fn filter_pipeline(specs: &[FilterSpec]) -> FilterPipeline {
        specs
            .iter()
            .fold(FilterPipeline::new(), |pipeline, spec| {
                pipeline.add_boxed(spec.to_filter())
            })
    }

    /// The analysis function of the first `analyse` stage, if any.
    pub fn analyse_spec(&self) -> Option<&AnalyseSpec> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::Analyse(spec) => Some(spec),
            _ => None,
        })
    }

    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(Stage::name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FULL: &str = r#"{
        "stages": ["filter", "merge", "analyse", "save"],
        "transform": [{"name": "minVersions", "params": [3]}, {"name": "minMean", "params": [0.5]}],
        "analyse": {"name": "probability", "params": ["/usr/local/bin/bcp-oracle --fast", 0.6]},
        "max_workers": 4
    }"#;

    #[test]
    fn test_parse_and_validate() {
        let config = PipelineConfig::from_json(FULL).unwrap();
        let plan = config.validate(2).unwrap();

        assert_eq!(
            plan.stage_names(),
            [
                StageName::Filter,
                StageName::Merge,
                StageName::Analyse,
                StageName::Save
            ]
        );
        assert_eq!(plan.max_workers, 4);
        assert_eq!(
            plan.stages[0],
            Stage::Filter(vec![FilterSpec::MinVersions(3), FilterSpec::MinMean(0.5)])
        );

        let spec = plan.analyse_spec().unwrap();
        assert_eq!(spec.function, AnalysisFunction::Probability);
        assert_eq!(spec.parameter, 0.6);
        let oracle = spec.to_oracle().unwrap();
        assert_eq!(oracle.program(), "/usr/local/bin/bcp-oracle");
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_json(r#"{"stages": ["save"]}"#).unwrap();
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
        assert!(config.transform.is_empty());
        assert!(config.validate(1).is_ok());
    }

    #[test]
    fn test_unknown_stage() {
        let err = PipelineConfig::new(["filter", "plot"])
            .with_transform("minVersions", vec![json!(2)])
            .validate(1)
            .unwrap_err();
        assert!(matches!(err, PerfShiftError::UnknownStage { ref name } if name == "plot"));
    }

    #[test]
    fn test_unknown_functions() {
        let err = PipelineConfig::new(["filter"])
            .with_transform("maxMean", vec![json!(2.0)])
            .validate(1)
            .unwrap_err();
        assert!(matches!(err, PerfShiftError::UnknownFunction { ref stage, .. } if stage == "filter"));

        let err = PipelineConfig::new(["analyse"])
            .with_analyse("ttest", vec![json!("oracle"), json!(0.5)])
            .validate(1)
            .unwrap_err();
        assert!(matches!(err, PerfShiftError::UnknownFunction { ref stage, .. } if stage == "analyse"));
    }

    #[test]
    fn test_parameter_shapes() {
        let bad = [
            PipelineConfig::new(["filter"]).with_transform("minVersions", vec![json!(2.5)]),
            PipelineConfig::new(["filter"]).with_transform("minVersions", vec![]),
            PipelineConfig::new(["filter"]).with_transform("minMean", vec![json!("high")]),
            PipelineConfig::new(["analyse"]).with_analyse("probability", vec![json!("oracle")]),
            PipelineConfig::new(["analyse"])
                .with_analyse("probability", vec![json!(1), json!(0.5)]),
            PipelineConfig::new(["analyse"])
                .with_analyse("probability", vec![json!("oracle"), json!(1.5)]),
            PipelineConfig::new(["analyse"])
                .with_analyse("positions", vec![json!("oracle"), json!(0.5)]),
        ];
        for config in bad {
            let err = config.validate(1).unwrap_err();
            assert!(
                matches!(err, PerfShiftError::InvalidParameter { .. }),
                "unexpected error {err}"
            );
        }
    }

    #[test]
    fn test_structural_errors() {
        let cases = [
            (PipelineConfig::new(Vec::<String>::new()), 1),
            (PipelineConfig::new(["filter"]), 1),
            (PipelineConfig::new(["analyse"]), 1),
            (PipelineConfig::new(["merge"]), 1),
            (PipelineConfig::new(["save"]).with_max_workers(0), 1),
        ];
        for (config, inputs) in cases {
            let err = config.validate(inputs).unwrap_err();
            assert!(matches!(err, PerfShiftError::Configuration(_)), "unexpected error {err}");
        }
        assert!(PipelineConfig::new(["merge"]).validate(2).is_ok());
    }

    #[test]
    fn test_malformed_json() {
        let err = PipelineConfig::from_json("{\"stages\": ").unwrap_err();
        assert!(matches!(err, PerfShiftError::Configuration(_)));
    }

    #[test]
    fn test_filter_pipeline_from_plan() {
        let pipeline = PipelinePlan::filter_pipeline(&[
            FilterSpec::MinVersions(3),
            FilterSpec::MinMedian(1.0),
        ]);
        assert_eq!(pipeline.stage_names(), ["minVersions", "minMedian"]);
    }

    #[test]
    fn test_positions_oracle() {
        let plan = PipelineConfig::new(["analyse"])
            .with_analyse("positions", vec![json!("twitter-oracle"), json!(5)])
            .validate(1)
            .unwrap();
        let spec = plan.analyse_spec().unwrap();
        assert_eq!(spec.function, AnalysisFunction::Positions);
        assert_eq!(spec.parameter, 5.0);
    }
}
