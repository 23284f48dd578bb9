//! Executes a validated [`PipelinePlan`] over in-memory inputs.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::analysis::{
    AnalysisOracle, AnalysisPipeline, AnalysisReport, CommandOracle, ProgressCallback,
};
use crate::changepoint::export::{self, RevisionSummary};
use crate::changepoint::{remove_duplicate_tests, ChangePointSet};
use crate::config::{PipelinePlan, Stage};
use crate::error::{PerfShiftError, Result};
use crate::logging::LogConfig;
use crate::series::{merge_series_sets, SeriesSet};

/// Snapshot taken by a `save` stage.
#[derive(Debug, Clone)]
pub struct SavedOutput {
    /// Position of the stage in the plan.
    pub stage_index: usize,
    pub series: Vec<SeriesSet>,
    /// Change points per set. With more than one set, detections already
    /// reported by an earlier set are removed and emptied sets are dropped.
    pub change_points: Vec<ChangePointSet>,
}

impl SavedOutput {
    /// JSON export of every change point set.
    pub fn to_json(&self) -> Result<Vec<String>> {
        self.change_points
            .iter()
            .map(export::to_json_string)
            .collect()
    }

    /// Revision summaries of every change point set, in the revision order
    /// of the longest series across all saved sets.
    pub fn summaries(&self) -> Vec<Vec<RevisionSummary>> {
        let order = self
            .series
            .iter()
            .map(export::revision_order)
            .max_by_key(Vec::len)
            .unwrap_or_default();
        self.change_points
            .iter()
            .map(|set| export::summarize(set, &order))
            .collect()
    }
}

/// Everything a run produced.
#[derive(Debug, Default)]
pub struct RunArtifacts {
    /// Series sets after the last executed stage.
    pub series: Vec<SeriesSet>,
    /// Change points per series set after the last executed stage.
    pub change_points: Vec<ChangePointSet>,
    /// One report per analysed set.
    pub reports: Vec<AnalysisReport>,
    pub saved: Vec<SavedOutput>,
    /// True if the run stopped early because of cancellation.
    pub canceled: bool,
}

/// Runs the stages of a plan in order.
///
/// # Examples
///
/// ```rust,no_run
/// use perfshift::config::PipelineConfig;
/// use perfshift::runner::PipelineRunner;
/// use perfshift::series::SeriesSet;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(inputs: Vec<SeriesSet>) -> perfshift::error::Result<()> {
/// let plan = PipelineConfig::from_json(
///     r#"{"stages": ["filter", "analyse", "save"],
///         "transform": [{"name": "minVersions", "params": [3]}],
///         "analyse": {"name": "probability", "params": ["bcp-oracle", 0.6]}}"#,
/// )?
/// .validate(inputs.len())?;
///
/// let artifacts = PipelineRunner::new(plan)?
///     .run(inputs, &CancellationToken::new())
///     .await?;
/// for json in artifacts.saved[0].to_json()? {
///     println!("{json}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct PipelineRunner<O: AnalysisOracle = CommandOracle> {
    plan: PipelinePlan,
    oracle: Option<Arc<O>>,
    log_config: LogConfig,
    on_progress: Option<ProgressCallback>,
}

impl PipelineRunner<CommandOracle> {
    /// Creates a runner whose analysis stage uses the command oracle named in
    /// the plan.
    pub fn new(plan: PipelinePlan) -> Result<Self> {
        let oracle = match plan.analyse_spec() {
            Some(spec) => {
                let mut oracle = spec.to_oracle()?;
                if let Some(timeout) = plan.oracle_timeout {
                    oracle = oracle.with_timeout(timeout);
                }
                Some(Arc::new(oracle))
            }
            None => None,
        };
        Ok(Self {
            plan,
            oracle,
            log_config: LogConfig::default(),
            on_progress: None,
        })
    }
}

impl<O: AnalysisOracle> PipelineRunner<O> {
    /// Creates a runner with an injected oracle for the analysis stage.
    pub fn with_oracle(plan: PipelinePlan, oracle: O) -> Self {
        Self {
            plan,
            oracle: Some(Arc::new(oracle)),
            log_config: LogConfig::default(),
            on_progress: None,
        }
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    /// Sets a progress callback forwarded to every analysis stage.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn plan(&self) -> &PipelinePlan {
        &self.plan
    }

    /// Runs every stage over `inputs`. A canceled token stops the run before
    /// the next stage and inside an analysis stage.
    #[instrument(skip(self, inputs, cancel), fields(stages = self.plan.stages.len(), inputs = inputs.len()))]
    pub async fn run(
        &self,
        inputs: Vec<SeriesSet>,
        cancel: &CancellationToken,
    ) -> Result<RunArtifacts> {
        let change_points = inputs
            .iter()
            .map(ChangePointSet::from_series_set)
            .collect::<Result<Vec<_>>>()?;
        let mut artifacts = RunArtifacts {
            series: inputs,
            change_points,
            ..Default::default()
        };

        for (index, stage) in self.plan.stages.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(stage = %stage.name(), "Run canceled before stage");
                artifacts.canceled = true;
                break;
            }
            debug!(stage = %stage.name(), index, "Running stage");

            match stage {
                Stage::Filter(specs) => {
                    let pipeline = PipelinePlan::filter_pipeline(specs)
                        .with_log_config(self.log_config.clone());
                    artifacts.series = artifacts
                        .series
                        .iter()
                        .map(|set| pipeline.apply(set))
                        .collect::<Result<Vec<_>>>()?;
                    artifacts.change_points = artifacts
                        .series
                        .iter()
                        .map(ChangePointSet::from_series_set)
                        .collect::<Result<Vec<_>>>()?;
                }
                Stage::Merge => {
                    let merged = merge_series_sets(&artifacts.series)?;
                    info!(
                        inputs = artifacts.series.len(),
                        tests = merged.len(),
                        "Merged series sets"
                    );
                    artifacts.series = vec![merged];
                    artifacts.change_points = vec![ChangePointSet::new()];
                }
                Stage::Analyse(_) => {
                    self.analyse(&mut artifacts, cancel).await?;
                    if artifacts.canceled {
                        break;
                    }
                }
                Stage::Save => {
                    let change_points = if artifacts.change_points.len() > 1 {
                        remove_duplicate_tests(&artifacts.change_points)?
                    } else {
                        artifacts.change_points.iter().map(ChangePointSet::copy).collect()
                    };
                    artifacts.saved.push(SavedOutput {
                        stage_index: index,
                        series: artifacts.series.clone(),
                        change_points,
                    });
                }
            }
        }

        info!(
            sets = artifacts.series.len(),
            change_points = artifacts
                .change_points
                .iter()
                .map(ChangePointSet::len)
                .sum::<usize>(),
            canceled = artifacts.canceled,
            "Run finished"
        );
        Ok(artifacts)
    }

    async fn analyse(&self, artifacts: &mut RunArtifacts, cancel: &CancellationToken) -> Result<()> {
        let oracle = self.oracle.as_ref().ok_or_else(|| {
            PerfShiftError::Internal("analyse stage without an oracle".to_string())
        })?;

        let mut pipeline = AnalysisPipeline::from_shared(Arc::clone(oracle))
            .with_max_workers(self.plan.max_workers)
            .with_log_config(self.log_config.clone());
        if let Some(ref callback) = self.on_progress {
            let callback = Arc::clone(callback);
            pipeline = pipeline.on_progress(move |progress| callback(progress));
        }

        let mut analysed_series = Vec::with_capacity(artifacts.series.len());
        let mut analysed_points = Vec::with_capacity(artifacts.series.len());
        for set in &artifacts.series {
            let outcome = pipeline.run(set, cancel).await?;
            let canceled = outcome.report.canceled;
            analysed_series.push(outcome.series);
            analysed_points.push(outcome.change_points);
            artifacts.reports.push(outcome.report);
            if canceled {
                artifacts.canceled = true;
                break;
            }
        }

        artifacts.series = analysed_series;
        artifacts.change_points = analysed_points;
        Ok(())
    }
}
