//! Bounded concurrent analysis of a [`SeriesSet`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::oracle::{AnalysisOracle, OracleInput};
use crate::changepoint::{ChangePoint, ChangePointSet};
use crate::error::{PerfShiftError, Result};
use crate::{log_debug, log_series};
use crate::logging::{truncate_field, LogConfig};
use crate::series::{ExecutionSeries, SeriesSet};

/// Upper bound on concurrent oracle sessions unless configured otherwise.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Callback receiving the fraction of series that reached a terminal state.
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

type WorkQueue = Arc<Mutex<VecDeque<Arc<ExecutionSeries>>>>;

/// Lifecycle of one series during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesState {
    Pending,
    Submitted,
    Completed,
    Failed,
    Canceled,
}

impl SeriesState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SeriesState::Completed | SeriesState::Failed | SeriesState::Canceled
        )
    }
}

/// A series excluded from the output because its analysis failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesFailure {
    pub test: String,
    pub message: String,
}

/// Bookkeeping of one analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    /// Final state per test, in input order.
    pub states: Vec<(String, SeriesState)>,
    pub failures: Vec<SeriesFailure>,
    pub worker_count: usize,
    pub canceled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AnalysisReport {
    fn new(worker_count: usize) -> Self {
        let now = Utc::now();
        Self {
            states: Vec::new(),
            failures: Vec::new(),
            worker_count,
            canceled: false,
            started_at: now,
            finished_at: now,
        }
    }

    /// Number of series that ended in `state`.
    pub fn count(&self, state: SeriesState) -> usize {
        self.states.iter().filter(|(_, s)| *s == state).count()
    }

    pub fn completed(&self) -> usize {
        self.count(SeriesState::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(SeriesState::Failed)
    }

    pub fn state_of(&self, test: &str) -> Option<SeriesState> {
        self.states
            .iter()
            .find(|(t, _)| t == test)
            .map(|(_, state)| *state)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Result of [`AnalysisPipeline::run`].
#[derive(Debug)]
pub struct AnalysisOutcome {
    /// Completed series with their detected change points attached.
    pub series: SeriesSet,
    /// Every detected change point, merged per (revision, type).
    pub change_points: ChangePointSet,
    pub report: AnalysisReport,
}

enum WorkerMessage {
    Submitted {
        test: String,
    },
    Completed {
        series: Arc<ExecutionSeries>,
        detected: Vec<ChangePoint>,
    },
    Failed {
        test: String,
        error: PerfShiftError,
    },
    Canceled {
        test: String,
    },
}

/// Applies an [`AnalysisOracle`] to every series of a set with a bounded
/// pool of workers.
///
/// Each worker opens one oracle session and takes series from a shared queue
/// until it is empty or the run is canceled. A single collector folds the
/// workers' results into the output, so the change point set has exactly one
/// writer during a run.
///
/// # Examples
///
/// ```rust,no_run
/// use perfshift::analysis::{AnalysisPipeline, CommandOracle, DetectionRule};
/// use perfshift::series::SeriesSet;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(set: SeriesSet) -> perfshift::error::Result<()> {
/// let oracle = CommandOracle::new("bcp", "/usr/local/bin/bcp-oracle", DetectionRule::Threshold(0.6));
/// let pipeline = AnalysisPipeline::new(oracle)
///     .with_max_workers(4)
///     .on_progress(|progress| println!("{:.0}%", progress * 100.0));
///
/// let outcome = pipeline.run(&set, &CancellationToken::new()).await?;
/// println!("{} change points", outcome.change_points.len());
/// # Ok(())
/// # }
/// ```
pub struct AnalysisPipeline<O: AnalysisOracle> {
    oracle: Arc<O>,
    max_workers: usize,
    on_progress: Option<ProgressCallback>,
    log_config: LogConfig,
}

impl<O: AnalysisOracle> fmt::Debug for AnalysisPipeline<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisPipeline")
            .field("oracle", &self.oracle.name())
            .field("max_workers", &self.max_workers)
            .finish()
    }
}

impl<O: AnalysisOracle> AnalysisPipeline<O> {
    pub fn new(oracle: O) -> Self {
        Self::from_shared(Arc::new(oracle))
    }

    /// Builds a pipeline around an oracle shared with other pipelines.
    pub fn from_shared(oracle: Arc<O>) -> Self {
        Self {
            oracle,
            max_workers: DEFAULT_MAX_WORKERS,
            on_progress: None,
            log_config: LogConfig::default(),
        }
    }

    /// Caps the number of concurrent workers. Zero is treated as one.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    /// Sets a progress callback.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Number of workers used for `series_count` series.
    pub fn worker_count(&self, series_count: usize) -> usize {
        series_count.min(self.max_workers)
    }

    /// Analyses every series of `set`.
    ///
    /// Per-series failures are recorded in the report and do not fail the
    /// run. Canceling `cancel` stops workers from starting new oracle calls
    /// and discards in-flight ones; the outcome then holds only the series
    /// that completed before. A merge collision while folding results is
    /// returned as an error once every worker has stopped.
    #[instrument(skip(self, set, cancel), fields(oracle = %self.oracle.name(), series = set.len()))]
    pub async fn run(&self, set: &SeriesSet, cancel: &CancellationToken) -> Result<AnalysisOutcome> {
        let worker_count = self.worker_count(set.len());
        let mut report = AnalysisReport::new(worker_count);
        let mut states: HashMap<String, SeriesState> = set
            .test_names()
            .iter()
            .map(|t| (t.clone(), SeriesState::Pending))
            .collect();
        let change_points = ChangePointSet::new();
        let mut completed: HashMap<String, Arc<ExecutionSeries>> = HashMap::new();

        if cancel.is_cancelled() || set.is_empty() {
            if cancel.is_cancelled() {
                debug!("Analysis canceled before any series was submitted");
                states.values_mut().for_each(|s| *s = SeriesState::Canceled);
                report.canceled = true;
            }
            return Ok(self.finish(set, states, completed, change_points, report));
        }

        info!(workers = worker_count, "Starting analysis");

        let queue: WorkQueue = Arc::new(Mutex::new(set.iter().cloned().collect()));
        let token = cancel.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(run_worker(
                worker_id,
                Arc::clone(&self.oracle),
                Arc::clone(&queue),
                tx.clone(),
                token.clone(),
                self.log_config.clone(),
            ));
        }
        drop(tx);

        let total = set.len() as f64;
        let mut finished = 0usize;
        let mut fault: Option<PerfShiftError> = None;

        // Ends once every worker has dropped its sender.
        while let Some(message) = rx.recv().await {
            let (test, state) = match message {
                WorkerMessage::Submitted { test } => {
                    states.insert(test, SeriesState::Submitted);
                    continue;
                }
                WorkerMessage::Completed { series, detected } => {
                    if fault.is_none() {
                        for change_point in detected {
                            if let Err(e) = change_points.add(change_point) {
                                error!(error = %e, "Change point collision, stopping analysis");
                                fault = Some(e);
                                token.cancel();
                                break;
                            }
                        }
                    }
                    let test = series.test().to_string();
                    completed.insert(test.clone(), series);
                    (test, SeriesState::Completed)
                }
                WorkerMessage::Failed { test, error } => {
                    error!(
                        test = %truncate_field(&test, self.log_config.max_field_length),
                        error = %error,
                        "Analysis failed for series"
                    );
                    report.failures.push(SeriesFailure {
                        test: test.clone(),
                        message: error.to_string(),
                    });
                    (test, SeriesState::Failed)
                }
                WorkerMessage::Canceled { test } => {
                    debug!(test = %test, "Analysis canceled for series");
                    (test, SeriesState::Canceled)
                }
            };

            states.insert(test, state);
            finished += 1;
            if let Some(ref callback) = self.on_progress {
                callback(finished as f64 / total);
            }
        }

        let mut session_error: Option<String> = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => session_error = Some(e.to_string()),
                Err(e) => {
                    error!(error = %e, "Analysis worker did not finish");
                    if fault.is_none() && e.is_panic() {
                        fault = Some(PerfShiftError::Internal(format!(
                            "analysis worker panicked: {e}"
                        )));
                    }
                }
            }
        }

        // Series no worker got to.
        let canceled = token.is_cancelled();
        for test in set.test_names() {
            let Some(state) = states.get_mut(test) else {
                continue;
            };
            if state.is_terminal() {
                continue;
            }
            if canceled {
                *state = SeriesState::Canceled;
            } else {
                let message = session_error
                    .clone()
                    .unwrap_or_else(|| "series was never analysed".to_string());
                warn!(test = %test, reason = %message, "Series left unanalysed");
                report.failures.push(SeriesFailure {
                    test: test.clone(),
                    message,
                });
                *state = SeriesState::Failed;
            }
        }
        report.canceled = canceled;

        if let Some(fault) = fault {
            return Err(fault);
        }

        let outcome = self.finish(set, states, completed, change_points, report);
        if self.log_config.log_summaries {
            info!(
                completed = outcome.report.completed(),
                failed = outcome.report.failed(),
                canceled = outcome.report.count(SeriesState::Canceled),
                change_points = outcome.change_points.len(),
                "Analysis finished"
            );
        }
        Ok(outcome)
    }

    fn finish(
        &self,
        set: &SeriesSet,
        states: HashMap<String, SeriesState>,
        mut completed: HashMap<String, Arc<ExecutionSeries>>,
        change_points: ChangePointSet,
        mut report: AnalysisReport,
    ) -> AnalysisOutcome {
        let mut series = SeriesSet::with_heading(set.heading().to_vec());
        for test in set.test_names() {
            if let Some(done) = completed.remove(test) {
                series.replace(done);
            }
            let state = states.get(test).copied().unwrap_or(SeriesState::Pending);
            report.states.push((test.clone(), state));
        }
        report.finished_at = Utc::now();
        AnalysisOutcome {
            series,
            change_points,
            report,
        }
    }
}

/// Classifies every flagged revision and returns the series with the new
/// change points attached, replacing any from an earlier run.
fn attach_detections(
    series: &Arc<ExecutionSeries>,
    flagged: &[String],
) -> Result<(Arc<ExecutionSeries>, Vec<ChangePoint>)> {
    let mut updated = series.without_change_points();
    let mut detected = Vec::with_capacity(flagged.len());
    for revision in flagged {
        let change_point = ChangePoint::detect(revision, Arc::clone(series))?;
        updated.attach_change_point(change_point.clone())?;
        detected.push(change_point);
    }
    Ok((Arc::new(updated), detected))
}

/// Opens a session unless the run is canceled first.
async fn open_session<O: AnalysisOracle>(
    worker_id: usize,
    oracle: &O,
    cancel: &CancellationToken,
    log_config: &LogConfig,
) -> Result<Option<O::Session>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        session = oracle.open_session() => match session {
            Ok(session) => {
                log_debug!(log_config, worker = worker_id, "Oracle session opened");
                Ok(Some(session))
            }
            Err(e) => {
                error!(worker = worker_id, error = %e, "Could not open oracle session");
                Err(e)
            }
        },
    }
}

async fn run_worker<O: AnalysisOracle>(
    worker_id: usize,
    oracle: Arc<O>,
    queue: WorkQueue,
    results: mpsc::UnboundedSender<WorkerMessage>,
    cancel: CancellationToken,
    log_config: LogConfig,
) -> Result<()> {
    let opened = open_session(worker_id, oracle.as_ref(), &cancel, &log_config).await?;
    let Some(mut session) = opened else {
        return Ok(());
    };

    let rule = oracle.detection_rule();
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let next = queue.lock().await.pop_front();
        let Some(series) = next else {
            break;
        };
        if !oracle.session_usable(&session) {
            warn!(worker = worker_id, "Oracle session unusable, opening a new one");
            drop(session);
            // the popped series stays pending and is reported with the error
            match open_session(worker_id, oracle.as_ref(), &cancel, &log_config).await? {
                Some(fresh) => session = fresh,
                None => return Ok(()),
            }
        }
        let test = series.test().to_string();
        // A closed channel means the collector is gone; nothing left to report to.
        if results
            .send(WorkerMessage::Submitted { test: test.clone() })
            .is_err()
        {
            break;
        }
        log_series!(log_config, worker = worker_id, test = %test, "Analysing series");

        let input = OracleInput::from_series(&series);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            response = oracle.analyse(&mut session, &input) => Some(response),
        };

        let message = match response {
            None => WorkerMessage::Canceled { test },
            Some(Err(e)) if e.is_canceled() => WorkerMessage::Canceled { test },
            Some(Err(error)) => WorkerMessage::Failed { test, error },
            Some(Ok(response)) => match rule
                .resolve(oracle.name(), &input, response)
                .and_then(|flagged| attach_detections(&series, &flagged))
            {
                Ok((series, detected)) => {
                    log_series!(
                        log_config,
                        test = %test,
                        detected = detected.len(),
                        "Series analysed"
                    );
                    WorkerMessage::Completed { series, detected }
                }
                Err(error) => WorkerMessage::Failed { test, error },
            },
        };
        if results.send(message).is_err() {
            break;
        }
    }

    if cancel.is_cancelled() {
        // dropping the session releases it without waiting on the oracle
        drop(session);
        return Ok(());
    }
    oracle.close_session(session).await
}
