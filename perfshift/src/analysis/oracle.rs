//! The analysis oracle contract.
//!
//! An [`AnalysisOracle`] detects change-point revisions in one series at a
//! time. Oracles may hold expensive external state, so every worker of the
//! analysis pipeline opens its own session and reuses it across the series it
//! processes; a session is never shared between workers.
//!
//! Oracle responses are validated against the input once, by
//! [`DetectionRule::resolve`], and turned into revision identifiers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, instrument, warn};

use crate::error::{PerfShiftError, Result};
use crate::series::{stats, ExecutionSeries};

/// Default time allowed for a single oracle call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// What an oracle sees of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleInput {
    pub test: String,
    /// Revisions in series order.
    pub revisions: Vec<String>,
    /// Raw sample values per revision, aligned with `revisions`.
    pub samples: Vec<Vec<f64>>,
    /// Function parameter forwarded to the oracle, such as a minimum
    /// segment length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<f64>,
}

impl OracleInput {
    pub fn from_series(series: &ExecutionSeries) -> Self {
        let revisions = series.revisions().to_vec();
        let samples = revisions
            .iter()
            .map(|r| series.values_at(r).unwrap_or_default())
            .collect();
        Self {
            test: series.test().to_string(),
            revisions,
            samples,
            parameter: None,
        }
    }

    pub fn with_parameter(mut self, parameter: f64) -> Self {
        self.parameter = Some(parameter);
        self
    }

    /// One mean per revision.
    pub fn representative(&self) -> Vec<f64> {
        self.samples
            .iter()
            .map(|values| stats::mean(values).unwrap_or(f64::NAN))
            .collect()
    }

    /// Every raw sample in series order.
    pub fn flat(&self) -> Vec<f64> {
        self.samples.iter().flatten().copied().collect()
    }
}

/// Raw oracle output before validation.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleResponse {
    /// One change probability per revision.
    Probabilities(Vec<f64>),
    /// 1-based positions of flagged revisions.
    Positions(Vec<usize>),
}

impl OracleResponse {
    fn describe(&self) -> String {
        match self {
            OracleResponse::Probabilities(p) => format!("{} probabilities", p.len()),
            OracleResponse::Positions(p) => format!("{} positions", p.len()),
        }
    }
}

/// How an oracle response maps to flagged revisions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectionRule {
    /// Revisions whose probability is at least the threshold are flagged.
    Threshold(f64),
    /// The oracle names flagged revisions by 1-based position.
    Positions,
}

impl DetectionRule {
    /// Checks the response shape against the input and returns the flagged
    /// revisions in response order.
    ///
    /// # Errors
    ///
    /// [`PerfShiftError::ResultShape`] when the response variant does not
    /// match the rule, a probability vector is not one-to-one with the
    /// revisions, or a position is out of range or repeated.
    pub fn resolve(
        &self,
        oracle: &str,
        input: &OracleInput,
        response: OracleResponse,
    ) -> Result<Vec<String>> {
        let revision_count = input.revisions.len();
        match (self, response) {
            (DetectionRule::Threshold(threshold), OracleResponse::Probabilities(probabilities)) => {
                if probabilities.len() != revision_count {
                    return Err(PerfShiftError::result_shape(
                        oracle,
                        format!("{revision_count} probabilities"),
                        format!("{} probabilities", probabilities.len()),
                    ));
                }
                Ok(input
                    .revisions
                    .iter()
                    .zip(probabilities)
                    .filter(|(_, p)| *p >= *threshold)
                    .map(|(r, _)| r.clone())
                    .collect())
            }
            (DetectionRule::Positions, OracleResponse::Positions(positions)) => {
                let mut seen = HashSet::with_capacity(positions.len());
                positions
                    .into_iter()
                    .map(|position| {
                        if position == 0 || position > revision_count {
                            return Err(PerfShiftError::result_shape(
                                oracle,
                                format!("positions in 1..={revision_count}"),
                                format!("position {position}"),
                            ));
                        }
                        if !seen.insert(position) {
                            return Err(PerfShiftError::result_shape(
                                oracle,
                                "distinct positions",
                                format!("position {position} twice"),
                            ));
                        }
                        Ok(input.revisions[position - 1].clone())
                    })
                    .collect()
            }
            (DetectionRule::Threshold(_), other) => Err(PerfShiftError::result_shape(
                oracle,
                "probabilities",
                other.describe(),
            )),
            (DetectionRule::Positions, other) => Err(PerfShiftError::result_shape(
                oracle,
                "positions",
                other.describe(),
            )),
        }
    }

    /// Interprets a plain numeric vector under this rule.
    pub fn parse_values(&self, oracle: &str, values: Vec<f64>) -> Result<OracleResponse> {
        match self {
            DetectionRule::Threshold(_) => Ok(OracleResponse::Probabilities(values)),
            DetectionRule::Positions => values
                .into_iter()
                .map(|v| {
                    if v.is_finite() && v >= 0.0 && v.fract() == 0.0 {
                        Ok(v as usize)
                    } else {
                        Err(PerfShiftError::result_shape(
                            oracle,
                            "integer positions",
                            format!("value {v}"),
                        ))
                    }
                })
                .collect::<Result<Vec<_>>>()
                .map(OracleResponse::Positions),
        }
    }
}

/// A change-point detection procedure.
#[async_trait]
pub trait AnalysisOracle: Send + Sync + 'static {
    /// Per-worker state, such as a connection to an analysis engine.
    type Session: Send + 'static;

    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// How responses of this oracle are interpreted.
    fn detection_rule(&self) -> DetectionRule;

    /// Opens a session for one worker.
    async fn open_session(&self) -> Result<Self::Session>;

    /// Runs the detection for one series.
    async fn analyse(
        &self,
        session: &mut Self::Session,
        input: &OracleInput,
    ) -> Result<OracleResponse>;

    /// Releases a session once its worker is done.
    async fn close_session(&self, _session: Self::Session) -> Result<()> {
        Ok(())
    }

    /// Whether `session` can serve another series. The pipeline drops a
    /// session that fails this check and opens a fresh one before the next
    /// series.
    fn session_usable(&self, _session: &Self::Session) -> bool {
        true
    }
}

/// Oracle backed by an external program.
///
/// The program is started once per session and kept running. For every
/// series it receives one line of JSON on stdin (an [`OracleInput`]) and must
/// answer with one line holding a JSON array of numbers: probabilities for
/// [`DetectionRule::Threshold`], 1-based positions for
/// [`DetectionRule::Positions`]. The process is killed when its session is
/// dropped.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    name: String,
    program: String,
    args: Vec<String>,
    rule: DetectionRule,
    parameter: Option<f64>,
    timeout: Duration,
}

impl CommandOracle {
    pub fn new(name: impl Into<String>, program: impl Into<String>, rule: DetectionRule) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            rule,
            parameter: None,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the parameter forwarded with every input.
    pub fn with_parameter(mut self, parameter: f64) -> Self {
        self.parameter = Some(parameter);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn failure(&self, message: impl Into<String>) -> PerfShiftError {
        PerfShiftError::oracle(self.name.clone(), message)
    }
}

/// A running oracle process owned by one worker.
#[derive(Debug)]
pub struct CommandSession {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    calls: usize,
    // set while a request is written but its answer line is not fully read
    in_flight: bool,
}

impl CommandSession {
    /// Number of series analysed through this session.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// False once an exchange was abandoned halfway (timeout, I/O error,
    /// closed output or a dropped call). The pipe may then still hold an
    /// answer meant for an earlier series.
    pub fn is_usable(&self) -> bool {
        !self.in_flight
    }
}

#[async_trait]
impl AnalysisOracle for CommandOracle {
    type Session = CommandSession;

    fn name(&self) -> &str {
        &self.name
    }

    fn detection_rule(&self) -> DetectionRule {
        self.rule
    }

    #[instrument(skip(self), fields(oracle = %self.name, program = %self.program))]
    async fn open_session(&self) -> Result<CommandSession> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.failure(format!("could not start '{}': {e}", self.program)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.failure("oracle process has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.failure("oracle process has no stdout"))?;

        debug!("Oracle session opened");
        Ok(CommandSession {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            calls: 0,
            in_flight: false,
        })
    }

    async fn analyse(
        &self,
        session: &mut CommandSession,
        input: &OracleInput,
    ) -> Result<OracleResponse> {
        let mut request = match self.parameter {
            Some(parameter) if input.parameter.is_none() => {
                serde_json::to_string(&input.clone().with_parameter(parameter))?
            }
            _ => serde_json::to_string(input)?,
        };
        request.push('\n');

        if session.in_flight {
            return Err(self.failure("session is out of sync with the oracle process"));
        }
        session.in_flight = true;
        let exchange = async {
            session.stdin.write_all(request.as_bytes()).await?;
            session.stdin.flush().await?;
            let mut line = String::new();
            let read = session.stdout.read_line(&mut line).await?;
            Ok::<_, std::io::Error>((read, line))
        };

        let (read, line) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| self.failure(format!("no answer within {:?}", self.timeout)))?
            .map_err(|e| self.failure(format!("I/O with oracle process failed: {e}")))?;

        if read == 0 {
            return Err(self.failure("oracle process closed its output"));
        }
        session.in_flight = false;
        session.calls += 1;

        let values: Vec<f64> = serde_json::from_str(line.trim()).map_err(|_| {
            PerfShiftError::result_shape(
                self.name.clone(),
                "a JSON array of numbers",
                line.trim().to_string(),
            )
        })?;
        self.rule.parse_values(&self.name, values)
    }

    fn session_usable(&self, session: &CommandSession) -> bool {
        session.is_usable()
    }

    async fn close_session(&self, session: CommandSession) -> Result<()> {
        let CommandSession {
            mut child,
            stdin,
            calls,
            ..
        } = session;
        drop(stdin);

        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                debug!(oracle = %self.name, calls, "Oracle session closed");
                Ok(())
            }
            Ok(Ok(status)) => Err(self.failure(format!("oracle process exited with {status}"))),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(oracle = %self.name, "Oracle process did not exit, killing it");
                child.kill().await?;
                Ok(())
            }
        }
    }
}
