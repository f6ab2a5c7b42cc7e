//! Execution engine for codepool
//!
//! Runs one request to completion inside its language's sandbox: stages the
//! source and input, execs the run command, enforces the deadline and
//! classifies the outcome from the captured streams.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{Config, Language};
use crate::engine::capture::StreamCapture;
use crate::engine::command::build_exec_command;
use crate::engine::staging::StagedArtifacts;
use crate::pool::{PoolError, SandboxLease, SandboxPool};
use crate::registry::LanguageRegistry;
use crate::runtime::{RuntimeError, SandboxRuntime};
use crate::types::{ExecutionRequest, ExecutionResult, ExecutionStatus};

mod capture;
mod command;
mod staging;

/// How often the exit code is queried while the exec still reports running
const EXIT_CODE_ATTEMPTS: u32 = 10;

/// Pause between exit code queries
const EXIT_CODE_INTERVAL: Duration = Duration::from_millis(20);

/// Errors that prevent an execution from producing a result
///
/// Program failures and timeouts are not errors; they are reported through
/// [`ExecutionStatus`].
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("sandbox for language '{0}' is unavailable")]
    UnavailableSandbox(String),

    #[error("failed to stage execution artifacts: {0}")]
    Staging(#[source] std::io::Error),

    #[error("sandbox runtime failure: {0}")]
    Transport(#[from] RuntimeError),
}

impl ExecuteError {
    /// Whether the caller is at fault (and retrying the same request is pointless)
    pub fn is_client_error(&self) -> bool {
        matches!(self, ExecuteError::UnsupportedLanguage(_))
    }
}

impl From<PoolError> for ExecuteError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Unavailable(language) => ExecuteError::UnavailableSandbox(language),
            PoolError::Staging { source, .. } => ExecuteError::Staging(source),
            PoolError::Runtime(e) => ExecuteError::Transport(e),
        }
    }
}

/// Engine settings taken from the configuration
///
/// Staging paths are not part of the settings: the engine always stages
/// into the directory its pool mounts into instances.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Wall-clock bound per execution
    pub deadline: Duration,

    /// Kill the program inside the instance when the deadline expires
    pub kill_on_timeout: bool,

    /// Maximum bytes kept per output stream
    pub max_output: Option<usize>,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            deadline: config.deadline(),
            kill_on_timeout: config.kill_on_timeout,
            max_output: config.max_output,
        }
    }

    /// Override the execution deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Notice appended to stderr when an execution hits its deadline
pub fn timeout_notice(deadline: Duration) -> String {
    let secs = deadline.as_secs_f64();
    if secs.fract() == 0.0 {
        format!("Error: Code execution timed out after {secs:.0} seconds.")
    } else {
        format!("Error: Code execution timed out after {secs} seconds.")
    }
}

/// Read the exit code of a finished exec
///
/// The runtime can still report the exec as running for a moment after its
/// output stream ended, so `None` is retried a few times before giving up.
async fn exit_code_of(runtime: &dyn SandboxRuntime, exec_id: &str) -> Option<i64> {
    for attempt in 1..=EXIT_CODE_ATTEMPTS {
        match runtime.exec_exit_code(exec_id).await {
            Ok(Some(code)) => return Some(code),
            Ok(None) if attempt < EXIT_CODE_ATTEMPTS => {
                tokio::time::sleep(EXIT_CODE_INTERVAL).await;
            }
            Ok(None) => debug!(%exec_id, "exec still reported running, exit code unknown"),
            Err(e) => {
                warn!(%exec_id, error = %e, "could not read exit code");
                return None;
            }
        }
    }
    None
}

/// Raw outcome of one exec before classification
struct ExecOutcome {
    capture: StreamCapture,
    elapsed: Duration,
    timed_out: bool,
    exit_code: Option<i64>,
}

/// Runs execution requests against a [`SandboxPool`]
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    registry: Arc<LanguageRegistry>,
    pool: Arc<SandboxPool>,
    settings: EngineSettings,
}

impl ExecutionEngine {
    pub fn new(pool: Arc<SandboxPool>, settings: EngineSettings) -> Self {
        Self {
            registry: Arc::clone(pool.registry()),
            pool,
            settings,
        }
    }

    /// Create an engine with settings taken from the configuration
    pub fn from_config(pool: Arc<SandboxPool>, config: &Config) -> Self {
        Self::new(pool, EngineSettings::from_config(config))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn pool(&self) -> &Arc<SandboxPool> {
        &self.pool
    }

    /// Execute one request
    ///
    /// Staged artifacts are removed on every path, including errors. An
    /// unknown language fails before anything is staged or executed.
    #[instrument(skip(self, request), fields(language = %request.language))]
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecuteError> {
        let language = self
            .registry
            .definition_for(&request.language)
            .ok_or_else(|| ExecuteError::UnsupportedLanguage(request.language.clone()))?;

        let lease = self.pool.acquire(&request.language).await?;
        let result = self.run_leased(&lease, language, request).await;
        self.pool.release(lease).await;

        result
    }

    async fn run_leased(
        &self,
        lease: &SandboxLease,
        language: &Language,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, ExecuteError> {
        let run_id = Uuid::new_v4().to_string();

        let artifacts = StagedArtifacts::stage(
            self.pool.staging_dir(),
            self.pool.sandbox_dir(),
            &run_id,
            language,
            &request.source,
            &request.stdin,
        )
        .await
        .map_err(ExecuteError::Staging)?;

        let command = build_exec_command(
            language,
            artifacts.script_in_sandbox(),
            artifacts.stdin_in_sandbox(),
        );
        debug!(%run_id, instance_id = lease.instance_id(), ?command, "dispatching exec");

        let outcome = self.dispatch(lease.instance_id(), &run_id, command).await;
        artifacts.remove().await;
        let outcome = outcome?;

        let result = self.classify(outcome);
        info!(
            %run_id,
            status = %result.status,
            elapsed_ms = result.elapsed_millis,
            exit_code = ?result.exit_code,
            "execution finished"
        );

        Ok(result)
    }

    /// Run the command and collect its output until it exits or the deadline expires
    async fn dispatch(
        &self,
        instance_id: &str,
        run_id: &str,
        command: Vec<String>,
    ) -> Result<ExecOutcome, RuntimeError> {
        let runtime = self.pool.runtime();
        let mut capture = StreamCapture::new(self.settings.max_output);

        let sink = &mut capture;
        let started = Instant::now();
        let run = async move {
            let mut session = runtime.exec(instance_id, command).await?;
            while let Some(frame) = session.output.next().await {
                sink.push(frame?);
            }
            Ok::<_, RuntimeError>(session.id)
        };
        let finished = tokio::time::timeout(self.settings.deadline, run).await;
        let elapsed = started.elapsed();

        let (timed_out, exit_code) = match finished {
            Ok(Ok(exec_id)) => (false, exit_code_of(runtime.as_ref(), &exec_id).await),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(
                    %run_id,
                    deadline = ?self.settings.deadline,
                    "execution timed out"
                );
                if self.settings.kill_on_timeout {
                    if let Err(e) = runtime.kill_matching(instance_id, run_id).await {
                        warn!(%run_id, error = %e, "failed to kill timed out program");
                    }
                }
                (true, None)
            }
        };

        if capture.is_truncated() {
            debug!(%run_id, limit = ?self.settings.max_output, "output truncated");
        }

        Ok(ExecOutcome {
            capture,
            elapsed,
            timed_out,
            exit_code,
        })
    }

    fn classify(&self, outcome: ExecOutcome) -> ExecutionResult {
        let status = ExecutionStatus::classify(outcome.timed_out, outcome.capture.stderr());
        let (stdout, mut stderr) = outcome.capture.into_strings();

        if outcome.timed_out {
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str(&timeout_notice(self.settings.deadline));
        }

        ExecutionResult {
            stdout: stdout.trim().to_owned(),
            stderr: stderr.trim().to_owned(),
            elapsed_millis: outcome.elapsed.as_secs_f64() * 1000.0,
            status,
            exit_code: outcome.exit_code,
        }
    }
}
