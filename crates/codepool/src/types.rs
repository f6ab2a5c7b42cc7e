use serde::{Deserialize, Serialize};

/// Resource constraints applied to a sandbox instance when it is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory ceiling in megabytes
    #[serde(default)]
    pub memory_mb: Option<u64>,

    /// CFS scheduler period in microseconds
    #[serde(default)]
    pub cpu_period: Option<i64>,

    /// CFS quota in microseconds per period (quota / period = CPU share)
    #[serde(default)]
    pub cpu_quota: Option<i64>,

    /// Maximum number of processes/threads inside the instance
    #[serde(default)]
    pub pids_limit: Option<i64>,

    /// Disable networking for the instance
    #[serde(default)]
    pub network_disabled: Option<bool>,
}

impl ResourceLimits {
    /// Create new resource limits with the default caps
    pub fn new() -> Self {
        Self::default()
    }

    /// Create limits with every field unset
    pub fn unset() -> Self {
        Self {
            memory_mb: None,
            cpu_period: None,
            cpu_quota: None,
            pids_limit: None,
            network_disabled: None,
        }
    }

    /// Set the memory ceiling in megabytes
    pub fn with_memory_mb(mut self, mb: u64) -> Self {
        self.memory_mb = Some(mb);
        self
    }

    /// Set the CPU share as a CFS quota over a period
    pub fn with_cpu(mut self, period: i64, quota: i64) -> Self {
        self.cpu_period = Some(period);
        self.cpu_quota = Some(quota);
        self
    }

    /// Set the maximum number of processes
    pub fn with_pids_limit(mut self, count: i64) -> Self {
        self.pids_limit = Some(count);
        self
    }

    /// Memory ceiling in bytes, as the sandbox runtime expects it
    pub fn memory_bytes(&self) -> Option<i64> {
        self.memory_mb
            .map(|mb| i64::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX))
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            memory_mb: overrides.memory_mb.or(self.memory_mb),
            cpu_period: overrides.cpu_period.or(self.cpu_period),
            cpu_quota: overrides.cpu_quota.or(self.cpu_quota),
            pids_limit: overrides.pids_limit.or(self.pids_limit),
            network_disabled: overrides.network_disabled.or(self.network_disabled),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: Some(128),
            cpu_period: Some(100_000),
            cpu_quota: Some(50_000), // half a CPU
            pids_limit: Some(64),
            network_disabled: Some(true),
        }
    }
}

/// A submission to run
///
/// The language must already be known to the caller; unknown languages are
/// rejected by the engine as a client error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Language ID from the registry (e.g. "python")
    pub language: String,

    /// Source code of the program
    pub source: String,

    /// Standard input for the program (empty when not given)
    #[serde(default)]
    pub stdin: String,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            source: source.into(),
            stdin: String::new(),
        }
    }

    /// Set the standard input for the program
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }
}

/// Result of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured standard output, trimmed
    pub stdout: String,

    /// Captured standard error, trimmed (carries the timeout notice on timeout)
    pub stderr: String,

    /// Wall-clock time from dispatch to completion or deadline, in milliseconds
    pub elapsed_millis: f64,

    /// Outcome classification
    pub status: ExecutionStatus,

    /// Exit code reported by the sandbox runtime, if the program completed
    #[serde(default)]
    pub exit_code: Option<i64>,
}

impl ExecutionResult {
    /// Check if the execution completed without diagnostic output
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecutionStatus::Completed)
    }
}

/// Status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Program finished and wrote nothing to standard error
    Completed,

    /// Program finished and wrote to standard error (regardless of exit code)
    Error,

    /// Program was still running when the deadline expired
    Timeout,
}

impl ExecutionStatus {
    /// Classify an execution from its stream contents.
    ///
    /// Any byte on standard error marks the run as [`ExecutionStatus::Error`],
    /// even on a zero exit code.
    pub fn classify(timed_out: bool, stderr: &[u8]) -> Self {
        if timed_out {
            ExecutionStatus::Timeout
        } else if !stderr.is_empty() {
            ExecutionStatus::Error
        } else {
            ExecutionStatus::Completed
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Completed => "Completed",
            ExecutionStatus::Error => "Error",
            ExecutionStatus::Timeout => "Timeout",
        };
        f.write_str(s)
    }
}

/// A host directory bind-mounted into a sandbox instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Source path on the host
    pub source: String,

    /// Target path in the sandbox
    pub target: String,

    /// Whether the mount is read-only
    #[serde(default)]
    pub read_only: bool,
}

impl BindMount {
    /// Render in the `source:target[:ro]` form used by container runtimes
    pub fn to_bind_string(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}
