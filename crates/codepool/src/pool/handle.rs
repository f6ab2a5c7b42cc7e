use serde::Serialize;

/// Lifecycle state of a language's sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SandboxState {
    /// Image or instance is being provisioned
    Initializing,
    /// Ready to accept execs
    Running,
    /// Provisioning failed; the language is unavailable
    Failed,
    /// Torn down by the pool
    Stopped,
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SandboxState::Initializing => "initializing",
            SandboxState::Running => "running",
            SandboxState::Failed => "failed",
            SandboxState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// A live sandbox instance owned by the pool
///
/// Handles are snapshots: only the pool changes instance lifecycle, and a
/// handle's instance ID is meaningless once the pool has shut down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxHandle {
    /// Language the instance serves
    pub language: String,

    /// Runtime identifier of the instance
    pub instance_id: String,

    /// Lifecycle state at the time the snapshot was taken
    pub state: SandboxState,
}

impl SandboxHandle {
    pub fn running(language: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            instance_id: instance_id.into(),
            state: SandboxState::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == SandboxState::Running
    }
}
