//! Sandbox runtime management API
//!
//! Isolation itself is delegated to a container runtime. This module defines
//! the operations codepool needs from it (image, instance lifecycle, attached
//! exec) as the [`SandboxRuntime`] trait, and provides a Docker backend.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

pub use crate::runtime::docker::DockerRuntime;
use crate::types::{BindMount, ResourceLimits};

mod docker;
#[cfg(test)]
pub(crate) mod fake;

/// Label attached to every instance with the language it serves
pub const LANGUAGE_LABEL: &str = "codepool.language";

/// Errors reported by the sandbox runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to connect to sandbox runtime: {0}")]
    Connect(String),

    #[error("failed to ensure image {image}: {message}")]
    ImageUnavailable { image: String, message: String },

    #[error("failed to create instance for '{language}': {message}")]
    CreateFailed { language: String, message: String },

    #[error("instance {0} not found")]
    InstanceNotFound(String),

    #[error("exec failed in instance {instance}: {message}")]
    ExecFailed { instance: String, message: String },

    #[error("docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

/// Everything needed to create one sandbox instance
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSpec {
    /// Instance name (unique per runtime)
    pub name: String,

    /// Language the instance serves
    pub language: String,

    /// Image reference to create the instance from
    pub image: String,

    /// Environment variables for the instance
    pub env: HashMap<String, String>,

    /// Resource caps
    pub limits: ResourceLimits,

    /// Host directories bind-mounted into the instance
    pub mounts: Vec<BindMount>,
}

impl InstanceSpec {
    /// Environment in `KEY=value` form, sorted by key
    pub fn env_pairs(&self) -> Vec<String> {
        let mut pairs: Vec<String> = self.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort_unstable();
        pairs
    }
}

/// One chunk of output from an attached exec, tagged by stream origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFrame {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// Stream of output frames that ends when the exec'd command exits
pub type OutputStream = Pin<Box<dyn Stream<Item = Result<OutputFrame, RuntimeError>> + Send>>;

/// An attached exec that has been started
pub struct ExecSession {
    /// Runtime identifier of the exec, used to query its exit code
    pub id: String,

    /// Output frames as they arrive
    pub output: OutputStream,
}

impl fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecSession").field("id", &self.id).finish()
    }
}

/// Management API of the runtime that provides sandbox instances
#[async_trait]
pub trait SandboxRuntime: Send + Sync + fmt::Debug {
    /// Make sure the image is present locally, pulling it if needed
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create an instance (not yet started), returning its ID
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<String, RuntimeError>;

    /// Start a created instance in idle-but-alive mode
    async fn start_instance(&self, instance_id: &str) -> Result<(), RuntimeError>;

    /// Stop an instance. Instances are auto-removed once stopped.
    async fn stop_instance(&self, instance_id: &str) -> Result<(), RuntimeError>;

    /// Force-remove an instance whether or not it was started
    async fn remove_instance(&self, instance_id: &str) -> Result<(), RuntimeError>;

    /// Run a command inside a running instance with stdout and stderr attached
    async fn exec(
        &self,
        instance_id: &str,
        command: Vec<String>,
    ) -> Result<ExecSession, RuntimeError>;

    /// Exit code of a finished exec, `None` while it is still running
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError>;

    /// Kill every process in the instance whose command line contains `marker`
    async fn kill_matching(&self, instance_id: &str, marker: &str) -> Result<(), RuntimeError>;
}

/// Shell script that SIGKILLs processes whose command line contains `marker`.
///
/// The script skips its own shell. `marker` must not contain shell
/// metacharacters; run IDs are hyphenated hex.
pub fn kill_script(marker: &str) -> String {
    format!(
        "for p in /proc/[0-9]*; do pid=${{p#/proc/}}; [ \"$pid\" = \"$$\" ] && continue; \
         grep -qa -- '{marker}' \"$p/cmdline\" 2>/dev/null && kill -9 \"$pid\" 2>/dev/null; \
         done; true"
    )
}
