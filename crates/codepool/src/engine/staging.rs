//! Staging of per-execution artifacts
//!
//! The script and its input are written under the host staging directory,
//! which every sandbox instance sees at `sandbox_dir` through its bind mount.
//! Both files carry the execution's unique run ID so concurrent executions
//! sharing an instance never collide.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::Language;

/// Extension of the staged input artifact
const STDIN_EXTENSION: &str = "stdin";

/// Script and input artifacts of one execution
///
/// Call [`remove`](Self::remove) once the execution is done. If the guard is
/// dropped first (an error while staging, or the execution future being
/// cancelled) the files are removed synchronously on drop.
#[derive(Debug)]
pub(crate) struct StagedArtifacts {
    script_host: PathBuf,
    stdin_host: PathBuf,
    script_sandbox: String,
    stdin_sandbox: String,
    removed: bool,
}

/// Resolve a staged file name under a directory
///
/// Returns an error if the name could escape the directory.
fn staged_path(dir: &Path, name: &str) -> io::Result<PathBuf> {
    if name.contains("..") || name.contains('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path traversal not allowed: {name}"),
        ));
    }
    Ok(dir.join(name))
}

impl StagedArtifacts {
    /// Write the script and input for `run_id`
    ///
    /// The input artifact is always written, empty if there is no input.
    pub(crate) async fn stage(
        staging_dir: &Path,
        sandbox_dir: &str,
        run_id: &str,
        language: &Language,
        source: &str,
        stdin: &str,
    ) -> io::Result<Self> {
        let script_name = language.script_name(run_id);
        let stdin_name = format!("{run_id}.{STDIN_EXTENSION}");
        let sandbox_dir = sandbox_dir.trim_end_matches('/');

        // Guard exists before any write so partial staging is cleaned up
        let artifacts = Self {
            script_host: staged_path(staging_dir, &script_name)?,
            stdin_host: staged_path(staging_dir, &stdin_name)?,
            script_sandbox: format!("{sandbox_dir}/{script_name}"),
            stdin_sandbox: format!("{sandbox_dir}/{stdin_name}"),
            removed: false,
        };

        tokio::fs::write(&artifacts.script_host, source).await?;
        tokio::fs::write(&artifacts.stdin_host, stdin).await?;

        debug!(
            script = %artifacts.script_host.display(),
            source_bytes = source.len(),
            stdin_bytes = stdin.len(),
            "staged artifacts"
        );

        Ok(artifacts)
    }

    /// Script path as seen inside the sandbox instance
    pub(crate) fn script_in_sandbox(&self) -> &str {
        &self.script_sandbox
    }

    /// Input path as seen inside the sandbox instance
    pub(crate) fn stdin_in_sandbox(&self) -> &str {
        &self.stdin_sandbox
    }

    /// Remove both artifacts. Missing files are not an error.
    pub(crate) async fn remove(mut self) {
        for path in [&self.script_host, &self.stdin_host] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove staged artifact"),
            }
        }
        self.removed = true;
    }
}

impl Drop for StagedArtifacts {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        for path in [&self.script_host, &self.stdin_host] {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed staged artifact on drop"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove staged artifact on drop"),
            }
        }
    }
}
