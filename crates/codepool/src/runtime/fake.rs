//! Scripted in-memory sandbox runtime for tests
//!
//! Executions are answered by a behaviour closure that sees the command plus
//! the staged script and input read back from the host staging directory.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;

use crate::runtime::{
    ExecSession, InstanceSpec, OutputFrame, OutputStream, RuntimeError, SandboxRuntime,
};

/// What the behaviour closure sees for one exec
#[derive(Debug, Clone)]
pub(crate) struct FakeContext {
    pub instance_id: String,
    pub command: Vec<String>,
    pub script: Option<String>,
    pub stdin: Option<String>,
    /// File names present in the staging directory when the exec started
    pub staged_files: Vec<String>,
}

/// How a fake exec behaves
#[derive(Debug, Clone)]
pub(crate) enum FakeExec {
    /// Emit the frames, then finish with the exit code
    Finish {
        frames: Vec<OutputFrame>,
        exit_code: i64,
    },
    /// Emit the frames, then never finish
    Hang { frames: Vec<OutputFrame> },
}

impl FakeExec {
    pub fn stdout(text: &str) -> Self {
        FakeExec::Finish {
            frames: vec![OutputFrame::Stdout(text.as_bytes().to_vec())],
            exit_code: 0,
        }
    }

    pub fn stderr(text: &str, exit_code: i64) -> Self {
        FakeExec::Finish {
            frames: vec![OutputFrame::Stderr(text.as_bytes().to_vec())],
            exit_code,
        }
    }
}

type Behaviour = Box<dyn Fn(&FakeContext) -> FakeExec + Send + Sync>;

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    next_id: u32,
    pub created: Vec<InstanceSpec>,
    pub running: HashSet<String>,
    pub stopped: Vec<String>,
    pub removed: Vec<String>,
    exit_code_polls: HashMap<String, usize>,
    pub execs: Vec<FakeContext>,
    pub exit_codes: HashMap<String, Option<i64>>,
    pub kills: Vec<(String, String)>,
    pub images: Vec<String>,
}

pub(crate) struct FakeRuntime {
    staging_dir: PathBuf,
    sandbox_dir: String,
    behaviour: Behaviour,
    failing_images: HashSet<String>,
    fail_stop: bool,
    fail_start: bool,
    pending_exit_polls: usize,
    pub state: Mutex<FakeState>,
}

impl std::fmt::Debug for FakeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeRuntime")
            .field("staging_dir", &self.staging_dir)
            .finish()
    }
}

impl FakeRuntime {
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        sandbox_dir: &str,
        behaviour: impl Fn(&FakeContext) -> FakeExec + Send + Sync + 'static,
    ) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            sandbox_dir: sandbox_dir.to_owned(),
            behaviour: Box::new(behaviour),
            failing_images: HashSet::new(),
            fail_stop: false,
            fail_start: false,
            pending_exit_polls: 0,
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Make `ensure_image` fail for this image
    pub fn failing_image(mut self, image: &str) -> Self {
        self.failing_images.insert(image.to_owned());
        self
    }

    /// Make every `stop_instance` fail as if the instance were already gone
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Make every `start_instance` fail after the instance was created
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Report finished execs as still running for the first `polls` exit code queries
    pub fn slow_exit_codes(mut self, polls: usize) -> Self {
        self.pending_exit_polls = polls;
        self
    }

    pub fn snapshot<T>(&self, f: impl FnOnce(&FakeState) -> T) -> T {
        let state = self.state.lock().unwrap();
        f(&state)
    }

    /// Read a staged file back through the host side of the bind mount
    fn read_staged(&self, sandbox_path: &str) -> Option<String> {
        let name = sandbox_path.strip_prefix(&format!("{}/", self.sandbox_dir))?;
        std::fs::read_to_string(self.staging_dir.join(name)).ok()
    }

    fn context(&self, instance_id: &str, command: Vec<String>) -> FakeContext {
        let line = command.last().cloned().unwrap_or_default();
        let tokens: Vec<String> = line
            .split_whitespace()
            .map(|t| t.trim_matches('\'').to_owned())
            .collect();

        let mut script = None;
        let mut stdin = None;
        for (i, token) in tokens.iter().enumerate() {
            if !token.starts_with(&self.sandbox_dir) {
                continue;
            }
            if i > 0 && tokens[i - 1] == "<" {
                stdin = self.read_staged(token);
            } else {
                script = self.read_staged(token);
            }
        }

        let mut staged_files: Vec<String> = std::fs::read_dir(&self.staging_dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        staged_files.sort();

        FakeContext {
            instance_id: instance_id.to_owned(),
            command,
            script,
            stdin,
            staged_files,
        }
    }
}

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.failing_images.contains(image) {
            return Err(RuntimeError::ImageUnavailable {
                image: image.to_owned(),
                message: "manifest unknown".to_owned(),
            });
        }
        self.state.lock().unwrap().images.push(image.to_owned());
        Ok(())
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<String, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("fake-{}-{}", spec.language, state.next_id);
        state.created.push(spec.clone());
        Ok(id)
    }

    async fn start_instance(&self, instance_id: &str) -> Result<(), RuntimeError> {
        if self.fail_start {
            return Err(RuntimeError::ExecFailed {
                instance: instance_id.to_owned(),
                message: "cannot start container".to_owned(),
            });
        }
        self.state
            .lock()
            .unwrap()
            .running
            .insert(instance_id.to_owned());
        Ok(())
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<(), RuntimeError> {
        if self.fail_stop {
            return Err(RuntimeError::InstanceNotFound(instance_id.to_owned()));
        }
        let mut state = self.state.lock().unwrap();
        if !state.running.remove(instance_id) {
            return Err(RuntimeError::InstanceNotFound(instance_id.to_owned()));
        }
        state.stopped.push(instance_id.to_owned());
        Ok(())
    }

    async fn remove_instance(&self, instance_id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.running.remove(instance_id);
        state.removed.push(instance_id.to_owned());
        Ok(())
    }

    async fn exec(
        &self,
        instance_id: &str,
        command: Vec<String>,
    ) -> Result<ExecSession, RuntimeError> {
        if !self.state.lock().unwrap().running.contains(instance_id) {
            return Err(RuntimeError::InstanceNotFound(instance_id.to_owned()));
        }

        let context = self.context(instance_id, command);
        let behaviour = (self.behaviour)(&context);

        let mut state = self.state.lock().unwrap();
        let exec_id = format!("exec-{}", state.execs.len());
        state.execs.push(context);

        let output: OutputStream = match behaviour {
            FakeExec::Finish { frames, exit_code } => {
                state.exit_codes.insert(exec_id.clone(), Some(exit_code));
                Box::pin(stream::iter(frames.into_iter().map(Ok)))
            }
            FakeExec::Hang { frames } => {
                state.exit_codes.insert(exec_id.clone(), None);
                Box::pin(stream::iter(frames.into_iter().map(Ok)).chain(stream::pending()))
            }
        };

        Ok(ExecSession {
            id: exec_id,
            output,
        })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        let polls = state.exit_code_polls.entry(exec_id.to_owned()).or_default();
        *polls += 1;
        if *polls <= self.pending_exit_polls {
            return Ok(None);
        }
        Ok(state.exit_codes.get(exec_id).copied().flatten())
    }

    async fn kill_matching(&self, instance_id: &str, marker: &str) -> Result<(), RuntimeError> {
        self.state
            .lock()
            .unwrap()
            .kills
            .push((instance_id.to_owned(), marker.to_owned()));
        Ok(())
    }
}
