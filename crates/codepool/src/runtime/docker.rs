//! Docker backend for the sandbox runtime
//!
//! Talks to the Docker Engine API through bollard. Instances are containers
//! kept alive by an idle shell on a TTY; executions are attached execs.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::StreamExt;
use tracing::{debug, info, instrument};

use crate::runtime::{
    ExecSession, InstanceSpec, LANGUAGE_LABEL, OutputFrame, RuntimeError, SandboxRuntime,
    kill_script,
};

/// Seconds Docker waits after SIGTERM before killing an instance on stop
const STOP_GRACE_SECS: i64 = 2;

/// Client timeout in seconds for socket connections
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Sandbox runtime backed by a Docker daemon
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the local defaults (`DOCKER_HOST` or the default socket)
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Connect(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Connect to a Docker daemon listening on a unix socket
    pub fn connect_socket(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref().to_string_lossy();
        let docker =
            Docker::connect_with_socket(&path, CLIENT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
                .map_err(|e| RuntimeError::Connect(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Connect to the socket if one is given, otherwise use the local defaults
    pub fn connect_with(socket: Option<&Path>) -> Result<Self, RuntimeError> {
        match socket {
            Some(path) => Self::connect_socket(path),
            None => Self::connect(),
        }
    }

    /// Check that the daemon answers
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map_err(|e| RuntimeError::Connect(e.to_string()))?;
        Ok(())
    }
}

/// Translate an instance spec into the container configuration
fn container_config(spec: &InstanceSpec) -> ContainerConfig<String> {
    let limits = &spec.limits;
    let host_config = HostConfig {
        auto_remove: Some(true),
        memory: limits.memory_bytes(),
        // No swap beyond the memory ceiling
        memory_swap: limits.memory_bytes(),
        cpu_period: limits.cpu_period,
        cpu_quota: limits.cpu_quota,
        pids_limit: limits.pids_limit,
        binds: Some(spec.mounts.iter().map(|m| m.to_bind_string()).collect()),
        ..Default::default()
    };

    ContainerConfig {
        image: Some(spec.image.clone()),
        // An idle shell on a TTY keeps the instance alive for execs
        cmd: Some(vec!["/bin/sh".to_owned()]),
        tty: Some(true),
        open_stdin: Some(true),
        env: Some(spec.env_pairs()),
        labels: Some(HashMap::from([(
            LANGUAGE_LABEL.to_owned(),
            spec.language.clone(),
        )])),
        network_disabled: limits.network_disabled,
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Map an error from an instance-scoped call, naming the instance on 404
fn instance_error(instance_id: &str, err: DockerError) -> RuntimeError {
    if is_not_found(&err) {
        RuntimeError::InstanceNotFound(instance_id.to_owned())
    } else {
        RuntimeError::Docker(err)
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    #[instrument(skip(self))]
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "image present locally");
            return Ok(());
        }

        info!(image, "pulling image");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| RuntimeError::ImageUnavailable {
                image: image.to_owned(),
                message: e.to_string(),
            })?;
        }

        Ok(())
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<String, RuntimeError> {
        let options = Some(CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        });

        let response = self
            .docker
            .create_container(options, container_config(spec))
            .await
            .map_err(|e| RuntimeError::CreateFailed {
                language: spec.language.clone(),
                message: e.to_string(),
            })?;

        for warning in &response.warnings {
            debug!(%warning, "docker warning on create");
        }

        Ok(response.id)
    }

    #[instrument(skip(self))]
    async fn start_instance(&self, instance_id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(instance_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| instance_error(instance_id, e))
    }

    #[instrument(skip(self))]
    async fn stop_instance(&self, instance_id: &str) -> Result<(), RuntimeError> {
        let options = Some(StopContainerOptions {
            t: STOP_GRACE_SECS,
        });
        self.docker
            .stop_container(instance_id, options)
            .await
            .map_err(|e| instance_error(instance_id, e))
    }

    #[instrument(skip(self))]
    async fn remove_instance(&self, instance_id: &str) -> Result<(), RuntimeError> {
        let options = Some(RemoveContainerOptions {
            force: true,
            ..Default::default()
        });
        self.docker
            .remove_container(instance_id, options)
            .await
            .map_err(|e| instance_error(instance_id, e))
    }

    #[instrument(skip(self, command))]
    async fn exec(
        &self,
        instance_id: &str,
        command: Vec<String>,
    ) -> Result<ExecSession, RuntimeError> {
        let options = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            cmd: Some(command),
            ..Default::default()
        };

        let created = self
            .docker
            .create_exec(instance_id, options)
            .await
            .map_err(|e| instance_error(instance_id, e))?;

        let started = self
            .docker
            .start_exec(
                &created.id,
                Some(StartExecOptions {
                    detach: false,
                    tty: false,
                    output_capacity: None,
                }),
            )
            .await?;

        let output = match started {
            StartExecResults::Attached { output, .. } => output,
            StartExecResults::Detached => {
                return Err(RuntimeError::ExecFailed {
                    instance: instance_id.to_owned(),
                    message: "exec started detached".to_owned(),
                });
            }
        };

        let frames = output.filter_map(|item| async move {
            match item {
                Ok(LogOutput::StdOut { message }) => Some(Ok(OutputFrame::Stdout(message.to_vec()))),
                Ok(LogOutput::StdErr { message }) => Some(Ok(OutputFrame::Stderr(message.to_vec()))),
                // Console frames only appear with a TTY; treat them as stdout
                Ok(LogOutput::Console { message }) => {
                    Some(Ok(OutputFrame::Stdout(message.to_vec())))
                }
                Ok(LogOutput::StdIn { .. }) => None,
                Err(e) => Some(Err(RuntimeError::Docker(e))),
            }
        });

        debug!(exec_id = %created.id, "exec attached");

        Ok(ExecSession {
            id: created.id,
            output: Box::pin(frames),
        })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError> {
        let inspect = self.docker.inspect_exec(exec_id).await?;
        if inspect.running.unwrap_or(false) {
            return Ok(None);
        }
        Ok(inspect.exit_code)
    }

    #[instrument(skip(self))]
    async fn kill_matching(&self, instance_id: &str, marker: &str) -> Result<(), RuntimeError> {
        let options = CreateExecOptions {
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            cmd: Some(vec!["sh".to_owned(), "-c".to_owned(), kill_script(marker)]),
            ..Default::default()
        };

        let created = self.docker.create_exec(instance_id, options).await?;
        self.docker
            .start_exec(
                &created.id,
                Some(StartExecOptions {
                    detach: true,
                    tty: false,
                    output_capacity: None,
                }),
            )
            .await?;

        Ok(())
    }
}
