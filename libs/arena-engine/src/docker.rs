// Docker-backed sandbox using Bollard: exec, archive transfer and stats
// against the shared executor container.

use crate::environment::{EnvironmentHandle, EnvironmentManager};
use crate::error::EngineError;
use crate::sandbox::{CommandOutput, Sandbox};
use arena_common::config::ExecutorSettings;
use async_trait::async_trait;
use bollard::container::{DownloadFromContainerOptions, LogOutput, StatsOptions, UploadToContainerOptions};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::Docker;
use futures_util::stream::{StreamExt, TryStreamExt};
use tracing::{debug, warn};

pub struct DockerSandbox {
    docker: Docker,
    environments: EnvironmentManager,
}

impl DockerSandbox {
    pub fn connect(settings: ExecutorSettings) -> anyhow::Result<Self> {
        use anyhow::Context;

        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;
        Ok(Self::new(docker, settings))
    }

    pub fn new(docker: Docker, settings: ExecutorSettings) -> Self {
        Self {
            environments: EnvironmentManager::new(docker.clone(), settings),
            docker,
        }
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn acquire(&self) -> Result<EnvironmentHandle, EngineError> {
        self.environments.acquire().await
    }

    async fn upload(&self, env: &EnvironmentHandle, dir: &str, archive: Vec<u8>) -> Result<(), EngineError> {
        let options = UploadToContainerOptions {
            path: dir.to_string(),
            ..Default::default()
        };

        self.docker
            .upload_to_container(&env.id, Some(options), archive.into())
            .await
            .map_err(|e| EngineError::infrastructure("Failed to upload archive", e))
    }

    async fn download(&self, env: &EnvironmentHandle, path: &str) -> Result<Vec<u8>, EngineError> {
        let options = DownloadFromContainerOptions { path: path.to_string() };

        let chunks: Vec<_> = self
            .docker
            .download_from_container(&env.id, Some(options))
            .try_collect()
            .await
            .map_err(|e| EngineError::infrastructure("Failed to download archive", e))?;

        Ok(chunks.iter().flat_map(|chunk| chunk.iter().copied()).collect())
    }

    async fn run(&self, env: &EnvironmentHandle, working_dir: &str, command: &str) -> Result<CommandOutput, EngineError> {
        let exec_config = CreateExecOptions {
            cmd: Some(vec!["/bin/bash".to_string(), "-c".to_string(), command.to_string()]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(working_dir.to_string()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&env.id, exec_config)
            .await
            .map_err(|e| EngineError::infrastructure("Failed to create exec", e))?;

        let start_config = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        let started = self
            .docker
            .start_exec(&exec.id, Some(start_config))
            .await
            .map_err(|e| EngineError::infrastructure("Failed to start exec", e))?;

        let mut output = Vec::new();
        match started {
            StartExecResults::Attached { output: mut stream, .. } => {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message })
                        | Ok(LogOutput::StdErr { message })
                        | Ok(LogOutput::Console { message }) => output.extend_from_slice(&message),
                        Ok(LogOutput::StdIn { .. }) => {}
                        Err(e) => return Err(EngineError::infrastructure("Failed to read exec output", e)),
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(EngineError::Infrastructure("exec started detached".to_string()));
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| EngineError::infrastructure("Failed to inspect exec", e))?;

        debug!(exit_code = ?inspect.exit_code, output_bytes = output.len(), "Exec finished");

        Ok(CommandOutput {
            output,
            exit_code: inspect.exit_code,
        })
    }

    async fn memory_usage(&self, env: &EnvironmentHandle) -> Option<u64> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };

        match self.docker.stats(&env.id, Some(options)).next().await {
            Some(Ok(stats)) => stats.memory_stats.usage,
            Some(Err(e)) => {
                warn!(error = %e, "Failed to sample container memory");
                None
            }
            None => None,
        }
    }
}
