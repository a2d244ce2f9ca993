/// Execution Environment Manager
///
/// One long-lived executor container, looked up by a well-known name and
/// created on first use. It is never torn down here; removing it is an
/// operational concern.
///
/// Concurrent first callers are serialized by a creation lock, and a
/// "name already in use" conflict from the daemon is reconciled by looking
/// the container up again, so `acquire` is idempotent even across processes.

use crate::error::EngineError;
use arena_common::config::ExecutorSettings;
use bollard::container::{Config, CreateContainerOptions, ListContainersOptions, StartContainerOptions};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerSummary, HostConfig};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Identifies the shared executor container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHandle {
    pub id: String,
    pub name: String,
}

impl EnvironmentHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

pub struct EnvironmentManager {
    docker: Docker,
    settings: ExecutorSettings,
    create_lock: Mutex<()>,
}

impl EnvironmentManager {
    pub fn new(docker: Docker, settings: ExecutorSettings) -> Self {
        Self {
            docker,
            settings,
            create_lock: Mutex::new(()),
        }
    }

    /// Return the shared container, creating and starting it if absent.
    #[tracing::instrument(skip(self), fields(container = %self.settings.container_name))]
    pub async fn acquire(&self) -> Result<EnvironmentHandle, EngineError> {
        if let Some(handle) = self.find_running().await? {
            return Ok(handle);
        }

        let _guard = self.create_lock.lock().await;

        // Another caller may have finished creating it while we waited
        if let Some(handle) = self.find_running().await? {
            return Ok(handle);
        }

        match self.find().await? {
            Some(summary) => {
                let handle = self.handle_from(&summary)?;
                info!(container_id = %handle.id, "Starting stopped executor container");
                self.start(&handle.id).await?;
                Ok(handle)
            }
            None => self.create().await,
        }
    }

    async fn find(&self) -> Result<Option<ContainerSummary>, EngineError> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![self.settings.container_name.clone()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| EngineError::infrastructure("Failed to list containers", e))?;

        // The name filter is a substring match; insist on the exact name
        let wanted = format!("/{}", self.settings.container_name);
        Ok(containers.into_iter().find(|c| {
            c.names
                .as_ref()
                .map_or(false, |names| names.iter().any(|n| *n == wanted))
        }))
    }

    async fn find_running(&self) -> Result<Option<EnvironmentHandle>, EngineError> {
        match self.find().await? {
            Some(summary) if summary.state.as_deref() == Some("running") => {
                let handle = self.handle_from(&summary)?;
                debug!(container_id = %handle.id, "Reusing executor container");
                Ok(Some(handle))
            }
            _ => Ok(None),
        }
    }

    fn handle_from(&self, summary: &ContainerSummary) -> Result<EnvironmentHandle, EngineError> {
        let id = summary
            .id
            .clone()
            .ok_or_else(|| EngineError::Infrastructure("container summary without id".to_string()))?;
        Ok(EnvironmentHandle::new(id, self.settings.container_name.clone()))
    }

    async fn create(&self) -> Result<EnvironmentHandle, EngineError> {
        self.ensure_image().await?;

        let config = Config {
            image: Some(self.settings.image.clone()),
            // Keep the container alive; jobs arrive through exec
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            entrypoint: Some(vec![]),
            tty: Some(true),
            working_dir: Some(self.settings.work_dir.clone()),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                memory: Some(i64::from(self.settings.memory_limit_mb) * 1024 * 1024),
                nano_cpus: Some((f64::from(self.settings.cpu_limit) * 1_000_000_000.0) as i64),
                network_mode: Some("none".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: self.settings.container_name.as_str(),
            platform: None,
        };

        let id = match self.docker.create_container(Some(options), config).await {
            Ok(response) => {
                info!(container_id = %response.id, image = %self.settings.image, "Created executor container");
                response.id
            }
            Err(DockerError::DockerResponseServerError { status_code: 409, .. }) => {
                // Created by someone else between our lookup and create
                warn!("Executor container already exists, reconciling");
                let summary = self.find().await?.ok_or_else(|| {
                    EngineError::Infrastructure("container reported as existing but not found".to_string())
                })?;
                self.handle_from(&summary)?.id
            }
            Err(e) => return Err(EngineError::infrastructure("Failed to create executor container", e)),
        };

        self.start(&id).await?;
        Ok(EnvironmentHandle::new(id, self.settings.container_name.clone()))
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        match self
            .docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            // Already running
            Err(DockerError::DockerResponseServerError { status_code: 304, .. }) => Ok(()),
            Err(e) => Err(EngineError::infrastructure("Failed to start executor container", e)),
        }
    }

    /// Pull the executor image if it is not present locally
    async fn ensure_image(&self) -> Result<(), EngineError> {
        let image = self.settings.image.as_str();
        if self.docker.inspect_image(image).await.is_ok() {
            debug!("Image cache hit: {}", image);
            return Ok(());
        }

        warn!("Image cache miss: {} (pulling now)", image);
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| EngineError::infrastructure("Failed to pull executor image", e))?;
        }

        info!("Image pulled successfully: {}", image);
        Ok(())
    }
}
