//! Container engine layer

use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;

use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
        StartContainerOptions, StopContainerOptions,
    },
    exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults},
    image::{CreateImageOptions, ListImagesOptions},
    models::{HostConfig, PortBinding as EnginePortBinding},
    Docker,
};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::container::PortBinding;
use crate::domain::types::{ContainerStatus, PullProgress};
use crate::error::{Error, Result};

/// Container creation options
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Container name
    pub name: String,
    /// Image to use
    pub image: String,
    /// Command overriding the image entrypoint/cmd
    pub cmd: Vec<String>,
    /// Working directory
    pub working_dir: String,
    /// `KEY=value` entries
    pub env: Vec<String>,
    /// `host:container:mode` binds
    pub binds: Vec<String>,
    /// Container port (with protocol) -> host bindings
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,
    /// Let the engine remove the container once it stops
    pub auto_remove: bool,
}

/// Attached exec: output chunks in arrival order plus the stdin writer
pub struct ExecStream {
    pub output: BoxStream<'static, Result<Bytes>>,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

/// Operations the containerized backend needs from a container engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check that the engine answers
    async fn ping(&self) -> Result<()>;

    /// Whether an image matching the reference is present locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pull an image, forwarding every progress event
    async fn pull_image(
        &self,
        image: &str,
        progress: mpsc::UnboundedSender<PullProgress>,
    ) -> Result<()>;

    /// Inspect a container by name or id; `None` when it does not exist
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerStatus>>;

    /// Create a container, returning its id
    async fn create_container(&self, spec: ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<()>;

    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Create an interactive TTY exec, returning its id
    async fn create_exec(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        env: Vec<String>,
    ) -> Result<String>;

    /// Start an exec with stdin hijacked
    async fn start_exec(&self, exec_id: &str) -> Result<ExecStream>;

    async fn resize_exec(&self, exec_id: &str, cols: u16, rows: u16) -> Result<()>;

    /// Exit code of a finished exec
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>>;
}

/// Docker implementation of the container engine
pub struct DockerEngine {
    client: Docker,
}

impl DockerEngine {
    /// Connect to the Docker daemon
    pub fn new(socket_path: Option<&str>) -> Result<Self> {
        let client = match socket_path {
            Some(path) => Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| Error::EngineUnavailable(e.to_string()))?,
            None => Docker::connect_with_local_defaults()
                .map_err(|e| Error::EngineUnavailable(e.to_string()))?,
        };

        Ok(Self { client })
    }
}

/// Add `:latest` when the reference carries neither tag nor digest
fn image_reference(image: &str) -> String {
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.contains(':') || last_segment.contains('@') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| Error::EngineUnavailable(format!("Docker ping failed: {}", e)))?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let mut filters = HashMap::new();
        filters.insert("reference".to_string(), vec![image.to_string()]);

        let options = ListImagesOptions {
            all: false,
            filters,
            ..Default::default()
        };

        let images = self.client.list_images(Some(options)).await?;
        Ok(!images.is_empty())
    }

    async fn pull_image(
        &self,
        image: &str,
        progress: mpsc::UnboundedSender<PullProgress>,
    ) -> Result<()> {
        let image_name = image_reference(image);
        info!("Pulling image {}...", image_name);

        let options = CreateImageOptions {
            from_image: image_name.clone(),
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                        let _ = progress.send(PullProgress {
                            status,
                            id: info.id,
                            progress: info.progress,
                        });
                    }
                }
                Err(e) => {
                    return Err(Error::ImagePullFailed {
                        image: image_name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!("Image {} pulled successfully", image_name);
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerStatus>> {
        let info = match self
            .client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => info,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state = info.state.as_ref();
        Ok(Some(ContainerStatus {
            id: info.id.clone().unwrap_or_default(),
            name: info
                .name
                .as_deref()
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            state: state
                .and_then(|s| s.status.as_ref())
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            running: state.and_then(|s| s.running).unwrap_or(false),
            image: info
                .config
                .as_ref()
                .and_then(|c| c.image.clone())
                .unwrap_or_default(),
        }))
    }

    async fn create_container(&self, spec: ContainerSpec) -> Result<String> {
        let port_bindings: HashMap<String, Option<Vec<EnginePortBinding>>> = spec
            .port_bindings
            .iter()
            .map(|(port, bindings)| {
                let bindings = bindings
                    .iter()
                    .map(|b| EnginePortBinding {
                        host_ip: None,
                        host_port: Some(b.host_port.clone()),
                    })
                    .collect();
                (port.clone(), Some(bindings))
            })
            .collect();

        // Build host config
        let host_config = HostConfig {
            binds: if spec.binds.is_empty() {
                None
            } else {
                Some(spec.binds.clone())
            },
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            auto_remove: Some(spec.auto_remove),
            ..Default::default()
        };

        // Build container config
        let config = Config {
            image: Some(spec.image.clone()),
            tty: Some(true),
            open_stdin: Some(true),
            stdin_once: Some(false),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(spec.cmd.clone()),
            working_dir: Some(spec.working_dir.clone()),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::ContainerCreateFailed(e.to_string()))?;

        info!(
            "Container {} created from image {} with ID: {}",
            spec.name, spec.image, response.id
        );
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::ContainerCreateFailed(format!("Failed to start container: {}", e)))?;

        info!("Container {} started", id);
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<()> {
        let options = StopContainerOptions { t: timeout_secs };

        self.client.stop_container(id, Some(options)).await?;

        info!("Container {} stopped", id);
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: false,
            ..Default::default()
        };

        self.client.remove_container(id, Some(options)).await?;

        info!("Container {} removed", id);
        Ok(())
    }

    async fn create_exec(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        env: Vec<String>,
    ) -> Result<String> {
        let options = CreateExecOptions {
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(true),
            cmd: Some(cmd),
            env: if env.is_empty() { None } else { Some(env) },
            ..Default::default()
        };

        let created = self
            .client
            .create_exec(container_id, options)
            .await
            .map_err(|e| Error::ExecFailed(e.to_string()))?;

        debug!("Exec {} created in container {}", created.id, container_id);
        Ok(created.id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<ExecStream> {
        let options = StartExecOptions {
            detach: false,
            tty: true,
            ..Default::default()
        };

        let started = self
            .client
            .start_exec(exec_id, Some(options))
            .await
            .map_err(|e| Error::ExecFailed(e.to_string()))?;

        match started {
            StartExecResults::Attached { output, input } => Ok(ExecStream {
                output: output
                    .map(|item| {
                        item.map(|log| log.into_bytes())
                            .map_err(|e| Error::ExecFailed(e.to_string()))
                    })
                    .boxed(),
                input,
            }),
            StartExecResults::Detached => {
                Err(Error::ExecFailed("exec started detached".to_string()))
            }
        }
    }

    async fn resize_exec(&self, exec_id: &str, cols: u16, rows: u16) -> Result<()> {
        self.client
            .resize_exec(
                exec_id,
                ResizeExecOptions {
                    height: rows,
                    width: cols,
                },
            )
            .await?;
        Ok(())
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        let info = self.client.inspect_exec(exec_id).await?;
        Ok(info.exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_reference_adds_latest() {
        assert_eq!(image_reference("alpine"), "alpine:latest");
        assert_eq!(image_reference("node:20"), "node:20");
        assert_eq!(
            image_reference("localhost:5000/team/tool"),
            "localhost:5000/team/tool:latest"
        );
        assert_eq!(image_reference("repo/img@sha256:abc"), "repo/img@sha256:abc");
    }
}
