//! Containerized process backend

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::domain::container::{parse_port_bindings, parse_volumes, ContainerConfig};
use crate::domain::types::{BackendKind, PullProgress, StartedContainer};
use crate::error::{Error, Result};
use crate::infra::docker::{ContainerEngine, ContainerSpec};
use crate::service::backend::{ContainerHandle, EventSink, ProcessBackend, Utf8Decoder};

/// Lifecycle of a containerized backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Unstarted,
    Pulling,
    Creating,
    Running,
    ExecAttached,
    Stopped,
    Errored,
}

/// Settings shared by every containerized backend
#[derive(Debug, Clone)]
pub struct ContainerDefaults {
    pub name_prefix: String,
    pub shell: String,
    pub workdir: String,
    pub stop_timeout_secs: i64,
}

impl From<&Config> for ContainerDefaults {
    fn from(config: &Config) -> Self {
        Self {
            name_prefix: config.container_name_prefix.clone(),
            shell: config.default_container_shell.clone(),
            workdir: config.default_container_workdir.clone(),
            stop_timeout_secs: config.container_stop_timeout_secs,
        }
    }
}

/// A container plus one attached interactive exec
pub struct ContainerBackend {
    engine: Arc<dyn ContainerEngine>,
    config: ContainerConfig,
    base_path: Option<PathBuf>,
    defaults: ContainerDefaults,
    state: ContainerState,
    container_id: Option<String>,
    exec_id: Option<String>,
    input: Option<Pin<Box<dyn AsyncWrite + Send>>>,
    pump: Option<JoinHandle<()>>,
}

impl ContainerBackend {
    /// `base_path` anchors relative volume host paths (the script's directory)
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        config: ContainerConfig,
        base_path: Option<PathBuf>,
        defaults: ContainerDefaults,
    ) -> Self {
        Self {
            engine,
            config,
            base_path,
            defaults,
            state: ContainerState::Unstarted,
            container_id: None,
            exec_id: None,
            input: None,
            pump: None,
        }
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// Fail with `EngineUnavailable` unless the engine answers a ping
    pub async fn ensure_available(&mut self) -> Result<()> {
        self.engine.ping().await.map_err(|e| match e {
            Error::EngineUnavailable(_) => e,
            other => Error::EngineUnavailable(other.to_string()),
        })
    }

    /// Pull the image unless a matching one is present locally
    pub async fn pull_if_missing(
        &mut self,
        progress: mpsc::UnboundedSender<PullProgress>,
    ) -> Result<()> {
        let image = self.config.image.clone();
        if self.engine.image_exists(&image).await? {
            debug!("Image {} already present", image);
            return Ok(());
        }

        self.state = ContainerState::Pulling;
        self.engine.pull_image(&image, progress).await
    }

    /// Bring the container up, reusing a running one with the same name
    pub async fn start(
        &mut self,
        progress: mpsc::UnboundedSender<PullProgress>,
    ) -> Result<StartedContainer> {
        match self.run_start(progress).await {
            Ok(started) => Ok(started),
            Err(e) => {
                error!("Failed to start container session: {}", e);
                self.state = ContainerState::Errored;
                Err(e)
            }
        }
    }

    async fn run_start(
        &mut self,
        progress: mpsc::UnboundedSender<PullProgress>,
    ) -> Result<StartedContainer> {
        self.ensure_available().await?;
        self.pull_if_missing(progress).await?;

        let name = self.config.name.clone().unwrap_or_else(|| {
            format!(
                "{}{}",
                self.defaults.name_prefix,
                Utc::now().timestamp_millis()
            )
        });

        if let Some(existing) = self.engine.inspect_container(&name).await? {
            if existing.running {
                info!("Reusing running container {}", name);
                let id = if existing.id.is_empty() {
                    name.clone()
                } else {
                    existing.id
                };
                self.container_id = Some(id.clone());
                self.state = ContainerState::Running;
                return Ok(StartedContainer {
                    container_id: id,
                    name,
                    reused: true,
                });
            }

            info!("Removing stopped container {}", name);
            self.engine.remove_container(&name).await?;
        }

        self.state = ContainerState::Creating;
        let id = self.engine.create_container(self.container_spec(&name)).await?;
        if let Err(e) = self.engine.start_container(&id).await {
            // auto_remove never fires for a container that was not started
            if let Err(remove_err) = self.engine.remove_container(&id).await {
                warn!("Failed to remove unstarted container {}: {}", id, remove_err);
            }
            return Err(e);
        }
        self.container_id = Some(id.clone());
        self.state = ContainerState::Running;

        Ok(StartedContainer {
            container_id: id,
            name,
            reused: false,
        })
    }

    /// Canonical creation options for this container
    pub fn container_spec(&self, name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: self.config.image.clone(),
            cmd: self
                .config
                .cmd
                .clone()
                .unwrap_or_else(|| vec![self.defaults.shell.clone()]),
            working_dir: self
                .config
                .workdir
                .clone()
                .unwrap_or_else(|| self.defaults.workdir.clone()),
            env: self.config.env.clone(),
            binds: parse_volumes(&self.config.volumes, self.base_path.as_deref()),
            port_bindings: parse_port_bindings(&self.config.ports),
            auto_remove: self.config.auto_remove,
        }
    }

    /// Attach an interactive exec and start pumping its output into `sink`
    pub async fn create_exec_stream(&mut self, cols: u16, rows: u16, sink: EventSink) -> Result<()> {
        let container_id = self.container_id.clone().ok_or(Error::NoActiveContainer)?;

        let cmd = self
            .config
            .shell
            .clone()
            .unwrap_or_else(|| vec![self.defaults.shell.clone()]);
        let mut env = vec!["TERM=xterm-256color".to_string()];
        env.extend(self.config.env.iter().cloned());

        let exec_id = match self.engine.create_exec(&container_id, cmd, env).await {
            Ok(id) => id,
            Err(e) => {
                self.state = ContainerState::Errored;
                return Err(e);
            }
        };
        let stream = match self.engine.start_exec(&exec_id).await {
            Ok(stream) => stream,
            Err(e) => {
                self.state = ContainerState::Errored;
                return Err(e);
            }
        };

        if let Err(e) = self.engine.resize_exec(&exec_id, cols, rows).await {
            warn!("Initial exec resize failed: {}", e);
        }

        let mut output = stream.output;
        let engine = self.engine.clone();
        let pump_exec_id = exec_id.clone();
        let pump = tokio::spawn(async move {
            let mut decoder = Utf8Decoder::default();
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(bytes) => {
                        if !sink.output(decoder.decode(&bytes)) {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Exec stream error: {}", e);
                        break;
                    }
                }
            }
            sink.output(decoder.finish());

            let code = match engine.exec_exit_code(&pump_exec_id).await {
                Ok(code) => code.map(|c| c as i32),
                Err(e) => {
                    debug!("Failed to read exec exit code: {}", e);
                    None
                }
            };
            info!("Container exec {} ended with code {:?}", pump_exec_id, code);
            sink.exited(code);
        });

        self.exec_id = Some(exec_id);
        self.input = Some(stream.input);
        self.pump = Some(pump);
        self.state = ContainerState::ExecAttached;
        Ok(())
    }

    /// Detach the exec, then stop and remove the container. Never fails.
    pub async fn stop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(mut input) = self.input.take() {
            if let Err(e) = input.shutdown().await {
                debug!("Exec input shutdown failed: {}", e);
            }
        }
        self.exec_id = None;

        let Some(id) = self.container_id.take() else {
            if self.state != ContainerState::Errored {
                self.state = ContainerState::Stopped;
            }
            return;
        };

        match self.engine.inspect_container(&id).await {
            Ok(Some(status)) => {
                if status.running {
                    if let Err(e) = self
                        .engine
                        .stop_container(&id, self.defaults.stop_timeout_secs)
                        .await
                    {
                        warn!("Failed to stop container {}: {}", id, e);
                    }
                }
                if !self.config.auto_remove {
                    if let Err(e) = self.engine.remove_container(&id).await {
                        warn!("Failed to remove container {}: {}", id, e);
                    }
                }
            }
            Ok(None) => debug!("Container {} already gone", id),
            Err(e) => warn!("Failed to inspect container {}: {}", id, e),
        }

        self.state = ContainerState::Stopped;
        info!("Container session {} stopped", id);
    }
}

#[async_trait]
impl ProcessBackend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Containerized
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| Error::ExecFailed("no exec attached".to_string()))?;
        input
            .write_all(data)
            .await
            .map_err(|e| Error::ExecFailed(e.to_string()))?;
        input
            .flush()
            .await
            .map_err(|e| Error::ExecFailed(e.to_string()))
    }

    async fn resize(&mut self, cols: u16, rows: u16) {
        let Some(exec_id) = self.exec_id.as_deref() else {
            return;
        };
        if let Err(e) = self.engine.resize_exec(exec_id, cols, rows).await {
            warn!("Failed to resize exec {}: {}", exec_id, e);
        }
    }

    async fn terminate(&mut self) {
        self.stop().await;
    }

    fn container(&self) -> Option<ContainerHandle> {
        self.container_id.as_ref().map(|id| ContainerHandle {
            engine: self.engine.clone(),
            container_id: id.clone(),
        })
    }
}

impl Drop for ContainerBackend {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
