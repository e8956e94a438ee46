//! Helpers for driving a real session in tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use termprompter_engine::domain::types::{ContainerStatus, PullProgress};
use termprompter_engine::infra::docker::{ContainerSpec, ExecStream};
use termprompter_engine::{Config, ContainerEngine, DisplayMessage, Error, Result, Session};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Install a test-friendly subscriber once; `RUST_LOG` controls verbosity
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config running `/bin/sh` with a minimal prompt
pub fn sh_config() -> Config {
    Config {
        shell: Some("/bin/sh".to_string()),
        ..Config::default()
    }
}

/// Container engine that is never reachable
pub struct OfflineEngine;

fn offline() -> Error {
    Error::EngineUnavailable("engine offline".to_string())
}

#[async_trait]
impl ContainerEngine for OfflineEngine {
    async fn ping(&self) -> Result<()> {
        Err(offline())
    }

    async fn image_exists(&self, _image: &str) -> Result<bool> {
        Err(offline())
    }

    async fn pull_image(
        &self,
        _image: &str,
        _progress: mpsc::UnboundedSender<PullProgress>,
    ) -> Result<()> {
        Err(offline())
    }

    async fn inspect_container(&self, _name: &str) -> Result<Option<ContainerStatus>> {
        Err(offline())
    }

    async fn create_container(&self, _spec: ContainerSpec) -> Result<String> {
        Err(offline())
    }

    async fn start_container(&self, _id: &str) -> Result<()> {
        Err(offline())
    }

    async fn stop_container(&self, _id: &str, _timeout_secs: i64) -> Result<()> {
        Err(offline())
    }

    async fn remove_container(&self, _id: &str) -> Result<()> {
        Err(offline())
    }

    async fn create_exec(
        &self,
        _container_id: &str,
        _cmd: Vec<String>,
        _env: Vec<String>,
    ) -> Result<String> {
        Err(offline())
    }

    async fn start_exec(&self, _exec_id: &str) -> Result<ExecStream> {
        Err(offline())
    }

    async fn resize_exec(&self, _exec_id: &str, _cols: u16, _rows: u16) -> Result<()> {
        Err(offline())
    }

    async fn exec_exit_code(&self, _exec_id: &str) -> Result<Option<i64>> {
        Err(offline())
    }
}

/// A started session plus everything its primary surface received
pub struct TestSession {
    pub session: Session,
    display: mpsc::UnboundedReceiver<DisplayMessage>,
    pub messages: Vec<DisplayMessage>,
}

impl TestSession {
    pub async fn start(config: Config) -> anyhow::Result<Self> {
        init_tracing();
        let (tx, display) = mpsc::unbounded_channel();
        let mut session = Session::new(Arc::new(config), Arc::new(OfflineEngine), tx);
        session.start().await?;

        Ok(Self {
            session,
            display,
            messages: Vec::new(),
        })
    }

    /// Terminal output received so far
    pub fn output(&self) -> String {
        self.messages
            .iter()
            .filter_map(|m| match m {
                DisplayMessage::Output(data) => Some(data.as_str()),
                _ => None,
            })
            .collect()
    }

    fn collect(&mut self) {
        while let Ok(message) = self.display.try_recv() {
            self.messages.push(message);
        }
    }

    /// Drive the session until `done` holds or the timeout expires
    pub async fn drive_until<F>(&mut self, timeout: Duration, mut done: F) -> anyhow::Result<()>
    where
        F: FnMut(&TestSession) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.collect();
            if done(&*self) {
                return Ok(());
            }

            let event = tokio::time::timeout_at(deadline, self.session.next_event())
                .await
                .map_err(|_| {
                    anyhow::anyhow!("timed out; output so far: {:?}", self.output())
                })?;
            match event {
                Some(event) => self.session.handle_event(event).await?,
                None => anyhow::bail!("session event channel closed"),
            }
        }
    }

    /// Wait until the terminal output contains `needle`
    pub async fn wait_for_output(&mut self, needle: &str) -> anyhow::Result<()> {
        self.drive_until(DEFAULT_TIMEOUT, |s| s.output().contains(needle))
            .await
    }
}
