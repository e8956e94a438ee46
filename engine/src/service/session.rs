//! Session router: owns the active backend and routes its bytes

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::domain::container::ContainerConfig;
use crate::domain::recording::RecordingStats;
use crate::domain::script::Script;
use crate::domain::types::{
    BackendKind, DisplayMessage, PullProgress, SessionState, SessionStatus, StartedContainer,
    Surface,
};
use crate::error::{Error, Result};
use crate::infra::docker::ContainerEngine;
use crate::infra::pty::{LocalPty, LocalPtyOptions};
use crate::service::backend::{BackendEvent, EventSink, ProcessBackend};
use crate::service::container::{ContainerBackend, ContainerDefaults};
use crate::service::recorder::{Recorder, RecordingOptions};
use crate::service::tracker::{CommandTracker, PendingAdvance};

/// Sending half of a display surface
pub type DisplayHandle = mpsc::UnboundedSender<DisplayMessage>;

/// Creates local shell backends
pub trait LocalSpawner: Send + Sync {
    fn spawn(&self, options: &LocalPtyOptions, sink: EventSink) -> Result<Box<dyn ProcessBackend>>;
}

/// Spawns shells on a real pseudo-terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct PtySpawner;

impl LocalSpawner for PtySpawner {
    fn spawn(&self, options: &LocalPtyOptions, sink: EventSink) -> Result<Box<dyn ProcessBackend>> {
        Ok(Box::new(LocalPty::spawn(options, sink)?))
    }
}

/// Work item for [`Session::handle_event`]
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Backend(BackendEvent),
    /// A scheduled step advance came due
    Advance { step_index: usize },
}

/// A terminal session: one active backend, the display surfaces it feeds,
/// the recorder and the command tracker.
pub struct Session {
    config: Arc<Config>,
    engine: Arc<dyn ContainerEngine>,
    spawner: Arc<dyn LocalSpawner>,
    backend: Option<Box<dyn ProcessBackend>>,
    generation: u64,
    state: SessionState,
    backend_tx: mpsc::UnboundedSender<BackendEvent>,
    backend_rx: mpsc::UnboundedReceiver<BackendEvent>,
    advance_tx: mpsc::UnboundedSender<usize>,
    advance_rx: mpsc::UnboundedReceiver<usize>,
    primary: DisplayHandle,
    detached: Option<DisplayHandle>,
    recorder: Recorder,
    tracker: CommandTracker,
    script: Option<Script>,
    cols: u16,
    rows: u16,
}

impl Session {
    /// Create a session whose local backend is a real PTY shell
    pub fn new(config: Arc<Config>, engine: Arc<dyn ContainerEngine>, primary: DisplayHandle) -> Self {
        Self::with_spawner(config, engine, Arc::new(PtySpawner), primary)
    }

    pub fn with_spawner(
        config: Arc<Config>,
        engine: Arc<dyn ContainerEngine>,
        spawner: Arc<dyn LocalSpawner>,
        primary: DisplayHandle,
    ) -> Self {
        let (backend_tx, backend_rx) = mpsc::unbounded_channel();
        let (advance_tx, advance_rx) = mpsc::unbounded_channel();

        Self {
            recorder: Recorder::new(config.recording_title.clone()),
            tracker: CommandTracker::new(
                config.auto_advance,
                Duration::from_millis(config.advance_delay_ms),
            ),
            cols: config.default_cols,
            rows: config.default_rows,
            config,
            engine,
            spawner,
            backend: None,
            generation: 0,
            state: SessionState::Idle,
            backend_tx,
            backend_rx,
            advance_tx,
            advance_rx,
            primary,
            detached: None,
            script: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(|b| b.kind())
    }

    pub fn is_detached(&self) -> bool {
        self.detached.is_some()
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    pub fn dimensions(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    /// Start the local shell
    pub async fn start(&mut self) -> Result<()> {
        self.set_state(SessionState::Switching);
        self.drop_backend().await;
        self.start_local()
    }

    /// Wait for the next backend notification or due advance
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        tokio::select! {
            Some(event) = self.backend_rx.recv() => Some(SessionEvent::Backend(event)),
            Some(step_index) = self.advance_rx.recv() => Some(SessionEvent::Advance { step_index }),
            else => None,
        }
    }

    pub async fn handle_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Backend(event) if event.generation() != self.generation => {
                debug!("Dropping event from retired backend {}", event.generation());
                Ok(())
            }
            SessionEvent::Backend(BackendEvent::Output { data, .. }) => {
                self.recorder.record_output(&data);
                self.route(DisplayMessage::Output(data));
                Ok(())
            }
            SessionEvent::Backend(BackendEvent::Exited { code, .. }) => self.backend_exited(code).await,
            SessionEvent::Advance { step_index } => {
                if let Some(next) = self.tracker.advance(step_index) {
                    info!("Advancing to step {}", next + 1);
                    self.notify_primary(DisplayMessage::AdvanceStep(next));
                }
                Ok(())
            }
        }
    }

    async fn backend_exited(&mut self, code: Option<i32>) -> Result<()> {
        let Some(kind) = self.backend_kind() else {
            return Ok(());
        };
        info!("{:?} backend exited with code {:?}", kind, code);

        self.drop_backend().await;

        match kind {
            BackendKind::Containerized => {
                self.notify_all(DisplayMessage::ContainerSessionEnded);
                self.set_state(SessionState::Switching);
                self.start_local()
            }
            BackendKind::Local if self.config.respawn_local_shell => {
                self.set_state(SessionState::Switching);
                self.start_local()
            }
            BackendKind::Local => {
                self.set_state(SessionState::Idle);
                Ok(())
            }
        }
    }

    /// Forward input from a display surface to the active backend
    pub async fn send_input(&mut self, surface: Surface, data: &[u8]) -> Result<()> {
        if surface == Surface::Detached && self.detached.is_none() {
            debug!("Dropping input from a closed detached surface");
            return Ok(());
        }
        self.forward_input(data).await
    }

    /// Type a command into the terminal, pressing return when `execute` is set
    pub async fn write_command(&mut self, text: &str, execute: bool) -> Result<()> {
        let mut data = text.to_string();
        if execute {
            data.push('\r');
        }
        self.forward_input(data.as_bytes()).await
    }

    async fn forward_input(&mut self, data: &[u8]) -> Result<()> {
        if self.state != SessionState::Ready {
            debug!("Dropping {} input bytes while {:?}", data.len(), self.state);
            return Ok(());
        }
        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };

        backend.write(data).await?;

        let text = String::from_utf8_lossy(data);
        self.recorder.record_input(&text);

        if self.config.detect_commands_from_input {
            for line in self.tracker.observe_input(&text) {
                self.command_executed(&line);
            }
        }
        Ok(())
    }

    /// A command line was executed. Returns whether it matched the active step.
    pub fn command_executed(&mut self, line: &str) -> bool {
        match self.tracker.command_executed(line) {
            Some(pending) => {
                self.schedule_advance(pending);
                true
            }
            None => false,
        }
    }

    fn schedule_advance(&self, pending: PendingAdvance) {
        let tx = self.advance_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(pending.delay).await;
            let _ = tx.send(pending.step_index);
        });
    }

    pub fn set_active_step(&mut self, index: usize) {
        self.tracker.set_active_step(index);
    }

    pub fn active_step(&self) -> usize {
        self.tracker.active_step()
    }

    pub fn set_auto_advance(&mut self, enabled: bool) {
        self.tracker.set_enabled(enabled);
    }

    /// Propagate new terminal dimensions
    pub async fn resize(&mut self, cols: u16, rows: u16) {
        if cols == 0 || rows == 0 {
            return;
        }
        self.cols = cols;
        self.rows = rows;
        if let Some(backend) = self.backend.as_mut() {
            backend.resize(cols, rows).await;
        }
        self.recorder.update_dimensions(cols, rows);
    }

    /// Move terminal output to a detached surface
    pub fn detach(&mut self, handle: DisplayHandle) {
        self.detached = Some(handle);
        self.notify_primary(DisplayMessage::Detached);
        info!("Terminal detached");
    }

    /// Return terminal output to the primary surface
    pub fn attach(&mut self) {
        if self.detached.take().is_none() {
            return;
        }
        self.notify_primary(DisplayMessage::Attached);
        self.notify_primary(DisplayMessage::Refit);
        info!("Terminal attached");
    }

    /// Load a script and reset step tracking to its first step
    pub async fn load_script(&mut self, path: &Path) -> Result<Script> {
        let script = Script::load(path).await?;
        info!(
            "Loaded script '{}' with {} steps",
            script.title,
            script.steps.len()
        );
        self.tracker.set_steps(&script.steps);
        self.script = Some(script.clone());
        Ok(script)
    }

    pub async fn save_script(&mut self, path: &Path, content: &str) -> Result<()> {
        tokio::fs::write(path, content)
            .await
            .map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;
        info!("Script saved to: {}", path.display());
        Ok(())
    }

    /// Whether the container engine answers
    pub async fn check_engine(&self) -> bool {
        match self.engine.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!("Container engine unavailable: {}", e);
                false
            }
        }
    }

    /// Swap the active backend for a containerized one.
    ///
    /// On failure the session falls back to a local shell and the error is
    /// returned.
    pub async fn start_container_session(
        &mut self,
        config: ContainerConfig,
        base_path: Option<PathBuf>,
    ) -> Result<StartedContainer> {
        info!("Starting container session with image {}", config.image);
        self.set_state(SessionState::Switching);
        self.drop_backend().await;

        let mut backend = ContainerBackend::new(
            self.engine.clone(),
            config,
            base_path,
            ContainerDefaults::from(self.config.as_ref()),
        );

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<PullProgress>();
        let mut targets = vec![self.primary.clone()];
        targets.extend(self.detached.clone());
        tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                for target in &targets {
                    let _ = target.send(DisplayMessage::PullProgress(progress.clone()));
                }
            }
        });

        let started = match backend.start(progress_tx).await {
            Ok(started) => started,
            Err(e) => {
                self.fall_back_to_local();
                return Err(e);
            }
        };

        self.generation += 1;
        let sink = EventSink::new(self.generation, self.backend_tx.clone());
        if let Err(e) = backend.create_exec_stream(self.cols, self.rows, sink).await {
            error!("Failed to attach to container: {}", e);
            backend.stop().await;
            self.fall_back_to_local();
            return Err(e);
        }

        info!(
            "Container session ready: {} ({})",
            started.name, started.container_id
        );
        self.backend = Some(Box::new(backend));
        self.set_state(SessionState::Ready);
        Ok(started)
    }

    /// Stop the containerized backend and return to a local shell
    pub async fn stop_container_session(&mut self) -> Result<()> {
        if self.backend_kind() != Some(BackendKind::Containerized) {
            debug!("No container session to stop");
            return Ok(());
        }
        self.set_state(SessionState::Switching);
        self.drop_backend().await;
        self.start_local()
    }

    pub fn start_recording(&mut self, mut options: RecordingOptions) -> Result<()> {
        if options.cols == 0 || options.rows == 0 {
            options.cols = self.cols;
            options.rows = self.rows;
        }
        if options.title.is_none() {
            options.title = self.script.as_ref().map(|s| s.title.clone());
        }
        self.recorder.start(options)
    }

    pub fn stop_recording(&mut self) -> Result<()> {
        self.recorder.stop()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Save the current or last recording.
    ///
    /// Without a path a generated name under `recordings_dir` is used.
    pub async fn save_recording(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Path::new(&self.config.recordings_dir).join(Recorder::generate_filename()),
        };
        self.recorder.save(&path).await
    }

    pub fn recording_stats(&self) -> Option<RecordingStats> {
        self.recorder.stats()
    }

    /// Combined backend and engine status
    pub async fn status(&self) -> SessionStatus {
        let container = match self.backend.as_ref().and_then(|b| b.container()) {
            Some(handle) => handle.status().await,
            None => None,
        };

        SessionStatus {
            is_containerized: self.backend_kind() == Some(BackendKind::Containerized),
            engine_available: self.check_engine().await,
            container,
        }
    }

    /// Terminate the active backend
    pub async fn shutdown(&mut self) {
        info!("Shutting down session");
        self.drop_backend().await;
        self.set_state(SessionState::Idle);
    }

    fn start_local(&mut self) -> Result<()> {
        self.generation += 1;
        let sink = EventSink::new(self.generation, self.backend_tx.clone());
        let options = LocalPtyOptions {
            shell: self.config.shell.clone(),
            cols: self.cols,
            rows: self.rows,
            minimal_prompt: self.config.minimal_prompt,
            prompt_override_delay: Duration::from_millis(self.config.prompt_override_delay_ms),
            cwd: None,
        };

        match self.spawner.spawn(&options, sink) {
            Ok(backend) => {
                self.backend = Some(backend);
                self.set_state(SessionState::Ready);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start local shell: {}", e);
                self.set_state(SessionState::Idle);
                Err(e)
            }
        }
    }

    fn fall_back_to_local(&mut self) {
        warn!("Falling back to local shell");
        if let Err(e) = self.start_local() {
            error!("Local fallback failed: {}", e);
        }
    }

    /// Terminate and forget the active backend; its late events are ignored
    async fn drop_backend(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.terminate().await;
        }
        self.generation += 1;
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.notify_all(DisplayMessage::SessionState(state));
    }

    /// Terminal output goes to the detached surface when present, else the primary
    fn route(&mut self, message: DisplayMessage) {
        if let Some(detached) = self.detached.as_ref() {
            match detached.send(message) {
                Ok(()) => return,
                Err(mpsc::error::SendError(message)) => {
                    // Detached surface went away without an explicit attach
                    self.attach();
                    let _ = self.primary.send(message);
                }
            }
        } else if self.primary.send(message).is_err() {
            debug!("Primary surface closed");
        }
    }

    fn notify_primary(&self, message: DisplayMessage) {
        let _ = self.primary.send(message);
    }

    fn notify_all(&self, message: DisplayMessage) {
        if let Some(detached) = self.detached.as_ref() {
            let _ = detached.send(message.clone());
        }
        let _ = self.primary.send(message);
    }
}
