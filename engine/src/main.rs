//! TermPrompter headless driver
//!
//! Runs a session on the controlling terminal: stdin is forwarded to the
//! shell, output goes to stdout, logs go to stderr.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use tokio::io::AsyncWriteExt;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use termprompter_engine::{
    Config, DisplayMessage, DockerEngine, RecordingOptions, Session, SessionState, Surface,
};

#[derive(Debug, Default)]
struct Args {
    script: Option<PathBuf>,
    record: bool,
    record_path: Option<PathBuf>,
}

impl Args {
    fn parse(args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut args = args.peekable();
        let mut parsed = Args::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--record" => {
                    parsed.record = true;
                    // A bare FILE only counts when it is a cast file
                    parsed.record_path = args
                        .next_if(|next| next.ends_with(".cast"))
                        .map(PathBuf::from);
                }
                flag if flag.starts_with("--record=") => {
                    parsed.record = true;
                    parsed.record_path = Some(PathBuf::from(&flag["--record=".len()..]));
                }
                "-h" | "--help" => {
                    println!("Usage: termprompter [SCRIPT] [--record[=FILE]]");
                    std::process::exit(0);
                }
                flag if flag.starts_with('-') => bail!("unknown option: {}", flag),
                _ if parsed.script.is_none() => parsed.script = Some(PathBuf::from(&arg)),
                _ => bail!("unexpected argument: {}", arg),
            }
        }
        Ok(parsed)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mut config = Config::load()?;
    // No display widget reports executed commands here
    config.detect_commands_from_input = true;
    let config = Arc::new(config);

    // stdout carries the terminal stream
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse(std::env::args().skip(1))?;
    info!("Starting TermPrompter");

    let engine = Arc::new(DockerEngine::new(config.docker_socket.as_deref())?);
    let (display_tx, display_rx) = mpsc::unbounded_channel();
    let display = tokio::spawn(render(display_rx));

    let mut session = Session::new(config.clone(), engine, display_tx);
    session.start().await?;

    if let Some(path) = &args.script {
        match session.load_script(path).await {
            Ok(script) => {
                if let Some(step) = script.steps.first() {
                    info!("Step {}: {} -> {}", step.step_number, step.title, step.command);
                }
                if let Some(docker) = script.docker.clone() {
                    if let Err(e) = session
                        .start_container_session(docker, script.base_dir())
                        .await
                    {
                        error!("Container session unavailable: {}", e);
                    }
                }
            }
            Err(e) => error!("Failed to load script {}: {}", path.display(), e),
        }
    }

    if args.record {
        session.start_recording(RecordingOptions::default())?;
    }

    let mut input = spawn_stdin_reader();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(data) = input.recv() => {
                if let Err(e) = session.send_input(Surface::Primary, &data).await {
                    warn!("Failed to forward input: {}", e);
                }
            }
            event = session.next_event() => {
                let Some(event) = event else { break };
                if let Err(e) = session.handle_event(event).await {
                    error!("Session error: {}", e);
                }
                if session.state() == SessionState::Idle {
                    info!("Shell exited");
                    break;
                }
            }
        }
    }

    if args.record {
        if session.is_recording() {
            session.stop_recording()?;
        }
        match session.save_recording(args.record_path.as_deref()).await {
            Ok(path) => info!("Recording written to {}", path.display()),
            Err(e) => error!("Failed to save recording: {}", e),
        }
    }

    session.shutdown().await;
    drop(session);
    let _ = display.await;

    info!("TermPrompter shutdown complete");
    Ok(())
}

/// Primary surface bound to stdout
async fn render(mut messages: mpsc::UnboundedReceiver<DisplayMessage>) {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = messages.recv().await {
        match message {
            DisplayMessage::Output(data) => {
                if stdout.write_all(data.as_bytes()).await.is_err() {
                    break;
                }
                let _ = stdout.flush().await;
            }
            DisplayMessage::PullProgress(progress) => info!(
                "{} {}",
                progress.status,
                progress.progress.unwrap_or_default()
            ),
            DisplayMessage::AdvanceStep(index) => info!("Advanced to step {}", index + 1),
            DisplayMessage::ContainerSessionEnded => info!("Container session ended"),
            other => debug!("Display message: {:?}", other),
        }
    }
}

/// Read stdin on a dedicated thread so a pending read never blocks shutdown
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin().lock();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
