//! Local shell bound to a pseudo-terminal

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, info, warn};

use crate::domain::types::BackendKind;
use crate::error::{Error, Result};
use crate::service::backend::{EventSink, ProcessBackend, Utf8Decoder};

const READ_BUFFER_SIZE: usize = 4096;
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

const POSIX_PROMPT: &str = "$ ";
const WINDOWS_PROMPT: &str = "> ";

/// Shell families that differ in how the prompt can be configured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellFamily {
    Bash,
    Zsh,
    Fish,
    Posix,
    PowerShell,
    Cmd,
    Other,
}

impl ShellFamily {
    /// Detect the family from the executable name
    pub fn detect(shell: &str) -> Self {
        let name = shell
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(shell)
            .to_ascii_lowercase();
        let name = name.strip_suffix(".exe").unwrap_or(&name);

        match name {
            "bash" => ShellFamily::Bash,
            "zsh" => ShellFamily::Zsh,
            "fish" => ShellFamily::Fish,
            "sh" | "dash" | "ash" | "ksh" | "mksh" => ShellFamily::Posix,
            "pwsh" | "powershell" => ShellFamily::PowerShell,
            "cmd" => ShellFamily::Cmd,
            _ => ShellFamily::Other,
        }
    }
}

/// Pick the shell: explicit override, then SHELL / COMSPEC, then the platform default
pub fn resolve_shell(shell_override: Option<&str>) -> String {
    if let Some(shell) = shell_override.map(str::trim).filter(|s| !s.is_empty()) {
        return shell.to_string();
    }

    #[cfg(windows)]
    {
        std::env::var("COMSPEC")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "powershell.exe".to_string())
    }

    #[cfg(not(windows))]
    {
        std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/bash".to_string())
    }
}

/// How a shell gets launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub remove_env: Vec<String>,
    /// Written once after spawn for shells that take no prompt arguments
    pub delayed_command: Option<String>,
}

/// Build the launch plan for a shell, optionally with a minimal prompt
pub fn launch_plan(shell: &str, minimal_prompt: bool) -> LaunchPlan {
    let mut plan = LaunchPlan {
        program: shell.to_string(),
        args: Vec::new(),
        env: vec![
            ("TERM".to_string(), "xterm-256color".to_string()),
            ("COLORTERM".to_string(), "truecolor".to_string()),
        ],
        remove_env: Vec::new(),
        delayed_command: None,
    };

    if !minimal_prompt {
        return plan;
    }

    let prompt_env = |plan: &mut LaunchPlan, vars: &[(&str, &str)]| {
        for (k, v) in vars {
            plan.env.push((k.to_string(), v.to_string()));
        }
    };

    match ShellFamily::detect(shell) {
        ShellFamily::Bash => {
            plan.args = vec!["--norc".to_string(), "--noprofile".to_string()];
            prompt_env(&mut plan, &[("PS1", POSIX_PROMPT), ("PS2", "> ")]);
            plan.remove_env.push("PROMPT_COMMAND".to_string());
        }
        ShellFamily::Zsh => {
            plan.args = vec!["-f".to_string()];
            prompt_env(
                &mut plan,
                &[
                    ("PS1", POSIX_PROMPT),
                    ("PROMPT", POSIX_PROMPT),
                    ("RPROMPT", ""),
                    ("RPS1", ""),
                    ("PROMPT_EOL_MARK", ""),
                ],
            );
        }
        ShellFamily::Fish => {
            plan.args = vec![
                "--init-command".to_string(),
                format!(
                    "function fish_prompt; printf '{}'; end; function fish_right_prompt; end; function fish_greeting; end",
                    POSIX_PROMPT
                ),
            ];
        }
        ShellFamily::Posix => {
            prompt_env(&mut plan, &[("PS1", POSIX_PROMPT)]);
            plan.remove_env.push("ENV".to_string());
        }
        ShellFamily::PowerShell => {
            plan.args = vec![
                "-NoLogo".to_string(),
                "-NoProfile".to_string(),
                "-NoExit".to_string(),
                "-Command".to_string(),
                format!("function prompt {{ '{}' }}", WINDOWS_PROMPT),
            ];
        }
        ShellFamily::Cmd => {
            prompt_env(&mut plan, &[("PROMPT", "$G$S")]);
        }
        ShellFamily::Other => {
            plan.delayed_command = Some(format!("export PS1='{}'; clear\r", POSIX_PROMPT));
        }
    }

    plan
}

/// Options for spawning the local shell
#[derive(Debug, Clone)]
pub struct LocalPtyOptions {
    pub shell: Option<String>,
    pub cols: u16,
    pub rows: u16,
    pub minimal_prompt: bool,
    pub prompt_override_delay: Duration,
    pub cwd: Option<PathBuf>,
}

/// Interactive shell process bound to a pseudo-terminal
pub struct LocalPty {
    master: Box<dyn MasterPty + Send>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
    shell: String,
    terminated: bool,
}

impl LocalPty {
    /// Spawn the shell. Output and exit are reported on `sink`.
    pub fn spawn(opts: &LocalPtyOptions, sink: EventSink) -> Result<Self> {
        let shell = resolve_shell(opts.shell.as_deref());
        let plan = launch_plan(&shell, opts.minimal_prompt);

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: opts.rows,
                cols: opts.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&plan.program);
        cmd.args(&plan.args);
        for (key, value) in &plan.env {
            cmd.env(key, value);
        }
        for key in &plan.remove_env {
            cmd.env_remove(key);
        }
        if let Some(cwd) = &opts.cwd {
            cmd.cwd(cwd);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Pty(format!("failed to spawn {}: {}", shell, e)))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::Pty(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::Pty(e.to_string()))?;
        let writer = Arc::new(Mutex::new(writer));

        let killer = child.clone_killer();
        let pid = child.process_id();

        info!(
            "Spawned local shell {} (pid {:?}, {}x{})",
            shell, pid, opts.cols, opts.rows
        );

        let reader_sink = sink.clone();
        let reader_task = tokio::task::spawn_blocking(move || pump_output(reader, reader_sink));

        tokio::spawn(async move {
            let status = tokio::task::spawn_blocking(move || child.wait()).await;
            let code = match status {
                Ok(Ok(status)) => Some(status.exit_code() as i32),
                _ => None,
            };
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader_task)
                .await
                .is_err()
            {
                debug!("PTY reader still open after shell exit");
            }
            info!("Local shell exited with code {:?}", code);
            sink.exited(code);
        });

        if let Some(command) = plan.delayed_command {
            let writer = writer.clone();
            let delay = opts.prompt_override_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let result = match writer.lock() {
                    Ok(mut w) => w.write_all(command.as_bytes()).and_then(|_| w.flush()),
                    Err(_) => return,
                };
                if let Err(e) = result {
                    warn!("Prompt override failed: {}", e);
                }
            });
        }

        Ok(Self {
            master: pair.master,
            writer,
            killer,
            pid,
            shell,
            terminated: false,
        })
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    fn kill_now(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        // The shell leads its own session, so its pid is the group id
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }

        if let Err(e) = self.killer.kill() {
            debug!("Kill after group signal: {}", e);
        }
        info!("Local shell {} terminated", self.shell);
    }
}

/// Blocking read loop: forward decoded chunks until EOF or the session goes away
fn pump_output(mut reader: Box<dyn Read + Send>, sink: EventSink) {
    let mut decoder = Utf8Decoder::default();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if !sink.output(decoder.decode(&buf[..n])) {
                    return;
                }
            }
            Err(e) => {
                debug!("PTY read ended: {}", e);
                break;
            }
        }
    }

    sink.output(decoder.finish());
}

#[async_trait]
impl ProcessBackend for LocalPty {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.terminated {
            return Err(Error::Pty("shell already terminated".to_string()));
        }
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| Error::Pty("writer lock poisoned".to_string()))?;
        writer
            .write_all(data)
            .and_then(|_| writer.flush())
            .map_err(|e| Error::Pty(e.to_string()))
    }

    async fn resize(&mut self, cols: u16, rows: u16) {
        if let Err(e) = self.master.resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }) {
            warn!("Failed to resize PTY to {}x{}: {}", cols, rows, e);
        }
    }

    async fn terminate(&mut self) {
        self.kill_now();
    }
}

impl Drop for LocalPty {
    fn drop(&mut self) {
        self.kill_now();
    }
}
