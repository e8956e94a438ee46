//! Engine configuration

use serde::Deserialize;

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Terminal columns used before the first resize arrives
    #[serde(default = "default_cols")]
    pub default_cols: u16,

    /// Terminal rows used before the first resize arrives
    #[serde(default = "default_rows")]
    pub default_rows: u16,

    /// Shell override for the local backend (falls back to SHELL / COMSPEC)
    #[serde(default)]
    pub shell: Option<String>,

    /// Replace the user's prompt with a minimal one so command detection is reliable
    #[serde(default = "default_true")]
    pub minimal_prompt: bool,

    /// Delay before the one-shot prompt override is written to shells
    /// that cannot be configured through arguments
    #[serde(default = "default_prompt_override_delay_ms")]
    pub prompt_override_delay_ms: u64,

    /// Docker socket path (local defaults when unset)
    #[serde(default)]
    pub docker_socket: Option<String>,

    /// Prefix for generated container names
    #[serde(default = "default_container_name_prefix")]
    pub container_name_prefix: String,

    /// Grace period before a stopping container is killed
    #[serde(default = "default_container_stop_timeout_secs")]
    pub container_stop_timeout_secs: i64,

    /// Shell used for the container command and exec when the script sets none
    #[serde(default = "default_container_shell")]
    pub default_container_shell: String,

    /// Working directory inside the container when the script sets none
    #[serde(default = "default_container_workdir")]
    pub default_container_workdir: String,

    /// Advance to the next step when the active step's command is executed
    #[serde(default = "default_true")]
    pub auto_advance: bool,

    /// Settle delay between a matching command and the advance signal
    #[serde(default = "default_advance_delay_ms")]
    pub advance_delay_ms: u64,

    /// Reconstruct executed commands from raw input instead of waiting
    /// for the display surface to report them
    #[serde(default)]
    pub detect_commands_from_input: bool,

    /// Spawn a fresh local shell when the current one exits
    #[serde(default)]
    pub respawn_local_shell: bool,

    /// Default title written into recording headers
    #[serde(default = "default_recording_title")]
    pub recording_title: String,

    /// Directory used for generated recording file names
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: String,
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

fn default_true() -> bool {
    true
}

fn default_prompt_override_delay_ms() -> u64 {
    500
}

fn default_container_name_prefix() -> String {
    "termprompter-".to_string()
}

fn default_container_stop_timeout_secs() -> i64 {
    5
}

fn default_container_shell() -> String {
    "/bin/bash".to_string()
}

fn default_container_workdir() -> String {
    "/root".to_string()
}

fn default_advance_delay_ms() -> u64 {
    300
}

fn default_recording_title() -> String {
    "TermPrompter Recording".to_string()
}

fn default_recordings_dir() -> String {
    ".".to_string()
}

impl Config {
    /// Load configuration from `TERMPROMPTER_*` environment variables
    pub fn load() -> anyhow::Result<Self> {
        let config = ::config::Config::builder()
            .add_source(
                ::config::Environment::with_prefix("TERMPROMPTER")
                    .prefix_separator("_")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_cols: default_cols(),
            default_rows: default_rows(),
            shell: None,
            minimal_prompt: true,
            prompt_override_delay_ms: default_prompt_override_delay_ms(),
            docker_socket: None,
            container_name_prefix: default_container_name_prefix(),
            container_stop_timeout_secs: default_container_stop_timeout_secs(),
            default_container_shell: default_container_shell(),
            default_container_workdir: default_container_workdir(),
            auto_advance: true,
            advance_delay_ms: default_advance_delay_ms(),
            detect_commands_from_input: false,
            respawn_local_shell: false,
            recording_title: default_recording_title(),
            recordings_dir: default_recordings_dir(),
        }
    }
}
