//! Common domain types

use serde::{Deserialize, Serialize};

/// Which backend variant is driving the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Containerized,
}

/// Display surface identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    /// The main window, always present
    Primary,
    /// The optional detached terminal window
    Detached,
}

/// Router state broadcast to displays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Backend is being swapped; input is dropped until `Ready`
    Switching,
    /// A backend is attached and forwarding
    Ready,
    /// No backend is attached
    Idle,
}

/// One image pull progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullProgress {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
}

/// Snapshot of the active container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub id: String,
    pub name: String,
    pub state: String,
    pub running: bool,
    pub image: String,
}

/// Outcome of starting a containerized session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedContainer {
    pub container_id: String,
    pub name: String,
    pub reused: bool,
}

/// Combined status exposed to the UI layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub is_containerized: bool,
    pub engine_available: bool,
    pub container: Option<ContainerStatus>,
}

/// Messages delivered to a display surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum DisplayMessage {
    /// Terminal output to render
    Output(String),
    SessionState(SessionState),
    PullProgress(PullProgress),
    /// Primary only: the terminal moved to the detached window
    Detached,
    /// Primary only: the terminal is back in the main window
    Attached,
    /// Re-measure and report the terminal dimensions
    Refit,
    /// Highlight the step at this index
    AdvanceStep(usize),
    /// The containerized backend went away
    ContainerSessionEnded,
}
