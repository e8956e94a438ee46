//! TermPrompter session engine
//!
//! Drives the terminal behind a presentation: a local PTY shell or an
//! interactive exec inside a container, routed to one or two display
//! surfaces, recorded as asciicast v2 and matched against script steps
//! for auto-advance.

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod service;

pub use config::Config;
pub use domain::container::ContainerConfig;
pub use domain::script::{Script, ScriptStep};
pub use domain::types::{BackendKind, DisplayMessage, SessionState, SessionStatus, Surface};
pub use error::{ControlResponse, Error, Result};
pub use infra::docker::{ContainerEngine, DockerEngine};
pub use service::recorder::{Recorder, RecordingOptions};
pub use service::session::{DisplayHandle, Session, SessionEvent};
