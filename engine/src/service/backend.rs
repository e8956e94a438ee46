//! Process backend abstraction shared by the local and containerized variants

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::types::{BackendKind, ContainerStatus};
use crate::error::Result;
use crate::infra::docker::ContainerEngine;

/// Notification emitted by a backend.
///
/// `generation` identifies the backend instance so the session can drop
/// events from a backend it already swapped out.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Output { generation: u64, data: String },
    Exited { generation: u64, code: Option<i32> },
}

impl BackendEvent {
    pub fn generation(&self) -> u64 {
        match self {
            BackendEvent::Output { generation, .. } | BackendEvent::Exited { generation, .. } => {
                *generation
            }
        }
    }
}

/// Sending half handed to a backend at construction
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<BackendEvent>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<BackendEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver an output chunk. Returns false once the session is gone.
    pub fn output(&self, data: String) -> bool {
        if data.is_empty() {
            return true;
        }
        self.tx
            .send(BackendEvent::Output {
                generation: self.generation,
                data,
            })
            .is_ok()
    }

    pub fn exited(&self, code: Option<i32>) {
        let _ = self.tx.send(BackendEvent::Exited {
            generation: self.generation,
            code,
        });
    }
}

/// Handle for querying the container behind a containerized backend
#[derive(Clone)]
pub struct ContainerHandle {
    pub(crate) engine: Arc<dyn ContainerEngine>,
    pub(crate) container_id: String,
}

impl ContainerHandle {
    /// Inspect the container; any inspection error means "no status"
    pub async fn status(&self) -> Option<ContainerStatus> {
        self.engine
            .inspect_container(&self.container_id)
            .await
            .ok()
            .flatten()
    }
}

/// Capabilities every backend offers to the session router.
///
/// Output and exit are not callbacks: they arrive on the `EventSink` the
/// backend was built with, in the order the backend produced them.
#[async_trait]
pub trait ProcessBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Forward input bytes verbatim
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Propagate a size change; failures are logged, never returned
    async fn resize(&mut self, cols: u16, rows: u16);

    /// Tear the backend down. Idempotent.
    async fn terminate(&mut self);

    fn container(&self) -> Option<ContainerHandle> {
        None
    }
}

/// Incremental UTF-8 decoder for raw output chunks.
///
/// A multi-byte sequence split across reads is held back until the rest
/// arrives; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut input = buf.as_slice();
        loop {
            match std::str::from_utf8(input) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        None => {
                            self.pending = rest.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is still held back
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}
