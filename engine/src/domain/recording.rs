//! asciicast v2 recording model

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Environment captured in the recording header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct RecordingEnv {
    pub term: String,
    pub shell: String,
}

/// First line of a cast file. Fixed when the recording starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingHeader {
    pub version: u32,
    pub width: u16,
    pub height: u16,
    /// Unix timestamp (seconds) of the recording start
    pub timestamp: i64,
    pub title: String,
    pub env: RecordingEnv,
}

/// Event kind, written as a one-letter code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Output,
    Input,
    Resize,
}

impl EventKind {
    pub fn code(&self) -> &'static str {
        match self {
            EventKind::Output => "o",
            EventKind::Input => "i",
            EventKind::Resize => "r",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "o" => Some(EventKind::Output),
            "i" => Some(EventKind::Input),
            "r" => Some(EventKind::Resize),
            _ => None,
        }
    }
}

/// One timeline entry, serialized as `[time, kind, payload]`
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// Seconds since the recording started
    pub time: f64,
    pub kind: EventKind,
    pub payload: String,
}

impl Serialize for RecordedEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        (self.time, self.kind.code(), &self.payload).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RecordedEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let (time, code, payload) = <(f64, String, String)>::deserialize(deserializer)?;
        let kind = EventKind::from_code(&code)
            .ok_or_else(|| D::Error::custom(format!("unknown event kind '{}'", code)))?;
        Ok(Self {
            time,
            kind,
            payload,
        })
    }
}

/// A complete recording: header plus ordered events
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub header: RecordingHeader,
    pub events: Vec<RecordedEvent>,
}

impl Recording {
    /// Newline-delimited JSON: header line, then one line per event
    pub fn to_cast(&self) -> Result<String> {
        let mut lines = Vec::with_capacity(self.events.len() + 1);
        lines.push(serde_json::to_string(&self.header)?);
        for event in &self.events {
            lines.push(serde_json::to_string(event)?);
        }
        Ok(lines.join("\n"))
    }

    /// Read a cast file back
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());

        let header_line = lines.next().ok_or(Error::NoRecording)?;
        let header: RecordingHeader = serde_json::from_str(header_line)?;

        let events = lines
            .map(serde_json::from_str::<RecordedEvent>)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self { header, events })
    }
}

/// Summary of the current or last recording
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStats {
    /// Seconds, two decimals
    pub duration: String,
    pub total_events: usize,
    pub input_events: usize,
    pub output_events: usize,
    /// `{cols}x{rows}`
    pub dimensions: String,
    /// ISO 8601 start time
    pub start_time: String,
}
