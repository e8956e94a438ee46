//! Session recorder producing asciicast v2 timelines

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, warn};

use crate::domain::recording::{
    EventKind, RecordedEvent, Recording, RecordingEnv, RecordingHeader, RecordingStats,
};
use crate::error::{Error, Result};

const CAST_EXTENSION: &str = ".cast";
const DEFAULT_TERM: &str = "xterm-256color";
const DEFAULT_SHELL: &str = "/bin/bash";

/// Options for a new recording
#[derive(Debug, Clone, Default)]
pub struct RecordingOptions {
    pub cols: u16,
    pub rows: u16,
    pub title: Option<String>,
    pub term: Option<String>,
    pub shell: Option<String>,
}

/// Append-only recorder.
///
/// The header is frozen at `start`. After `stop` the header and events stay
/// available for `save`/`stats` until the next `start` discards them.
#[derive(Debug)]
pub struct Recorder {
    recording: bool,
    header: Option<RecordingHeader>,
    events: Vec<RecordedEvent>,
    started: Option<(Instant, DateTime<Utc>)>,
    cols: u16,
    rows: u16,
    default_title: String,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new("TermPrompter Recording")
    }
}

impl Recorder {
    /// Create an idle recorder
    pub fn new(default_title: impl Into<String>) -> Self {
        Self {
            recording: false,
            header: None,
            events: Vec::new(),
            started: None,
            cols: 80,
            rows: 24,
            default_title: default_title.into(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Begin a recording; fails while another one is in progress
    pub fn start(&mut self, options: RecordingOptions) -> Result<()> {
        if self.recording {
            warn!("Recording already in progress");
            return Err(Error::RecordingState(
                "recording already in progress".to_string(),
            ));
        }

        self.cols = if options.cols > 0 { options.cols } else { 80 };
        self.rows = if options.rows > 0 { options.rows } else { 24 };
        self.events.clear();

        let now = Utc::now();
        self.started = Some((Instant::now(), now));
        self.recording = true;

        let shell = options
            .shell
            .or_else(|| std::env::var("SHELL").ok())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SHELL.to_string());

        self.header = Some(RecordingHeader {
            version: 2,
            width: self.cols,
            height: self.rows,
            timestamp: now.timestamp(),
            title: options
                .title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| self.default_title.clone()),
            env: RecordingEnv {
                term: options.term.unwrap_or_else(|| DEFAULT_TERM.to_string()),
                shell,
            },
        });

        info!("Recording started ({}x{})", self.cols, self.rows);
        Ok(())
    }

    /// Stop recording; events stay available until the next `start`
    pub fn stop(&mut self) -> Result<()> {
        if !self.recording {
            warn!("No recording in progress");
            return Err(Error::RecordingState("no recording in progress".to_string()));
        }

        self.recording = false;
        info!("Recording stopped. Captured {} events", self.events.len());
        Ok(())
    }

    pub fn record_output(&mut self, data: &str) {
        self.push(EventKind::Output, data.to_string());
    }

    pub fn record_input(&mut self, data: &str) {
        self.push(EventKind::Input, data.to_string());
    }

    /// Track new dimensions and append a resize event
    pub fn update_dimensions(&mut self, cols: u16, rows: u16) {
        if !self.recording {
            return;
        }
        self.cols = cols;
        self.rows = rows;
        self.push(EventKind::Resize, format!("{}x{}", cols, rows));
    }

    fn push(&mut self, kind: EventKind, payload: String) {
        if !self.recording {
            return;
        }
        let Some((start, _)) = self.started else {
            return;
        };
        self.events.push(RecordedEvent {
            time: start.elapsed().as_secs_f64(),
            kind,
            payload,
        });
    }

    /// Header plus events recorded so far
    pub fn recording(&self) -> Result<Recording> {
        let header = self.header.clone().ok_or(Error::NoRecording)?;
        Ok(Recording {
            header,
            events: self.events.clone(),
        })
    }

    /// Serialized cast text
    pub fn serialize(&self) -> Result<String> {
        self.recording()?.to_cast()
    }

    /// Write the cast file, appending `.cast` when missing. Returns the final path.
    pub async fn save(&self, path: &Path) -> Result<PathBuf> {
        let cast = self.serialize()?;
        let path = with_cast_extension(path);

        tokio::fs::write(&path, cast)
            .await
            .map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;

        info!("Recording saved to: {}", path.display());
        Ok(path)
    }

    /// Summary of the current or last recording; `None` before the first one
    pub fn stats(&self) -> Option<RecordingStats> {
        self.header.as_ref()?;
        let (_, started_at) = self.started?;

        let duration = self.events.last().map(|e| e.time).unwrap_or(0.0);
        let count = |kind: EventKind| self.events.iter().filter(|e| e.kind == kind).count();

        Some(RecordingStats {
            duration: format!("{:.2}", duration),
            total_events: self.events.len(),
            input_events: count(EventKind::Input),
            output_events: count(EventKind::Output),
            dimensions: format!("{}x{}", self.cols, self.rows),
            start_time: started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }

    /// Discard everything, including a finished recording
    pub fn reset(&mut self) {
        self.recording = false;
        self.header = None;
        self.events.clear();
        self.started = None;
    }

    /// Default file name, e.g. `termprompter-2024-05-01T10-20-30.cast`
    pub fn generate_filename() -> String {
        format!(
            "termprompter-{}{}",
            Utc::now().format("%Y-%m-%dT%H-%M-%S"),
            CAST_EXTENSION
        )
    }
}

fn with_cast_extension(path: &Path) -> PathBuf {
    let raw = path.as_os_str().to_string_lossy();
    if raw.ends_with(CAST_EXTENSION) {
        path.to_path_buf()
    } else {
        PathBuf::from(format!("{}{}", raw, CAST_EXTENSION))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RecordingOptions {
        RecordingOptions {
            cols: 100,
            rows: 30,
            title: Some("test".to_string()),
            term: None,
            shell: Some("/bin/zsh".to_string()),
        }
    }

    #[test]
    fn test_start_twice_keeps_log() {
        let mut recorder = Recorder::default();
        recorder.start(options()).unwrap();
        recorder.record_output("hello");

        let err = recorder.start(options()).unwrap_err();
        assert!(matches!(err, Error::RecordingState(_)));
        assert_eq!(recorder.recording().unwrap().events.len(), 1);
        assert!(recorder.is_recording());
    }

    #[test]
    fn test_stop_without_recording_fails() {
        let mut recorder = Recorder::default();
        assert!(matches!(recorder.stop(), Err(Error::RecordingState(_))));
    }

    #[test]
    fn test_events_ignored_when_not_recording() {
        let mut recorder = Recorder::default();
        recorder.record_output("lost");
        recorder.record_input("lost");
        recorder.update_dimensions(10, 10);
        assert!(recorder.stats().is_none());
        assert!(matches!(recorder.serialize(), Err(Error::NoRecording)));
    }

    #[test]
    fn test_timestamps_monotonic() {
        let mut recorder = Recorder::default();
        recorder.start(options()).unwrap();
        for i in 0..200 {
            if i % 3 == 0 {
                recorder.record_input("k");
            } else {
                recorder.record_output("out");
            }
        }
        recorder.update_dimensions(120, 40);

        let events = recorder.recording().unwrap().events;
        assert!(events.windows(2).all(|w| w[1].time >= w[0].time));
        assert!(events[0].time >= 0.0);
    }

    #[test]
    fn test_resize_event_and_frozen_header() {
        let mut recorder = Recorder::default();
        recorder.start(options()).unwrap();
        recorder.update_dimensions(132, 43);

        let recording = recorder.recording().unwrap();
        assert_eq!(recording.header.width, 100);
        assert_eq!(recording.header.height, 30);
        assert_eq!(recording.header.env.shell, "/bin/zsh");
        assert_eq!(recording.header.env.term, "xterm-256color");

        let last = recording.events.last().unwrap();
        assert_eq!(last.kind, EventKind::Resize);
        assert_eq!(last.payload, "132x43");
        assert_eq!(recorder.stats().unwrap().dimensions, "132x43");
    }

    #[test]
    fn test_stop_retains_until_next_start() {
        let mut recorder = Recorder::default();
        recorder.start(options()).unwrap();
        recorder.record_input("ls\r");
        recorder.record_output("file\r\n");
        recorder.stop().unwrap();

        recorder.record_output("after stop");
        let stats = recorder.stats().unwrap();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.input_events, 1);
        assert_eq!(stats.output_events, 1);
        assert!(stats.start_time.ends_with('Z'));
        assert_eq!(stats.duration.split('.').nth(1).map(str::len), Some(2));

        recorder.start(options()).unwrap();
        assert_eq!(recorder.stats().unwrap().total_events, 0);
    }

    #[test]
    fn test_reset_discards_everything() {
        let mut recorder = Recorder::default();
        recorder.start(options()).unwrap();
        recorder.record_output("x");
        recorder.reset();

        assert!(!recorder.is_recording());
        assert!(recorder.stats().is_none());
        assert!(matches!(recorder.recording(), Err(Error::NoRecording)));
    }

    #[test]
    fn test_default_title_used() {
        let mut recorder = Recorder::new("My Demo");
        recorder
            .start(RecordingOptions {
                cols: 80,
                rows: 24,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(recorder.recording().unwrap().header.title, "My Demo");
    }

    #[test]
    fn test_cast_extension() {
        assert_eq!(with_cast_extension(Path::new("out")), PathBuf::from("out.cast"));
        assert_eq!(
            with_cast_extension(Path::new("out.cast")),
            PathBuf::from("out.cast")
        );
        assert!(Recorder::generate_filename().ends_with(".cast"));
    }

    #[tokio::test]
    async fn test_save_writes_cast_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::default();
        recorder.start(options()).unwrap();
        recorder.record_output("hi");
        recorder.stop().unwrap();

        let saved = recorder.save(&dir.path().join("out")).await.unwrap();
        assert_eq!(saved, dir.path().join("out.cast"));

        let text = std::fs::read_to_string(&saved).unwrap();
        let parsed = Recording::parse(&text).unwrap();
        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.events[0].payload, "hi");
    }

    #[tokio::test]
    async fn test_save_failure_is_io_error() {
        let mut recorder = Recorder::default();
        recorder.start(options()).unwrap();
        let err = recorder
            .save(Path::new("/nonexistent-dir/sub/out"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
