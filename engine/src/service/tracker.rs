//! Command tracker driving step auto-advance

use std::time::Duration;

use tracing::debug;

use crate::domain::script::ScriptStep;

/// Advance computed for a matching command, to be applied after `delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAdvance {
    /// Step that was active when the command matched
    pub step_index: usize,
    pub delay: Duration,
}

/// Trim and collapse whitespace runs to a single space
pub fn normalize(command: &str) -> String {
    command.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    None,
    Escape,
    Csi,
    Ss3,
}

/// Tracks the active step and matches executed commands against it
#[derive(Debug)]
pub struct CommandTracker {
    commands: Vec<String>,
    active: usize,
    enabled: bool,
    delay: Duration,
    line: String,
    escape: EscapeState,
}

impl CommandTracker {
    pub fn new(enabled: bool, delay: Duration) -> Self {
        Self {
            commands: Vec::new(),
            active: 0,
            enabled,
            delay,
            line: String::new(),
            escape: EscapeState::None,
        }
    }

    /// Replace the step list and go back to the first step
    pub fn set_steps(&mut self, steps: &[ScriptStep]) {
        self.commands = steps.iter().map(|s| normalize(&s.command)).collect();
        self.active = 0;
        self.line.clear();
    }

    pub fn set_active_step(&mut self, index: usize) {
        self.active = index;
    }

    pub fn active_step(&self) -> usize {
        self.active
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Handle an already delimited executed line.
    ///
    /// Returns the advance to schedule when it matches the active step's
    /// command exactly after normalization.
    pub fn command_executed(&self, line: &str) -> Option<PendingAdvance> {
        if !self.enabled {
            return None;
        }
        let expected = self.commands.get(self.active)?;
        if expected.is_empty() || normalize(line) != *expected {
            return None;
        }

        debug!("Command matched step {}", self.active + 1);
        Some(PendingAdvance {
            step_index: self.active,
            delay: self.delay,
        })
    }

    /// Apply a scheduled advance. Returns the new active index, or `None`
    /// when the active step moved since the advance was computed or the
    /// last step is already active.
    pub fn advance(&mut self, step_index: usize) -> Option<usize> {
        if step_index != self.active || self.active + 1 >= self.commands.len() {
            return None;
        }
        self.active += 1;
        Some(self.active)
    }

    /// Feed raw input and collect the lines completed by it
    pub fn observe_input(&mut self, data: &str) -> Vec<String> {
        let mut lines = Vec::new();

        for c in data.chars() {
            match self.escape {
                EscapeState::Escape => {
                    self.escape = match c {
                        '[' => EscapeState::Csi,
                        'O' => EscapeState::Ss3,
                        _ => EscapeState::None,
                    };
                    continue;
                }
                // ESC O <final>, sent by cursor keys in application mode
                EscapeState::Ss3 => {
                    self.escape = EscapeState::None;
                    continue;
                }
                EscapeState::Csi => {
                    // Final byte of a CSI sequence
                    if ('\u{40}'..='\u{7e}').contains(&c) {
                        self.escape = EscapeState::None;
                    }
                    continue;
                }
                EscapeState::None => {}
            }

            match c {
                '\r' | '\n' => {
                    let line = std::mem::take(&mut self.line);
                    if !line.trim().is_empty() {
                        lines.push(line);
                    }
                }
                '\u{7f}' | '\u{8}' => {
                    self.line.pop();
                }
                // Ctrl-C, Ctrl-U
                '\u{3}' | '\u{15}' => self.line.clear(),
                '\u{1b}' => self.escape = EscapeState::Escape,
                '\t' => self.line.push(' '),
                c if c.is_control() => {}
                c => self.line.push(c),
            }
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(commands: &[&str]) -> Vec<ScriptStep> {
        commands
            .iter()
            .enumerate()
            .map(|(i, c)| ScriptStep {
                step_number: i + 1,
                title: format!("Step {}", i + 1),
                command: c.to_string(),
                notes: String::new(),
            })
            .collect()
    }

    fn tracker(commands: &[&str]) -> CommandTracker {
        let mut tracker = CommandTracker::new(true, Duration::from_millis(300));
        tracker.set_steps(&steps(commands));
        tracker
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  git   status "), "git status");
        assert_eq!(normalize("a\t\tb"), "a b");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_match_after_normalization() {
        let tracker = tracker(&["git status"]);
        let advance = tracker.command_executed("  git   status ").unwrap();
        assert_eq!(advance.step_index, 0);
        assert_eq!(advance.delay, Duration::from_millis(300));
    }

    #[test]
    fn test_no_match_has_no_effect() {
        let tracker = tracker(&["git status"]);
        assert!(tracker.command_executed("git status --all").is_none());
        assert!(tracker.command_executed("git").is_none());
        assert_eq!(tracker.active_step(), 0);
    }

    #[test]
    fn test_disabled_never_matches() {
        let mut tracker = tracker(&["ls"]);
        tracker.set_enabled(false);
        assert!(tracker.command_executed("ls").is_none());
    }

    #[test]
    fn test_matches_only_active_step() {
        let mut tracker = tracker(&["ls", "pwd"]);
        assert!(tracker.command_executed("pwd").is_none());
        tracker.set_active_step(1);
        assert!(tracker.command_executed("pwd").is_some());
    }

    #[test]
    fn test_stale_advance_ignored() {
        let mut tracker = tracker(&["ls", "pwd", "whoami"]);
        let pending = tracker.command_executed("ls").unwrap();
        tracker.set_active_step(2);
        assert_eq!(tracker.advance(pending.step_index), None);
        assert_eq!(tracker.active_step(), 2);
    }

    #[test]
    fn test_advance_stops_at_last_step() {
        let mut tracker = tracker(&["ls", "pwd"]);
        assert_eq!(tracker.advance(0), Some(1));
        assert_eq!(tracker.advance(1), None);
        assert_eq!(tracker.active_step(), 1);
    }

    #[test]
    fn test_observe_input_editing() {
        let mut tracker = tracker(&[]);
        assert!(tracker.observe_input("git stt").is_empty());
        let lines = tracker.observe_input("\u{7f}\u{7f}tatus\r");
        assert_eq!(lines, vec!["git status"]);
    }

    #[test]
    fn test_observe_input_clear_and_escapes() {
        let mut tracker = tracker(&[]);
        assert!(tracker.observe_input("rm -rf /\u{3}").is_empty());
        let lines = tracker.observe_input("l\u{1b}[Ds\r\rpwd\n");
        assert_eq!(lines, vec!["ls", "pwd"]);
    }

    #[test]
    fn test_observe_input_application_cursor_keys() {
        let mut tracker = tracker(&[]);
        let lines = tracker.observe_input("l\u{1b}OAs\r");
        assert_eq!(lines, vec!["ls"]);

        // split across reads
        assert!(tracker.observe_input("p\u{1b}O").is_empty());
        assert_eq!(tracker.observe_input("Dwd\r"), vec!["pwd"]);
    }
}
