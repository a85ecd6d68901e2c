//! Console output buffering for the heartbeat.
//!
//! Every line written to the vehicle console lands in two places:
//! - the authoritative buffer, which is never trimmed and is what the sync
//!   exchange forwards to the backend, and
//! - a small display ring holding only the latest lines, used for local display.
//!
//! A line counts as forwarded once it has been part of a successful exchange.
//! Forwarded lines are tracked by full-record equality, timestamp included.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// Number of lines kept for local display.
const DISPLAY_CAPACITY: usize = 100;

/// A single console write as observed by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogLine {
    pub text: String,
    pub fg: String,
    pub bg: String,
    pub timestamp: DateTime<Utc>,
}

/// Outbound form of a console line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsoleText {
    pub time: String,
    pub text: String,
    pub color_bg: String,
    pub color_fg: String,
}

impl ConsoleText {
    fn from_line(line: &LogLine) -> Self {
        Self {
            time: line.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            text: wire_text(&line.text),
            color_bg: line.bg.clone(),
            color_fg: line.fg.clone(),
        }
    }
}

/// Some transports collapse whitespace-only strings, so bare spaces and
/// newlines travel as sentinels.
fn wire_text(text: &str) -> String {
    match text {
        " " => "_".to_string(),
        "\n" => "_\n".to_string(),
        other => other.to_string(),
    }
}

/// Lines awaiting transmission: the originals to commit and their wire form.
#[derive(Debug, Clone, Default)]
pub struct PendingLines {
    pub lines: Vec<LogLine>,
    pub texts: Vec<ConsoleText>,
}

impl PendingLines {
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[derive(Default)]
struct Buffers {
    lines: Vec<LogLine>,
    sent: HashSet<LogLine>,
    display: VecDeque<LogLine>,
}

#[derive(Default)]
pub struct ConsoleLog {
    inner: Mutex<Buffers>,
}

impl ConsoleLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp and store a console line.
    pub fn append(&self, text: &str, fg: &str, bg: &str) {
        let line = LogLine {
            text: text.to_string(),
            fg: fg.to_string(),
            bg: bg.to_string(),
            timestamp: Utc::now(),
        };
        self.push(line);
    }

    fn push(&self, line: LogLine) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if guard.display.len() >= DISPLAY_CAPACITY {
            guard.display.pop_front();
        }
        guard.display.push_back(line.clone());
        guard.lines.push(line);
    }

    /// Lines not yet forwarded, in arrival order.
    pub fn pending(&self) -> PendingLines {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let lines: Vec<LogLine> = guard.lines.iter().filter(|l| !guard.sent.contains(*l)).cloned().collect();
        let texts = lines.iter().map(ConsoleText::from_line).collect();
        PendingLines { lines, texts }
    }

    /// Mark lines as forwarded. Pass exactly the lines of a confirmed exchange.
    pub fn commit(&self, lines: &[LogLine]) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.sent.extend(lines.iter().cloned());
    }

    /// The most recent lines for display.
    #[cfg(test)]
    pub fn recent(&self) -> Vec<LogLine> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.display.iter().cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).lines.len()
    }
}
