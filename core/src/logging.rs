//! Log line handling: terminal-control stripping and a bounded ring buffer
//!
//! Captured stdout/stderr lines pass through [`strip_control_sequences`]
//! before retention; each running service keeps its most recent lines in a
//! [`LogRing`] with a fixed capacity, evicting the oldest line when full.

use regex::Regex;
use std::collections::VecDeque;
use std::sync::LazyLock;

/// Maximum number of lines retained per running service
pub const LOG_RING_CAPACITY: usize = 1000;

// Compiled once; recompiling per line would dominate capture cost.
static CSI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").expect("valid CSI pattern"));
static CSI_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\u001b\[[0-9;]*[a-zA-Z]").expect("valid escaped CSI pattern"));
static SGR_RESIDUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[0-9;]+m").expect("valid residue pattern"));
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Remove terminal control sequences from a captured line.
///
/// Handles, in order: JSON-escaped CSI sequences (`\u001b[...letter` spelled
/// out with a backslash), true CSI sequences, stray escape bytes and their
/// literal `\u001b` / `\033` spellings, bare `[digits;m` residue, and runs
/// of whitespace. The result is trimmed; callers discard empty results.
pub fn strip_control_sequences(line: &str) -> String {
    let s = CSI_JSON.replace_all(line, "");
    let s = CSI.replace_all(&s, "");
    let s = s.replace('\u{1b}', "");
    let s = s.replace("\\u001b", "").replace("\\033", "");
    let s = SGR_RESIDUE.replace_all(&s, "");
    let s = WHITESPACE_RUN.replace_all(&s, " ");
    s.trim().to_string()
}

/// A bounded FIFO retaining the most recent log lines for one service.
///
/// When capacity is exceeded the oldest line is evicted and a drop counter
/// is incremented. Appending never blocks and never fails.
#[derive(Debug)]
pub struct LogRing {
    capacity: usize,
    total_dropped: u64,
    lines: VecDeque<String>,
}

impl LogRing {
    /// Create a ring with the given capacity (must be > 0)
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "LogRing capacity must be > 0");
        Self {
            capacity,
            total_dropped: 0,
            lines: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a line, evicting the oldest when the ring is full
    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
            self.total_dropped = self.total_dropped.saturating_add(1);
        }
        self.lines.push_back(line);
    }

    /// Number of lines currently retained
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the ring holds no lines
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total lines ever evicted due to capacity
    pub fn total_dropped(&self) -> u64 {
        self.total_dropped
    }

    /// Copy of the retained lines, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(LOG_RING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_real_csi_sequences() {
        assert_eq!(strip_control_sequences("\x1b[31mBAD\x1b[0m"), "BAD");
        assert_eq!(strip_control_sequences("\x1b[1;32mok\x1b[m done"), "ok done");
    }

    #[test]
    fn strips_json_escaped_sequences() {
        assert_eq!(strip_control_sequences(r"\u001b[31mred\u001b[0m"), "red");
        assert_eq!(strip_control_sequences(r"left\033overs"), "leftovers");
    }

    #[test]
    fn strips_bare_sgr_residue() {
        assert_eq!(strip_control_sequences("[31;1mtext"), "text");
        assert_eq!(strip_control_sequences("a [0m b"), "a b");
    }

    #[test]
    fn strips_stray_escape_bytes() {
        assert_eq!(strip_control_sequences("a\u{1b}b"), "ab");
    }

    #[test]
    fn collapses_whitespace_and_trims() {
        assert_eq!(strip_control_sequences("  spaced \t out  "), "spaced out");
    }

    #[test]
    fn color_only_lines_become_empty() {
        assert_eq!(strip_control_sequences("\x1b[31m\x1b[0m"), "");
        assert_eq!(strip_control_sequences("   "), "");
    }

    #[test]
    fn plain_lines_pass_through() {
        assert_eq!(strip_control_sequences("hello world"), "hello world");
    }

    #[test]
    fn ring_evicts_oldest_at_capacity() {
        let mut ring = LogRing::new(3);
        for line in ["a", "b", "c", "d", "e"] {
            ring.push(line.to_string());
        }

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.total_dropped(), 2);
        assert_eq!(ring.snapshot(), vec!["c", "d", "e"]);
    }

    #[test]
    fn ring_never_exceeds_capacity() {
        let mut ring = LogRing::new(LOG_RING_CAPACITY);
        for i in 0..(LOG_RING_CAPACITY + 500) {
            ring.push(format!("line {i}"));
        }

        assert_eq!(ring.len(), LOG_RING_CAPACITY);
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.first().map(String::as_str), Some("line 500"));
        assert_eq!(
            snapshot.last().map(String::as_str),
            Some(format!("line {}", LOG_RING_CAPACITY + 499).as_str())
        );
    }
}
