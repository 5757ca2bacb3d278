//! Diagnostic side channels for one execution.
//!
//! A `Capture` is created by the driver for each run and shared (by `Rc`)
//! with the print collector and the `log` builtin. Nothing here is global:
//! two concurrent runs own two captures.

use std::cell::RefCell;
use std::rc::Rc;

/// Upper bound on buffered text per channel. Output past it is dropped
/// and a single marker is appended.
const MAX_CAPTURED_BYTES: usize = 1 << 20;

const TRUNCATED: &str = "[output truncated]";

#[derive(Debug, Default)]
struct Channel {
    text: String,
    truncated: bool,
}

impl Channel {
    fn push(&mut self, piece: &str) {
        if self.truncated {
            return;
        }
        if self.text.len() + piece.len() > MAX_CAPTURED_BYTES {
            self.truncated = true;
            return;
        }
        self.text.push_str(piece);
    }

    fn take(&mut self) -> (String, bool) {
        let truncated = std::mem::take(&mut self.truncated);
        (std::mem::take(&mut self.text), truncated)
    }
}

#[derive(Debug, Default)]
pub struct Capture {
    printed: RefCell<Channel>,
    logs: RefCell<Vec<String>>,
    log_bytes: RefCell<Channel>,
}

/// What a run wrote to its side channels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Drained {
    pub printed: String,
    pub logs: String,
}

impl Capture {
    pub fn new() -> Rc<Self> {
        Rc::new(Capture::default())
    }

    /// Appends print-style text verbatim (separators and line ends are
    /// the caller's business).
    pub fn print(&self, text: &str) {
        self.printed.borrow_mut().push(text);
    }

    /// Appends one structured log line.
    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        let mut budget = self.log_bytes.borrow_mut();
        budget.push(&line);
        if !budget.truncated {
            self.logs.borrow_mut().push(line);
        }
    }

    #[cfg(test)]
    pub(crate) fn log_count(&self) -> usize {
        self.logs.borrow().len()
    }

    /// Takes both channels, leaving the capture empty. Log lines are
    /// separated by a blank line.
    pub fn drain(&self) -> Drained {
        let (mut printed, printed_cut) = self.printed.borrow_mut().take();
        if printed_cut {
            printed.push_str(TRUNCATED);
        }
        let mut lines = std::mem::take(&mut *self.logs.borrow_mut());
        let (_, logs_cut) = self.log_bytes.borrow_mut().take();
        if logs_cut {
            lines.push(TRUNCATED.to_string());
        }
        Drained {
            printed,
            logs: lines.join("\n\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_joins_logs_in_order() {
        let capture = Capture::new();
        capture.log("first");
        capture.log("second");
        capture.print("hello\n");
        let drained = capture.drain();
        assert_eq!(drained.logs, "first\n\nsecond");
        assert_eq!(drained.printed, "hello\n");
    }

    #[test]
    fn test_drain_empties_channels() {
        let capture = Capture::new();
        capture.log("x");
        capture.print("y");
        capture.drain();
        assert_eq!(capture.drain(), Drained::default());
        assert_eq!(capture.log_count(), 0);
    }

    #[test]
    fn test_drain_discards_previous_run() {
        let capture = Capture::new();
        capture.log("stale");
        capture.drain();
        capture.log("fresh");
        assert_eq!(capture.drain().logs, "fresh");
    }

    #[test]
    fn test_oversized_output_is_truncated_once() {
        let capture = Capture::new();
        let chunk = "x".repeat(MAX_CAPTURED_BYTES / 2 + 1);
        capture.print(&chunk);
        capture.print(&chunk);
        capture.print("more");
        let printed = capture.drain().printed;
        assert!(printed.ends_with(TRUNCATED));
        assert_eq!(printed.len(), chunk.len() + TRUNCATED.len());
    }

    #[test]
    fn test_captures_are_independent() {
        let a = Capture::new();
        let b = Capture::new();
        a.log("only a");
        assert_eq!(b.drain().logs, "");
        assert_eq!(a.drain().logs, "only a");
    }
}
