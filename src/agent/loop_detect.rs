//! Loop detection over a rolling window of tool steps
//!
//! Two patterns are flagged:
//! - the same error signature `identical_error_threshold` times in the window
//! - exactly two tools strictly alternating for `alternation_threshold` steps
//!
//! An error signature hashes the tool name, the failure category and a
//! normalised prefix of the message, so messages that differ only in
//! numbers, case or spacing collapse to one signature.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use sha2::{Digest, Sha256};

use crate::config::LoopDetectionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    IdenticalError,
    Alternation,
}

impl LoopKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopKind::IdenticalError => "identical_error",
            LoopKind::Alternation => "alternation",
        }
    }
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopKind::IdenticalError => f.write_str("the same error keeps recurring"),
            LoopKind::Alternation => f.write_str("two tools keep alternating"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    tool: String,
    signature: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LoopDetector {
    config: LoopDetectionConfig,
    window: VecDeque<Entry>,
}

impl LoopDetector {
    pub fn new(config: LoopDetectionConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window),
            config,
        }
    }

    /// Record a step. `error` is `(category, message)` for a failed step.
    pub fn record(&mut self, tool: &str, error: Option<(&str, &str)>) -> Option<LoopKind> {
        let signature = error.map(|(category, message)| self.signature(tool, category, message));
        self.window.push_back(Entry {
            tool: tool.to_string(),
            signature,
        });
        while self.window.len() > self.config.window.max(1) {
            self.window.pop_front();
        }

        if let Some(sig) = signature {
            let repeats = self.window.iter().filter(|e| e.signature == Some(sig)).count();
            if repeats >= self.config.identical_error_threshold.max(1) {
                return Some(LoopKind::IdenticalError);
            }
        }
        if self.is_alternating() {
            return Some(LoopKind::Alternation);
        }
        None
    }

    /// Forget history (after the model has been told to change course)
    pub fn clear(&mut self) {
        self.window.clear();
    }

    fn is_alternating(&self) -> bool {
        let needed = self.config.alternation_threshold;
        if needed < 2 || self.window.len() < needed {
            return false;
        }
        let tail: Vec<&str> = self
            .window
            .iter()
            .skip(self.window.len() - needed)
            .map(|e| e.tool.as_str())
            .collect();
        let distinct: HashSet<&str> = tail.iter().copied().collect();
        distinct.len() == 2 && tail.windows(2).all(|pair| pair[0] != pair[1])
    }

    fn signature(&self, tool: &str, category: &str, message: &str) -> u64 {
        let normalized = normalize_message(message, self.config.signature_prefix_chars);
        let mut hasher = Sha256::new();
        hasher.update(tool.as_bytes());
        hasher.update([0]);
        hasher.update(category.as_bytes());
        hasher.update([0]);
        hasher.update(normalized.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }
}

/// Lowercase, digit runs → `#`, whitespace collapsed, cut to `max_chars`
fn normalize_message(message: &str, max_chars: usize) -> String {
    let mut out = String::new();
    let mut last_space = true;
    let mut last_digit = false;
    for c in message.chars() {
        if c.is_ascii_digit() {
            if !last_digit {
                out.push('#');
            }
            last_digit = true;
            last_space = false;
            continue;
        }
        last_digit = false;
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
            continue;
        }
        last_space = false;
        out.extend(c.to_lowercase());
    }
    out.trim_end().chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> LoopDetector {
        LoopDetector::new(LoopDetectionConfig::default())
    }

    #[test]
    fn test_alternation_fires_on_sixth_step() {
        let mut d = detector();
        let tools = ["bash", "file_read", "bash", "file_read", "bash"];
        for tool in tools {
            assert_eq!(d.record(tool, None), None);
        }
        assert_eq!(d.record("file_read", None), Some(LoopKind::Alternation));
    }

    #[test]
    fn test_three_tools_do_not_alternate() {
        let mut d = detector();
        for tool in ["a", "b", "c", "a", "b", "c", "a", "b"] {
            assert_eq!(d.record(tool, None), None);
        }
    }

    #[test]
    fn test_repeated_tool_breaks_alternation() {
        let mut d = detector();
        for tool in ["a", "b", "a", "b", "b", "a"] {
            assert_eq!(d.record(tool, None), None);
        }
    }

    #[test]
    fn test_identical_error_fires_on_third() {
        let mut d = detector();
        let err = Some(("execution", "[ERROR] Exit code 1\nNameError: name 'x' is not defined"));
        assert_eq!(d.record("bash", err), None);
        assert_eq!(d.record("think", None), None);
        assert_eq!(d.record("bash", err), None);
        assert_eq!(d.record("bash", err), Some(LoopKind::IdenticalError));
    }

    #[test]
    fn test_superficial_differences_collapse() {
        let mut d = detector();
        assert_eq!(d.record("bash", Some(("execution", "Error at line 12:  boom"))), None);
        assert_eq!(d.record("bash", Some(("execution", "error at LINE 40: boom"))), None);
        assert_eq!(
            d.record("bash", Some(("execution", "ERROR at line 7:\tboom"))),
            Some(LoopKind::IdenticalError)
        );
    }

    #[test]
    fn test_different_categories_are_different_errors() {
        let mut d = detector();
        d.record("bash", Some(("execution", "boom")));
        d.record("bash", Some(("timeout", "boom")));
        assert_eq!(d.record("bash", Some(("validation", "boom"))), None);
    }

    #[test]
    fn test_window_forgets_old_errors() {
        let config = LoopDetectionConfig {
            window: 3,
            ..LoopDetectionConfig::default()
        };
        let mut d = LoopDetector::new(config);
        d.record("bash", Some(("execution", "boom")));
        d.record("bash", Some(("execution", "boom")));
        d.record("think", None);
        d.record("think", None);
        assert_eq!(d.record("bash", Some(("execution", "boom"))), None);
    }

    #[test]
    fn test_clear_resets_history() {
        let mut d = detector();
        d.record("bash", Some(("execution", "boom")));
        d.record("bash", Some(("execution", "boom")));
        d.clear();
        assert_eq!(d.record("bash", Some(("execution", "boom"))), None);
    }

    #[test]
    fn test_normalize_message() {
        assert_eq!(normalize_message("  Line 42\n\n  FAILED  ", 100), "line # failed");
        assert_eq!(normalize_message("abcdef", 3), "abc");
    }
}
