//! Claude Code's structural status detector: purely pattern-matches the
//! rendered screen, no timers or retained state beyond the sticky input
//! capture every detector is allowed.

use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{AssistantState, StatusDetector};

const SENTINEL_GLYPHS: &[char] = &[
    '✻', '✽', '✶', '∴', '·', '○', '◆', '▪', '▫', '□', '■', '☐', '☑', '☒', '★', '☆', '✓', '✔',
    '✗', '✘', '⚬', '⚫', '⚪', '⬤', '◯', '▸', '▹', '►', '▻', '◂', '◃', '◄', '◅', '✢', '*',
];

static ARROW_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^←.*→\s*$").unwrap());
static NUMBERED_OPTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^❯\s+\d+\.").unwrap());

#[derive(Default)]
pub struct ClaudeCodeDetector;

impl ClaudeCodeDetector {
    fn is_separator(line: &str, cols: u16) -> bool {
        let cols = cols as usize;
        cols > 0 && line.chars().count() == cols && line.chars().all(|c| c == '─')
    }

    fn is_working_task_line(line: &str) -> bool {
        let mut chars = line.chars();
        let first = match chars.next() {
            Some(c) => c,
            None => return false,
        };
        if !SENTINEL_GLYPHS.contains(&first) {
            return false;
        }
        let rest: String = chars.collect();
        let rest = match rest.strip_prefix(' ') {
            Some(r) => r,
            None => return false,
        };
        rest.contains('…') && rest.contains("(esc to interrupt")
    }

    /// Locates the two separator lines bracketing the prompt textbox,
    /// scanning from the bottom. Returns `(top_index, bottom_index)`.
    fn find_input_box(lines: &[String], cols: u16) -> Option<(usize, usize)> {
        let mut found_bottom = None;
        for (i, line) in lines.iter().enumerate().rev() {
            if Self::is_separator(line, cols) {
                match found_bottom {
                    None => found_bottom = Some(i),
                    Some(bottom) => return Some((i, bottom)),
                }
            }
        }
        None
    }

    fn detect_approval(lines: &[String], cols: u16) -> bool {
        for (i, line) in lines.iter().enumerate().rev() {
            if line.starts_with("Enter to select") && line.contains("Tab/Arrow keys to navigate") {
                if i == 0 {
                    continue;
                }
                if !NUMBERED_OPTION.is_match(&lines[i - 1]) || i < 2 {
                    continue;
                }
                if !ARROW_LINE.is_match(&lines[i - 2]) || i < 3 {
                    continue;
                }
                if Self::is_separator(&lines[i - 3], cols) {
                    return true;
                }
            }

            if line.starts_with("Ready to submit your answers?") {
                if lines[..i].iter().rev().any(|l| Self::is_separator(l, cols)) {
                    return true;
                }
            }

            if line.contains(" Do you want to ") {
                if let Some(next) = lines.get(i + 1) {
                    if ARROW_LINE.is_match(next) {
                        return true;
                    }
                }
            }

            if line.contains(" Esc to exit") {
                if let Some(next) = lines.get(i + 1) {
                    if next.contains(" Do you want to proceed?") {
                        return true;
                    }
                }
            }
        }
        false
    }
}

impl StatusDetector for ClaudeCodeDetector {
    fn detect_state_from_lines(
        &self,
        lines: &[String],
        cols: u16,
        _now: Instant,
        current_state: AssistantState,
        _recent_detected_at: Option<Instant>,
    ) -> (AssistantState, bool) {
        if Self::detect_approval(lines, cols) {
            return (AssistantState::WaitingApproval, true);
        }

        let (top, bottom) = match Self::find_input_box(lines, cols) {
            Some(bounds) => bounds,
            None => return (current_state, false),
        };

        for i in (0..top).rev() {
            let line = &lines[i];
            if line == "  ⎿  Tip: " {
                if i > 0 && Self::is_working_task_line(&lines[i - 1]) {
                    return (AssistantState::Working, true);
                }
                continue;
            }
            if Self::is_working_task_line(line) {
                return (AssistantState::Working, true);
            }
        }
        let _ = bottom;

        (AssistantState::WaitingInput, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn working_via_tip_line() {
        let sep = "─".repeat(10);
        let ls = lines(&[
            "✻ Brewing… (esc to interrupt · 5s)",
            "  ⎿  Tip: press esc to cancel",
            &sep,
            &sep,
        ]);
        let d = ClaudeCodeDetector;
        let (state, detected) = d.detect_state_from_lines(
            &ls,
            10,
            Instant::now(),
            AssistantState::WaitingInput,
            None,
        );
        assert_eq!(state, AssistantState::Working);
        assert!(detected);
    }

    #[test]
    fn waiting_input_when_box_empty() {
        let sep = "─".repeat(10);
        let ls = lines(&["some prior output", &sep, "> ", &sep]);
        let d = ClaudeCodeDetector;
        let (state, _) = d.detect_state_from_lines(
            &ls,
            10,
            Instant::now(),
            AssistantState::Working,
            None,
        );
        assert_eq!(state, AssistantState::WaitingInput);
    }

    #[test]
    fn no_box_found_keeps_current_state_undetected() {
        let ls = lines(&["no separators here"]);
        let d = ClaudeCodeDetector;
        let (state, detected) = d.detect_state_from_lines(
            &ls,
            10,
            Instant::now(),
            AssistantState::Working,
            None,
        );
        assert_eq!(state, AssistantState::Working);
        assert!(!detected);
    }
}
