//! Codex's status detector: a fast-path regex over the working-spinner
//! line, a literal banner for returning to idle, structural approval
//! detection, and a 1 s stability window that keeps flicker from a
//! momentarily-static screen from bouncing the tracker out of `working`.

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;

use super::{AssistantState, StatusDetector};

const WORKING_STABILITY_WINDOW: Duration = Duration::from_millis(1000);

static ELAPSED_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\((?:\d+h\s)?(?:\d+m\s)?\d+s\s•\sesc to interrupt\)\s*$").unwrap()
});
static ARROW_OPTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^›\s*\d+\.").unwrap());

#[derive(Default)]
pub struct CodexDetector;

impl CodexDetector {
    fn is_working_line(line: &str) -> bool {
        if line.contains("Starting MCP servers") {
            return false;
        }
        let starts = line.starts_with('◦') || line.starts_with('•');
        starts && line.contains(' ') && ELAPSED_SUFFIX.is_match(line)
    }

    fn is_worked_for_banner(line: &str) -> bool {
        line.starts_with("─ Worked for ") && line.ends_with("─────────")
    }

    fn is_approval(lines: &[String]) -> bool {
        for (i, line) in lines.iter().enumerate() {
            if line.starts_with("  Press enter to confirm or esc to cancel") && i > 0 {
                if ARROW_OPTION.is_match(lines[i - 1].trim_start()) {
                    return true;
                }
            }
        }
        false
    }

    fn raw_classify(lines: &[String]) -> AssistantState {
        if Self::is_approval(lines) {
            return AssistantState::WaitingApproval;
        }
        if lines.iter().any(|l| Self::is_worked_for_banner(l)) {
            return AssistantState::WaitingInput;
        }
        if lines.iter().any(|l| Self::is_working_line(l)) {
            return AssistantState::Working;
        }
        AssistantState::WaitingInput
    }
}

impl StatusDetector for CodexDetector {
    fn detect_state_from_lines(
        &self,
        lines: &[String],
        _cols: u16,
        now: Instant,
        current_state: AssistantState,
        recent_detected_at: Option<Instant>,
    ) -> (AssistantState, bool) {
        let raw = Self::raw_classify(lines);

        if current_state == AssistantState::Working && raw != AssistantState::Working {
            let stable_since = recent_detected_at
                .map(|t| now.saturating_duration_since(t))
                .unwrap_or(Duration::MAX);
            if stable_since < WORKING_STABILITY_WINDOW {
                return (AssistantState::Working, false);
            }
        }

        (raw, true)
    }

    /// Scans upward from the bottom, skipping trailing blank rows, for the
    /// Codex input region: a `"› "`-prefixed first line followed by zero or
    /// more two-space-indented continuation lines. `is_faint` is queried at
    /// the region's own first input cell (row `start`, column 2 -- just past
    /// the `"› "` prompt glyph) to tell placeholder text from real input,
    /// never at a fixed screen coordinate.
    fn capture_input(&self, lines: &[String], is_faint: &dyn Fn(usize, usize) -> bool) -> Option<String> {
        let mut end = lines.len();
        while end > 0 && lines[end - 1].trim().is_empty() {
            end -= 1;
        }
        if end == 0 {
            return None;
        }

        let mut start = end - 1;
        loop {
            if lines[start].starts_with("› ") {
                break;
            }
            if start == 0 || !lines[start].starts_with("  ") {
                return None;
            }
            start -= 1;
        }

        if is_faint(start, "› ".chars().count()) {
            return None;
        }

        let mut parts = Vec::new();
        parts.push(lines[start].trim_start_matches("› ").trim().to_string());
        for line in &lines[start + 1..end] {
            parts.push(line.trim_start_matches("  ").trim().to_string());
        }
        let captured = parts.join("\n");
        if captured.trim().is_empty() {
            return None;
        }
        Some(captured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn working_spinner_line_detected() {
        let ls = lines(&["◦ Working (5s • esc to interrupt)"]);
        let d = CodexDetector::default();
        let (state, detected) = d.detect_state_from_lines(
            &ls,
            80,
            Instant::now(),
            AssistantState::WaitingInput,
            None,
        );
        assert_eq!(state, AssistantState::Working);
        assert!(detected);
    }

    #[test]
    fn worked_for_banner_returns_to_waiting_input() {
        let ls = lines(&["─ Worked for 3s ─────────"]);
        let d = CodexDetector::default();
        let (state, detected) = d.detect_state_from_lines(
            &ls,
            80,
            Instant::now() + Duration::from_secs(2),
            AssistantState::Working,
            Some(Instant::now()),
        );
        assert_eq!(state, AssistantState::WaitingInput);
        assert!(detected);
    }

    #[test]
    fn mcp_startup_line_is_not_mistaken_for_working() {
        let ls = lines(&["◦ Starting MCP servers (2s • esc to interrupt)"]);
        let d = CodexDetector::default();
        let (state, _) = d.detect_state_from_lines(
            &ls,
            80,
            Instant::now(),
            AssistantState::WaitingInput,
            None,
        );
        assert_eq!(state, AssistantState::WaitingInput);
    }

    #[test]
    fn transition_out_of_working_is_suppressed_within_stability_window() {
        let ls = lines(&["nothing interesting"]);
        let d = CodexDetector::default();
        let t0 = Instant::now();
        let (state, detected) =
            d.detect_state_from_lines(&ls, 80, t0 + Duration::from_millis(200), AssistantState::Working, Some(t0));
        assert_eq!(state, AssistantState::Working);
        assert!(!detected);
    }

    #[test]
    fn transition_out_of_working_allowed_after_window_elapses() {
        let ls = lines(&["nothing interesting"]);
        let d = CodexDetector::default();
        let t0 = Instant::now();
        let (state, detected) = d.detect_state_from_lines(
            &ls,
            80,
            t0 + Duration::from_millis(1500),
            AssistantState::Working,
            Some(t0),
        );
        assert_eq!(state, AssistantState::WaitingInput);
        assert!(detected);
    }

    #[test]
    fn captures_typed_input_and_ignores_faint_placeholder() {
        let ls = lines(&["› hello world"]);
        let d = CodexDetector::default();
        assert_eq!(
            d.capture_input(&ls, &|_, _| false),
            Some("hello world".to_string())
        );
        assert_eq!(d.capture_input(&ls, &|_, _| true), None);
    }

    #[test]
    fn faint_check_is_anchored_to_the_input_regions_first_cell_not_screen_origin() {
        // A faint cell elsewhere on screen (e.g. dimmed banner text at 0,0)
        // must not be mistaken for the input region's own first cell.
        let ls = lines(&["› hello world"]);
        let d = CodexDetector::default();
        let queried = std::cell::RefCell::new(Vec::new());
        let result = d.capture_input(&ls, &|row, col| {
            queried.borrow_mut().push((row, col));
            row == 0 && col == 0
        });
        assert_eq!(result, Some("hello world".to_string()));
        assert_eq!(queried.into_inner(), vec![(0, 2)]);
    }

    #[test]
    fn multiline_input_joins_continuation_rows() {
        let ls = lines(&["› first line", "  second line"]);
        let d = CodexDetector::default();
        assert_eq!(
            d.capture_input(&ls, &|_, _| false),
            Some("first line\nsecond line".to_string())
        );
    }
}
