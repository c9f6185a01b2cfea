//! AI-coding-assistant detection: mapping a foreground command line to an
//! `AssistantType`, and per-assistant structural state detectors that read
//! the rendered terminal screen.

mod claude;
mod codex;

use std::time::Instant;

use once_cell::sync::Lazy;

/// Process-wide, immutable command→assistant classifier shared by every
/// session (construction just builds a static rule table, so one instance
/// suffices for the life of the process).
pub static DETECTOR: Lazy<AssistantDetector> = Lazy::new(AssistantDetector::new);

/// The set of AI coding assistants the status pipeline knows how to
/// recognize by command line and, for some, by rendered-screen structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssistantType {
    ClaudeCode,
    Codex,
    QwenCode,
    Gemini,
    Unknown,
}

impl AssistantType {
    pub fn display_name(&self) -> &'static str {
        match self {
            AssistantType::ClaudeCode => "Claude Code",
            AssistantType::Codex => "Codex",
            AssistantType::QwenCode => "Qwen Code",
            AssistantType::Gemini => "Gemini",
            AssistantType::Unknown => "Unknown",
        }
    }
}

/// High-level activity state inferred for the assistant running in a
/// session, as rendered on its own terminal screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantState {
    Unknown,
    Working,
    WaitingApproval,
    WaitingInput,
}

/// Command-line → `AssistantType` classification.
///
/// Each rule is a case-insensitive substring match against the full command
/// line, covering the common install/invocation shapes for each tool.
pub struct AssistantDetector {
    rules: Vec<(&'static str, AssistantType)>,
}

impl Default for AssistantDetector {
    fn default() -> Self {
        Self {
            rules: vec![
                ("@anthropic-ai/claude-code", AssistantType::ClaudeCode),
                ("claude-code/cli.js", AssistantType::ClaudeCode),
                ("claude-code", AssistantType::ClaudeCode),
                ("/claude", AssistantType::ClaudeCode),
                ("claude.exe", AssistantType::ClaudeCode),
                ("@openai/codex", AssistantType::Codex),
                ("codex-cli", AssistantType::Codex),
                ("/codex", AssistantType::Codex),
                ("codex.exe", AssistantType::Codex),
                ("@qwen-code/qwen-code", AssistantType::QwenCode),
                ("qwen-code", AssistantType::QwenCode),
                ("/qwen", AssistantType::QwenCode),
                ("@google/gemini-cli", AssistantType::Gemini),
                ("gemini-cli", AssistantType::Gemini),
                ("/gemini", AssistantType::Gemini),
            ],
        }
    }
}

impl AssistantDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies a command line (typically the foreground child's argv,
    /// joined with spaces). Returns `AssistantType::Unknown` if nothing
    /// matches.
    pub fn detect(&self, command_line: &str) -> AssistantType {
        let lowered = command_line.to_lowercase();
        for (needle, kind) in &self.rules {
            if lowered.contains(needle) {
                return *kind;
            }
        }
        AssistantType::Unknown
    }
}

/// The capability every per-assistant detector implements: a pure function
/// from the current screen (plus a little tracker-owned context) to a
/// `(state, actually_detected)` pair.
///
/// `actually_detected == false` asks the tracker not to refresh
/// `recent_detected_at`, used by detectors (Codex) that need to suppress a
/// transition until some stability window has elapsed.
pub trait StatusDetector: Send + Sync {
    fn detect_state_from_lines(
        &self,
        lines: &[String],
        cols: u16,
        now: Instant,
        current_state: AssistantState,
        recent_detected_at: Option<Instant>,
    ) -> (AssistantState, bool);

    /// Attempts to read the text currently typed into the assistant's input
    /// region, if its UI has one with a recognizable structure. `is_faint`
    /// reports whether the VT cell at `(row, col)` (0-indexed, screen
    /// coordinates) carries the "faint" SGR attribute; detectors call it
    /// with the first input cell of whatever region they locate (never a
    /// fixed screen coordinate) to distinguish placeholder text from real
    /// input. Returns `None` when unsupported, not found, or faint.
    fn capture_input(&self, _lines: &[String], _is_faint: &dyn Fn(usize, usize) -> bool) -> Option<String> {
        None
    }
}

/// Resolves the `StatusDetector` for an `AssistantType`, or `None` for
/// types with no structural detector implemented yet.
pub fn detector_for(kind: AssistantType) -> Option<Box<dyn StatusDetector>> {
    match kind {
        AssistantType::ClaudeCode => Some(Box::new(claude::ClaudeCodeDetector::default())),
        AssistantType::Codex => Some(Box::new(codex::CodexDetector::default())),
        AssistantType::QwenCode | AssistantType::Gemini | AssistantType::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_claude_code_install_paths() {
        let d = AssistantDetector::new();
        assert_eq!(
            d.detect("node /usr/lib/node_modules/@anthropic-ai/claude-code/cli.js"),
            AssistantType::ClaudeCode
        );
        assert_eq!(d.detect("/usr/local/bin/claude"), AssistantType::ClaudeCode);
    }

    #[test]
    fn matches_codex() {
        let d = AssistantDetector::new();
        assert_eq!(d.detect("codex-cli --resume"), AssistantType::Codex);
    }

    #[test]
    fn unmatched_command_is_unknown() {
        let d = AssistantDetector::new();
        assert_eq!(d.detect("/bin/bash"), AssistantType::Unknown);
    }
}
