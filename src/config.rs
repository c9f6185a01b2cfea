//! Process-wide, hot-reloadable configuration surface owned by the
//! [`crate::manager::Manager`] and pushed down to sessions on mutation.
//!
//! A plain `Clone + Serialize + Deserialize` settings struct with a
//! `Default` impl: a caller is free to persist this struct to TOML/JSON
//! and feed it back through [`crate::manager::Manager::update_ai_assistant_status_config`]
//! and friends. The core itself never touches a filesystem path.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::assistant::AssistantType;

/// Per-platform login shell command lines. An empty string falls back to
/// the platform's built-in default at resolution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    #[serde(default)]
    pub windows: String,
    #[serde(default)]
    pub darwin: String,
    #[serde(default)]
    pub linux: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            windows: String::new(),
            darwin: String::new(),
            linux: String::new(),
        }
    }
}

impl ShellConfig {
    /// The platform built-in used when both an override and the matching
    /// platform entry are empty.
    pub fn platform_default() -> &'static str {
        if cfg!(target_os = "windows") {
            "powershell.exe -NoLogo"
        } else if cfg!(target_os = "macos") {
            "/bin/zsh"
        } else {
            "/bin/bash"
        }
    }

    /// The configured command line for the running platform, or the
    /// platform built-in if unset.
    pub fn for_platform(&self) -> &str {
        let configured = if cfg!(target_os = "windows") {
            &self.windows
        } else if cfg!(target_os = "macos") {
            &self.darwin
        } else {
            &self.linux
        };
        if configured.trim().is_empty() {
            Self::platform_default()
        } else {
            configured
        }
    }
}

/// The process-wide configuration surface described in the external
/// interfaces section: idle reaping, per-project admission limits,
/// encoding, scrollback, and AI-assistant status tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub shell: ShellConfig,
    /// `<= 0` (serialized as zero) disables idle reaping.
    #[serde(with = "duration_secs", default = "default_idle_timeout")]
    pub idle_timeout: Duration,
    /// `<= 0` disables the per-project session cap.
    #[serde(default = "default_max_sessions_per_project")]
    pub max_sessions_per_project: i64,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_true")]
    pub scrollback_enabled: bool,
    /// `<= 0` disables scrollback storage outright.
    #[serde(default = "default_scrollback_bytes")]
    pub scrollback_bytes: i64,
    #[serde(default)]
    pub ai_assistant_status: HashMap<AssistantType, bool>,
    #[serde(default)]
    pub rename_title_each_command: bool,
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_max_sessions_per_project() -> i64 {
    0
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_true() -> bool {
    true
}

fn default_scrollback_bytes() -> i64 {
    256 * 1024
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            shell: ShellConfig::default(),
            idle_timeout: default_idle_timeout(),
            max_sessions_per_project: default_max_sessions_per_project(),
            encoding: default_encoding(),
            scrollback_enabled: default_true(),
            scrollback_bytes: default_scrollback_bytes(),
            ai_assistant_status: HashMap::new(),
            rename_title_each_command: false,
        }
    }
}

impl ManagerConfig {
    /// Whether `kind` is enabled for status tracking; assistants absent from
    /// the map are enabled by default so a fresh config tracks everything
    /// it knows how to detect.
    pub fn assistant_enabled(&self, kind: AssistantType) -> bool {
        self.ai_assistant_status.get(&kind).copied().unwrap_or(true)
    }

    /// Effective scrollback byte limit, collapsing the enabled flag and the
    /// `<=0` sentinel into the single "0 disables" convention the
    /// `Scrollback` buffer itself understands.
    pub fn effective_scrollback_bytes(&self) -> usize {
        if !self.scrollback_enabled || self.scrollback_bytes <= 0 {
            0
        } else {
            self.scrollback_bytes as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let cfg = ManagerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ManagerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.encoding, cfg.encoding);
        assert_eq!(back.scrollback_bytes, cfg.scrollback_bytes);
    }

    #[test]
    fn shell_falls_back_to_platform_default_when_unset() {
        let cfg = ShellConfig::default();
        assert_eq!(cfg.for_platform(), ShellConfig::platform_default());
    }

    #[test]
    fn disabled_scrollback_collapses_to_zero() {
        let mut cfg = ManagerConfig::default();
        cfg.scrollback_enabled = false;
        assert_eq!(cfg.effective_scrollback_bytes(), 0);
    }

    #[test]
    fn unlisted_assistant_defaults_to_enabled() {
        let cfg = ManagerConfig::default();
        assert!(cfg.assistant_enabled(AssistantType::ClaudeCode));
    }
}
