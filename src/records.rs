//! In-memory notification records: completion and approval events surfaced
//! to external read clients (list/dismiss APIs), keyed by session for O(k)
//! bulk clearing.

use std::collections::HashMap;
use chrono::{DateTime, Utc};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::assistant::AssistantType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    Working,
    Completed,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CompletionRecord {
    pub id: String,
    pub session_id: String,
    pub project_id: String,
    pub title: String,
    pub assistant: AssistantType,
    pub completed_at: DateTime<Utc>,
    pub state: CompletionState,
    pub last_user_input: String,
    pub dismissed: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApprovalRecord {
    pub id: String,
    pub session_id: String,
    pub project_id: String,
    pub title: String,
    pub assistant: AssistantType,
    pub requested_at: DateTime<Utc>,
    pub dismissed: bool,
}

/// Parameters for a new completion record; `id` is assigned by the manager.
pub struct NewCompletion {
    pub session_id: String,
    pub project_id: String,
    pub title: String,
    pub assistant: AssistantType,
    pub state: Option<CompletionState>,
    pub last_user_input: String,
}

/// Parameters for a new approval record; `id` is assigned by the manager.
pub struct NewApproval {
    pub session_id: String,
    pub project_id: String,
    pub title: String,
    pub assistant: AssistantType,
}

#[derive(Default)]
struct Store {
    completions: HashMap<String, CompletionRecord>,
    approvals: HashMap<String, ApprovalRecord>,
    completions_by_session: HashMap<String, Vec<String>>,
    approvals_by_session: HashMap<String, Vec<String>>,
}

/// Shared notification-record store: completion and approval events, each
/// with a primary map plus a per-session secondary index so a session
/// close can clear its records in O(k) rather than scanning everything.
pub struct RecordManager {
    store: Mutex<Store>,
}

impl Default for RecordManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordManager {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::default()),
        }
    }

    pub fn add_completion(&self, new: NewCompletion) -> CompletionRecord {
        let record = CompletionRecord {
            id: Uuid::new_v4().to_string(),
            session_id: new.session_id,
            project_id: new.project_id,
            title: new.title,
            assistant: new.assistant,
            completed_at: Utc::now(),
            state: new.state.unwrap_or(CompletionState::Completed),
            last_user_input: new.last_user_input,
            dismissed: false,
        };
        let mut store = self.store.lock();
        store
            .completions_by_session
            .entry(record.session_id.clone())
            .or_default()
            .push(record.id.clone());
        store.completions.insert(record.id.clone(), record.clone());
        record
    }

    pub fn add_approval(&self, new: NewApproval) -> ApprovalRecord {
        let record = ApprovalRecord {
            id: Uuid::new_v4().to_string(),
            session_id: new.session_id,
            project_id: new.project_id,
            title: new.title,
            assistant: new.assistant,
            requested_at: Utc::now(),
            dismissed: false,
        };
        let mut store = self.store.lock();
        store
            .approvals_by_session
            .entry(record.session_id.clone())
            .or_default()
            .push(record.id.clone());
        store.approvals.insert(record.id.clone(), record.clone());
        record
    }

    pub fn get_completions(&self) -> Vec<CompletionRecord> {
        self.store
            .lock()
            .completions
            .values()
            .filter(|r| !r.dismissed)
            .cloned()
            .collect()
    }

    pub fn get_approvals(&self) -> Vec<ApprovalRecord> {
        self.store
            .lock()
            .approvals
            .values()
            .filter(|r| !r.dismissed)
            .cloned()
            .collect()
    }

    pub fn dismiss_completion(&self, id: &str) -> bool {
        match self.store.lock().completions.get_mut(id) {
            Some(r) => {
                r.dismissed = true;
                true
            }
            None => false,
        }
    }

    pub fn dismiss_approval(&self, id: &str) -> bool {
        match self.store.lock().approvals.get_mut(id) {
            Some(r) => {
                r.dismissed = true;
                true
            }
            None => false,
        }
    }

    /// Removes every completion and approval record for `session_id` from
    /// both the primary maps and the secondary indexes.
    pub fn clear_session_records(&self, session_id: &str) {
        self.clear_completions_for_session(session_id);
        self.clear_approvals_for_session(session_id);
    }

    /// Removes only the completion records for `session_id`.
    pub fn clear_completions_for_session(&self, session_id: &str) {
        let mut store = self.store.lock();
        if let Some(ids) = store.completions_by_session.remove(session_id) {
            for id in ids {
                store.completions.remove(&id);
            }
        }
    }

    /// Removes only the approval records for `session_id`.
    pub fn clear_approvals_for_session(&self, session_id: &str) {
        let mut store = self.store.lock();
        if let Some(ids) = store.approvals_by_session.remove(session_id) {
            for id in ids {
                store.approvals.remove(&id);
            }
        }
    }

    /// Flips each completion record for `session_id` to `new_state`.
    /// Returns whether any record matched.
    pub fn update_completion_state_by_session(
        &self,
        session_id: &str,
        new_state: CompletionState,
    ) -> bool {
        let mut store = self.store.lock();
        let ids = match store.completions_by_session.get(session_id) {
            Some(ids) => ids.clone(),
            None => return false,
        };
        let mut matched = false;
        for id in ids {
            if let Some(r) = store.completions.get_mut(&id) {
                r.state = new_state;
                matched = true;
            }
        }
        matched
    }

    /// As `update_completion_state_by_session`, additionally overwriting
    /// `last_user_input` only when `user_input` is non-empty (an empty
    /// value preserves the prior one).
    pub fn update_completion_by_session(
        &self,
        session_id: &str,
        new_state: CompletionState,
        user_input: &str,
    ) -> bool {
        let mut store = self.store.lock();
        let ids = match store.completions_by_session.get(session_id) {
            Some(ids) => ids.clone(),
            None => return false,
        };
        let mut matched = false;
        for id in ids {
            if let Some(r) = store.completions.get_mut(&id) {
                r.state = new_state;
                if !user_input.is_empty() {
                    r.last_user_input = user_input.to_string();
                }
                matched = true;
            }
        }
        matched
    }

    pub fn has_approvals_for_session(&self, session_id: &str) -> bool {
        self.store
            .lock()
            .approvals_by_session
            .get(session_id)
            .map(|ids| !ids.is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(session_id: &str) -> NewCompletion {
        NewCompletion {
            session_id: session_id.to_string(),
            project_id: "p1".to_string(),
            title: "shell".to_string(),
            assistant: AssistantType::Codex,
            state: None,
            last_user_input: String::new(),
        }
    }

    #[test]
    fn add_completion_defaults_to_completed_state() {
        let rm = RecordManager::new();
        let rec = rm.add_completion(completion("s1"));
        assert_eq!(rec.state, CompletionState::Completed);
        assert_eq!(rm.get_completions().len(), 1);
    }

    #[test]
    fn dismiss_then_list_excludes_record_but_new_add_is_visible() {
        let rm = RecordManager::new();
        let rec = rm.add_completion(completion("s1"));
        assert!(rm.dismiss_completion(&rec.id));
        assert!(rm.get_completions().is_empty());

        rm.add_completion(completion("s1"));
        assert_eq!(rm.get_completions().len(), 1);
    }

    #[test]
    fn clear_session_records_removes_from_both_collections() {
        let rm = RecordManager::new();
        rm.add_completion(completion("s1"));
        rm.add_approval(NewApproval {
            session_id: "s1".to_string(),
            project_id: "p1".to_string(),
            title: "shell".to_string(),
            assistant: AssistantType::Codex,
        });
        rm.clear_session_records("s1");
        assert!(rm.get_completions().is_empty());
        assert!(rm.get_approvals().is_empty());
        assert!(!rm.has_approvals_for_session("s1"));
    }

    #[test]
    fn update_completion_by_session_preserves_input_when_empty() {
        let rm = RecordManager::new();
        let mut new = completion("s1");
        new.last_user_input = "hello".to_string();
        rm.add_completion(new);

        assert!(rm.update_completion_by_session("s1", CompletionState::Working, ""));
        let rec = &rm.get_completions()[0];
        assert_eq!(rec.state, CompletionState::Working);
        assert_eq!(rec.last_user_input, "hello");

        rm.update_completion_by_session("s1", CompletionState::Completed, "goodbye");
        assert_eq!(rm.get_completions()[0].last_user_input, "goodbye");
    }

    #[test]
    fn dismiss_unknown_id_returns_false() {
        let rm = RecordManager::new();
        assert!(!rm.dismiss_completion("missing"));
        assert!(!rm.dismiss_approval("missing"));
    }
}
