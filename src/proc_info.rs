//! Cross-platform process introspection for a session's shell.
//!
//! Answers the one fact the status pipeline actually needs: is there a
//! live foreground child, and if so, what is its command line (fed to
//! `AssistantDetector`) -- not a full descendant process tree.

use sysinfo::{Pid, System};

/// A direct or indirect descendant of a session's shell process.
#[derive(Debug, Clone)]
pub struct ForegroundChild {
    pub pid: u32,
    pub command: Vec<String>,
}

/// Returns the "foreground" child of `root_pid`: the deepest descendant
/// along the most-recently-spawned chain, which in a typical shell is the
/// interactive program currently holding the terminal (e.g. `claude`,
/// `codex`, or a child process of one of those).
///
/// Returns `None` if the root process has no live children (an idle shell
/// prompt) or does not exist.
pub fn foreground_child(root_pid: i32) -> Option<ForegroundChild> {
    let mut sys = System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

    let root = Pid::from_u32(root_pid as u32);
    sys.process(root)?;

    let mut children: std::collections::HashMap<Pid, Vec<Pid>> = std::collections::HashMap::new();
    for (pid, process) in sys.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    // Walk the chain of youngest children (highest pid = most recently
    // forked, a reasonable proxy for "currently in the foreground" without
    // a controlling-terminal ioctl, which sysinfo does not expose portably).
    let mut current = root;
    loop {
        match children.get(&current).and_then(|kids| kids.iter().max()) {
            Some(&next) => current = next,
            None => break,
        }
    }

    if current == root {
        return None;
    }

    let process = sys.process(current)?;
    Some(ForegroundChild {
        pid: current.as_u32(),
        command: process
            .cmd()
            .iter()
            .map(|s| s.to_string_lossy().to_string())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_children_for_unknown_pid() {
        // A pid vanishingly unlikely to exist.
        assert!(foreground_child(i32::MAX - 1).is_none());
    }
}
