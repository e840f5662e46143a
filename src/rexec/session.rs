use std::collections::HashMap;
use std::sync::Mutex;

/// Session id used for non-interactive execs (no tty, no stdin).
pub const ONEOFF_SESSION: &str = "oneoff";

/// Allocates the id that ties all audit records of one exec together.
/// Interactive sessions get a short hex prefix of a fresh 128-bit random
/// value; one-shot execs share the literal `oneoff` id.
pub fn allocate_session_id(interactive: bool) -> String {
    if !interactive {
        return ONEOFF_SESSION.to_string();
    }
    let raw: u128 = rand::random();
    format!("{:032x}", raw)[..8].to_string()
}

/// Per-server correlation state: which user owns a session, and the
/// in-flight input fragment last seen on its tapped stream. Each map has
/// its own lock; sessions only ever touch their own keys.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    users: Mutex<HashMap<String, String>>,
    residues: Mutex<HashMap<String, Vec<u8>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry::default()
    }

    pub fn begin(&self, session: &str, user: &str) {
        let mut users = self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        users.insert(session.to_string(), user.to_string());
    }

    pub fn user_for(&self, session: &str) -> Option<String> {
        let users = self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        users.get(session).cloned()
    }

    pub fn record_residue(&self, session: &str, residue: &[u8]) {
        let mut residues = self
            .residues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if residue.is_empty() {
            residues.remove(session);
        } else {
            residues.insert(session.to_string(), residue.to_vec());
        }
    }

    pub fn residue_for(&self, session: &str) -> Option<Vec<u8>> {
        let residues = self
            .residues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        residues.get(session).cloned()
    }

    pub fn end(&self, session: &str) {
        let mut users = self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        users.remove(session);
        drop(users);
        let mut residues = self
            .residues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        residues.remove(session);
    }

    pub fn active_sessions(&self) -> usize {
        let users = self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        users.len()
    }

    pub fn open_sessions(&self) -> Vec<String> {
        let users = self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        users.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interactive_sessions_get_an_eight_hex_id() {
        let id = allocate_session_id(true);
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        // Two allocations almost surely differ; equal ids would mean the
        // generator is not drawing fresh randomness.
        assert_ne!(allocate_session_id(true), allocate_session_id(true));
    }

    #[test]
    fn one_shot_sessions_share_the_literal_id() {
        assert_eq!(allocate_session_id(false), ONEOFF_SESSION);
    }

    #[test]
    fn registry_tracks_user_and_residue_per_session() {
        let registry = SessionRegistry::new();
        registry.begin("8d2f91ab", "alice");
        assert_eq!(registry.user_for("8d2f91ab").as_deref(), Some("alice"));
        assert_eq!(registry.active_sessions(), 1);
        assert_eq!(registry.open_sessions(), vec!["8d2f91ab".to_string()]);

        registry.record_residue("8d2f91ab", b"who");
        assert_eq!(registry.residue_for("8d2f91ab").as_deref(), Some(&b"who"[..]));
        registry.record_residue("8d2f91ab", b"");
        assert!(registry.residue_for("8d2f91ab").is_none());

        registry.end("8d2f91ab");
        assert!(registry.user_for("8d2f91ab").is_none());
        assert_eq!(registry.active_sessions(), 0);
    }
}
