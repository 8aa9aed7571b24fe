use serde::{Deserialize, Serialize};

use crate::types::{Member, UserId};

/// The authenticated user, as issued by the server on login or registration.
///
/// Immutable for the lifetime of a session; the session store persists it so
/// a restart does not require logging in again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    /// Unique, case-insensitive; the server stores it lower-cased.
    #[serde(rename = "username")]
    pub handle: String,
    pub display_name: String,
    #[serde(rename = "is_admin", default)]
    pub is_privileged: bool,
}

impl Identity {
    /// Case-insensitive comparison against a message author or member handle.
    pub fn owns_handle(&self, handle: &str) -> bool {
        self.handle.eq_ignore_ascii_case(handle)
    }

    /// This user as a group roster entry.
    pub fn as_member(&self) -> Member {
        Member {
            id: self.id,
            handle: self.handle.clone(),
            display_name: self.display_name.clone(),
            last_seen: None,
        }
    }

    /// Two-letter avatar initials derived from the display name.
    pub fn initials(&self) -> String {
        self.display_name
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .take(2)
            .flat_map(char::to_uppercase)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity {
            id: UserId(1),
            handle: "alice".into(),
            display_name: "Alice Liddell".into(),
            is_privileged: false,
        }
    }

    #[test]
    fn test_identity_wire_format() {
        let json = serde_json::to_value(alice()).unwrap();
        assert_eq!(json["username"], "alice");
        assert_eq!(json["is_admin"], false);

        let parsed: Identity = serde_json::from_value(serde_json::json!({
            "id": 1, "username": "alice", "display_name": "Alice Liddell"
        }))
        .unwrap();
        assert_eq!(parsed, alice());
    }

    #[test]
    fn test_owns_handle_ignores_case() {
        assert!(alice().owns_handle("ALICE"));
        assert!(!alice().owns_handle("bob"));
    }

    #[test]
    fn test_as_member() {
        let member = alice().as_member();
        assert_eq!(member.id, UserId(1));
        assert_eq!(member.handle, "alice");
        assert!(member.last_seen.is_none());
    }

    #[test]
    fn test_initials() {
        assert_eq!(alice().initials(), "AL");
    }
}
