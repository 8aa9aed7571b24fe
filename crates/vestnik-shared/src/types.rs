use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Server-issued user id
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(transparent)]
pub struct GroupId(pub i64);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message id. Positive values are assigned by the server in causal order;
/// negative values are client-side placeholders for optimistic inserts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl MessageId {
    pub fn is_provisional(&self) -> bool {
        self.0 < 0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A group conversation as listed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Server-computed projection, never incremented locally.
    #[serde(default)]
    pub member_count: u32,
    /// Some backends omit this from the create response.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A chat message. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    /// Absent from some snapshot responses; the API client fills it in from
    /// the request.
    #[serde(default)]
    pub group_id: GroupId,
    #[serde(rename = "username")]
    pub author_handle: String,
    #[serde(rename = "display_name")]
    pub author_display_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A user as seen in rosters and search results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub id: UserId,
    #[serde(rename = "username")]
    pub handle: String,
    pub display_name: String,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisional_ids() {
        assert!(MessageId(-1).is_provisional());
        assert!(!MessageId(0).is_provisional());
        assert!(!MessageId(42).is_provisional());
    }

    #[test]
    fn test_message_wire_names() {
        let json = serde_json::json!({
            "id": 7,
            "text": "hi",
            "created_at": "2024-05-01T10:00:00Z",
            "username": "alice",
            "display_name": "Alice"
        });
        let msg: Message = serde_json::from_value(json).unwrap();
        assert_eq!(msg.id, MessageId(7));
        assert_eq!(msg.group_id, GroupId(0));
        assert_eq!(msg.author_handle, "alice");
        assert_eq!(msg.author_display_name, "Alice");
    }

    #[test]
    fn test_group_without_projection_fields() {
        let json = serde_json::json!({ "id": 3, "name": "Ops", "description": "" });
        let group: Group = serde_json::from_value(json).unwrap();
        assert_eq!(group.member_count, 0);
        assert!(group.created_at.is_none());
    }

    #[test]
    fn test_member_null_last_seen() {
        let json = serde_json::json!({
            "id": 1, "username": "bob", "display_name": "Bob", "last_seen": null
        });
        let member: Member = serde_json::from_value(json).unwrap();
        assert_eq!(member.id, UserId(1));
        assert!(member.last_seen.is_none());
    }
}
