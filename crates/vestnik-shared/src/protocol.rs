use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::types::{Group, GroupId, Member, Message, MessageId, UserId};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// `POST /register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub display_name: String,
    pub password: String,
}

/// `POST /login`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// `POST /groups`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub user_id: UserId,
}

/// `POST /groups/join`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinGroupRequest {
    pub group_id: GroupId,
    pub user_id: UserId,
}

/// `POST /messages`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageRequest {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEnvelope {
    pub user: Identity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupsEnvelope {
    #[serde(default)]
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupEnvelope {
    pub group: Group,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembersEnvelope {
    #[serde(default)]
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesEnvelope {
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersEnvelope {
    #[serde(default)]
    pub users: Vec<Member>,
}

/// Response to `POST /messages`. Backends may answer with `{}`, in which case
/// the created message id is unknown to the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostedEnvelope {
    #[serde(default)]
    pub message: Option<PostedMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostedMessage {
    pub id: MessageId,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Response to `POST /groups/join`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AckEnvelope {
    #[serde(default)]
    pub ok: bool,
}

/// A message as listed by the admin dump, annotated with its group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdminMessage {
    pub id: MessageId,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub username: String,
    pub display_name: String,
    pub group_id: GroupId,
    pub group_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdminUser {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// `GET /admin/chats`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminDump {
    #[serde(default)]
    pub messages: Vec<AdminMessage>,
    #[serde(default)]
    pub users: Vec<AdminUser>,
}

/// Body of every business rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posted_envelope_accepts_empty_object() {
        let env: PostedEnvelope = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(env.message.is_none());

        let env: PostedEnvelope = serde_json::from_value(serde_json::json!({
            "message": { "id": 12, "text": "hi", "created_at": "2024-05-01T10:00:00Z" }
        }))
        .unwrap();
        assert_eq!(env.message.unwrap().id, MessageId(12));
    }

    #[test]
    fn test_create_group_request_field_names() {
        let req = CreateGroupRequest {
            name: "Ops".into(),
            description: String::new(),
            user_id: UserId(4),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["user_id"], 4);
        assert_eq!(json["name"], "Ops");
    }
}
