//! Typed client for the REST surface.
//!
//! Wraps a [`Transport`] and turns raw JSON into domain types. A string
//! `error` field anywhere in a 2xx body is surfaced as
//! [`ApplicationError`]; everything else that goes wrong is a
//! [`TransportError`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use vestnik_shared::protocol::{
    AckEnvelope, AdminDump, CreateGroupRequest, GroupEnvelope, GroupsEnvelope, JoinGroupRequest,
    LoginRequest, MembersEnvelope, MessagesEnvelope, PostMessageRequest, PostedEnvelope,
    RegisterRequest, UserEnvelope, UsersEnvelope,
};
use vestnik_shared::{
    ApiError, ApplicationError, Group, GroupId, Identity, Member, Message, MessageId,
    TransportError, UserId,
};

use crate::transport::{Request, Transport};

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn call<T: DeserializeOwned>(&self, request: Request) -> Result<T, ApiError> {
        let endpoint = request.path().to_string();
        let value = self.transport.call(request).await.map_err(lift_rejection)?;

        if let Some(message) = find_error(&value) {
            debug!(endpoint = %endpoint, error = %message, "Server rejected request");
            return Err(ApplicationError(message).into());
        }

        serde_json::from_value(value)
            .map_err(|e| TransportError::Malformed(format!("{endpoint}: {e}")).into())
    }

    pub async fn register(
        &self,
        handle: &str,
        display_name: &str,
        password: &str,
    ) -> Result<Identity, ApiError> {
        let body = RegisterRequest {
            username: handle.to_string(),
            display_name: display_name.to_string(),
            password: password.to_string(),
        };
        let env: UserEnvelope = self.call(Request::post("register", &body)?).await?;
        Ok(env.user)
    }

    pub async fn login(&self, handle: &str, password: &str) -> Result<Identity, ApiError> {
        let body = LoginRequest {
            username: handle.to_string(),
            password: password.to_string(),
        };
        let env: UserEnvelope = self.call(Request::post("login", &body)?).await?;
        Ok(env.user)
    }

    /// Groups the user belongs to, or every group when `user_id` is `None`.
    pub async fn list_groups(&self, user_id: Option<UserId>) -> Result<Vec<Group>, ApiError> {
        let mut request = Request::get("groups");
        if let Some(id) = user_id {
            request = request.query("user_id", id);
        }
        let env: GroupsEnvelope = self.call(request).await?;
        Ok(env.groups)
    }

    pub async fn create_group(
        &self,
        name: &str,
        description: &str,
        user_id: UserId,
    ) -> Result<Group, ApiError> {
        let body = CreateGroupRequest {
            name: name.to_string(),
            description: description.to_string(),
            user_id,
        };
        let env: GroupEnvelope = self.call(Request::post("groups", &body)?).await?;
        Ok(env.group)
    }

    pub async fn join_group(&self, group_id: GroupId, user_id: UserId) -> Result<(), ApiError> {
        let body = JoinGroupRequest { group_id, user_id };
        let _: AckEnvelope = self.call(Request::post("groups/join", &body)?).await?;
        Ok(())
    }

    pub async fn list_members(&self, group_id: GroupId) -> Result<Vec<Member>, ApiError> {
        let request = Request::get("groups/members").query("group_id", group_id);
        let env: MembersEnvelope = self.call(request).await?;
        Ok(env.members)
    }

    /// Full snapshot of a group's messages. `group_id` is stamped on every
    /// message since some backends leave it out.
    pub async fn list_messages(&self, group_id: GroupId) -> Result<Vec<Message>, ApiError> {
        let request = Request::get("messages").query("group_id", group_id);
        let env: MessagesEnvelope = self.call(request).await?;
        Ok(env
            .messages
            .into_iter()
            .map(|mut m| {
                m.group_id = group_id;
                m
            })
            .collect())
    }

    /// Returns the server-assigned id when the response includes it.
    pub async fn post_message(
        &self,
        group_id: GroupId,
        user_id: UserId,
        text: &str,
    ) -> Result<Option<MessageId>, ApiError> {
        let body = PostMessageRequest {
            group_id,
            user_id,
            text: text.to_string(),
        };
        let env: PostedEnvelope = self.call(Request::post("messages", &body)?).await?;
        Ok(env.message.map(|m| m.id))
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<Member>, ApiError> {
        let env: UsersEnvelope = self.call(Request::get("users").query("q", query)).await?;
        Ok(env.users)
    }

    pub async fn admin_dump(&self, user_id: UserId) -> Result<AdminDump, ApiError> {
        self.call(Request::get("admin/chats").query("user_id", user_id))
            .await
    }
}

/// Backends that reject with a 4xx status still carry a readable business
/// error; surface it the same way as a 2xx rejection.
fn lift_rejection(err: TransportError) -> ApiError {
    match err {
        TransportError::ServerError {
            status: 400 | 401 | 403 | 409 | 422,
            message: Some(message),
        } => ApplicationError(message).into(),
        other => other.into(),
    }
}

/// First string-valued `error` key at any depth.
fn find_error(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(message)) = map.get("error") {
                return Some(message.clone());
            }
            map.values().find_map(find_error)
        }
        Value::Array(items) => items.iter().find_map(find_error),
        _ => None,
    }
}
