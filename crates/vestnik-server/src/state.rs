//! In-memory registry of users, groups, memberships and messages.
//!
//! All ids are allocated from per-kind counters starting at 1, so message
//! ids are globally unique and increase with insertion order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::info;

use vestnik_shared::protocol::{
    AdminDump, AdminMessage, AdminUser, CreateGroupRequest, JoinGroupRequest, LoginRequest,
    PostMessageRequest, RegisterRequest,
};
use vestnik_shared::validation::{
    normalize_handle, normalize_search_query, validate_group_name, validate_message_text,
    validate_registration,
};
use vestnik_shared::{Group, GroupId, Identity, Member, Message, MessageId, UserId};

use crate::config::ServerConfig;
use crate::error::ServerError;

struct UserRecord {
    identity: Identity,
    password_digest: String,
    last_seen: Option<DateTime<Utc>>,
}

impl UserRecord {
    fn member(&self) -> Member {
        Member {
            id: self.identity.id,
            handle: self.identity.handle.clone(),
            display_name: self.identity.display_name.clone(),
            last_seen: self.last_seen,
        }
    }
}

struct GroupRecord {
    id: GroupId,
    name: String,
    description: String,
    created_at: DateTime<Utc>,
}

struct MessageRecord {
    id: MessageId,
    group_id: GroupId,
    user_id: UserId,
    text: String,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct Registry {
    users: BTreeMap<UserId, UserRecord>,
    handles: HashMap<String, UserId>,
    groups: BTreeMap<GroupId, GroupRecord>,
    members: HashMap<GroupId, BTreeSet<UserId>>,
    /// Ascending by id.
    messages: Vec<MessageRecord>,
    last_user_id: i64,
    last_group_id: i64,
    last_message_id: i64,
}

/// Salted with the handle so equal passwords do not share a digest.
fn password_digest(handle: &str, password: &str) -> String {
    let mut hasher = blake3::Hasher::new_derive_key("vestnik-server 2024 password digest");
    hasher.update(handle.as_bytes());
    hasher.update(&[0]);
    hasher.update(password.as_bytes());
    hasher.finalize().to_hex().to_string()
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn user(&self, id: UserId) -> Result<&UserRecord, ServerError> {
        self.users
            .get(&id)
            .ok_or_else(|| ServerError::Rejected("Unknown user".into()))
    }

    fn group(&self, id: GroupId) -> Result<&GroupRecord, ServerError> {
        self.groups
            .get(&id)
            .ok_or_else(|| ServerError::Rejected("Group not found".into()))
    }

    fn member_count(&self, id: GroupId) -> u32 {
        self.members.get(&id).map_or(0, |m| m.len() as u32)
    }

    fn group_view(&self, record: &GroupRecord) -> Group {
        Group {
            id: record.id,
            name: record.name.clone(),
            description: record.description.clone(),
            member_count: self.member_count(record.id),
            created_at: Some(record.created_at),
        }
    }

    pub fn register(
        &mut self,
        req: RegisterRequest,
        config: &ServerConfig,
    ) -> Result<Identity, ServerError> {
        let input = validate_registration(&req.username, &req.display_name, &req.password)?;
        if self.handles.contains_key(&input.handle) {
            return Err(ServerError::Rejected("Handle already taken".into()));
        }

        self.last_user_id += 1;
        let identity = Identity {
            id: UserId(self.last_user_id),
            handle: input.handle.clone(),
            display_name: input.display_name,
            is_privileged: config.is_admin_handle(&input.handle),
        };

        self.handles.insert(input.handle.clone(), identity.id);
        self.users.insert(
            identity.id,
            UserRecord {
                identity: identity.clone(),
                password_digest: password_digest(&input.handle, &input.password),
                last_seen: None,
            },
        );

        info!(user = %identity.handle, id = %identity.id, privileged = identity.is_privileged, "User registered");
        Ok(identity)
    }

    /// Check credentials and stamp `last_seen`.
    pub fn login(&mut self, req: LoginRequest) -> Result<Identity, ServerError> {
        let handle = normalize_handle(&req.username);
        let digest = password_digest(&handle, &req.password);

        let record = self
            .handles
            .get(&handle)
            .and_then(|id| self.users.get_mut(id))
            .filter(|u| u.password_digest == digest)
            .ok_or_else(|| ServerError::Rejected("Wrong handle or password".into()))?;

        record.last_seen = Some(Utc::now());
        Ok(record.identity.clone())
    }

    /// Newest first. Limited to the user's groups when `user_id` is given.
    pub fn groups(&self, user_id: Option<UserId>) -> Vec<Group> {
        let mut groups: Vec<&GroupRecord> = self
            .groups
            .values()
            .filter(|g| match user_id {
                Some(user) => self
                    .members
                    .get(&g.id)
                    .is_some_and(|members| members.contains(&user)),
                None => true,
            })
            .collect();
        groups.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        groups.into_iter().map(|g| self.group_view(g)).collect()
    }

    /// Create a group and enrol its creator.
    pub fn create_group(&mut self, req: CreateGroupRequest) -> Result<Group, ServerError> {
        let name = validate_group_name(&req.name)?;
        self.user(req.user_id)?;

        self.last_group_id += 1;
        let record = GroupRecord {
            id: GroupId(self.last_group_id),
            name,
            description: req.description.trim().to_string(),
            created_at: Utc::now(),
        };
        let id = record.id;
        self.groups.insert(id, record);
        self.members.entry(id).or_default().insert(req.user_id);

        info!(group = %id, creator = %req.user_id, "Group created");
        self.group(id).map(|g| self.group_view(g))
    }

    /// Set semantics: joining twice is a no-op.
    pub fn join(&mut self, req: JoinGroupRequest) -> Result<(), ServerError> {
        self.group(req.group_id)?;
        self.user(req.user_id)?;
        if self
            .members
            .entry(req.group_id)
            .or_default()
            .insert(req.user_id)
        {
            info!(group = %req.group_id, user = %req.user_id, "Member joined");
        }
        Ok(())
    }

    pub fn members(&self, group_id: GroupId) -> Vec<Member> {
        self.members
            .get(&group_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.users.get(id))
                    .map(UserRecord::member)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn message_view(&self, record: &MessageRecord) -> Option<Message> {
        let author = self.users.get(&record.user_id)?;
        Some(Message {
            id: record.id,
            group_id: record.group_id,
            author_handle: author.identity.handle.clone(),
            author_display_name: author.identity.display_name.clone(),
            text: record.text.clone(),
            created_at: record.created_at,
        })
    }

    /// The newest `limit` messages of a group, ascending by id, so a poller
    /// always sees the latest posts however long the history grows.
    pub fn messages(&self, group_id: GroupId, limit: usize) -> Vec<Message> {
        let mut newest: Vec<Message> = self
            .messages
            .iter()
            .rev()
            .filter(|m| m.group_id == group_id)
            .filter_map(|m| self.message_view(m))
            .take(limit)
            .collect();
        newest.reverse();
        newest
    }

    pub fn post(&mut self, req: PostMessageRequest) -> Result<Message, ServerError> {
        let text = validate_message_text(&req.text)?;
        self.group(req.group_id)?;
        self.user(req.user_id)?;

        self.last_message_id += 1;
        let record = MessageRecord {
            id: MessageId(self.last_message_id),
            group_id: req.group_id,
            user_id: req.user_id,
            text,
            created_at: Utc::now(),
        };
        let message = self
            .message_view(&record)
            .ok_or_else(|| ServerError::Rejected("Unknown user".into()))?;
        self.messages.push(record);
        Ok(message)
    }

    /// Case-insensitive substring match on handle.
    pub fn search(&self, query: &str, limit: usize) -> Vec<Member> {
        let query = normalize_search_query(query);
        self.users
            .values()
            .filter(|u| u.identity.handle.contains(&query))
            .take(limit)
            .map(UserRecord::member)
            .collect()
    }

    /// Newest messages across all groups plus every user, newest first.
    pub fn admin_dump(&self, user_id: UserId, limit: usize) -> Result<AdminDump, ServerError> {
        let caller = self
            .users
            .get(&user_id)
            .filter(|u| u.identity.is_privileged)
            .ok_or_else(|| ServerError::Forbidden("Admin access required".into()))?;

        let messages = self
            .messages
            .iter()
            .rev()
            .filter_map(|m| {
                let author = self.users.get(&m.user_id)?;
                let group = self.groups.get(&m.group_id)?;
                Some(AdminMessage {
                    id: m.id,
                    text: m.text.clone(),
                    created_at: m.created_at,
                    username: author.identity.handle.clone(),
                    display_name: author.identity.display_name.clone(),
                    group_id: group.id,
                    group_name: group.name.clone(),
                })
            })
            .take(limit)
            .collect();

        let users = self
            .users
            .values()
            .rev()
            .map(|u| AdminUser {
                id: u.identity.id,
                username: u.identity.handle.clone(),
                display_name: u.identity.display_name.clone(),
                is_admin: u.identity.is_privileged,
                last_seen: u.last_seen,
            })
            .collect();

        info!(admin = %caller.identity.handle, "Admin dump served");
        Ok(AdminDump { messages, users })
    }
}
