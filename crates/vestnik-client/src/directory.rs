//! User search and group rosters.
//!
//! The server is the source of truth for membership; the directory only
//! keeps the last roster it saw per group, updated locally on a successful
//! `join` so the new member shows up right away.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use vestnik_net::ApiClient;
use vestnik_shared::validation::normalize_search_query;
use vestnik_shared::{ApiError, GroupId, Member};

pub struct MembershipDirectory {
    api: ApiClient,
    rosters: RwLock<HashMap<GroupId, Vec<Member>>>,
}

impl MembershipDirectory {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            rosters: RwLock::new(HashMap::new()),
        }
    }

    /// Case-insensitive handle search. A blank query (or a bare `@`) returns
    /// nothing without asking the server.
    pub async fn search(&self, query: &str) -> Result<Vec<Member>, ApiError> {
        let query = normalize_search_query(query);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let found = self.api.search_users(&query).await?;
        let matches: Vec<Member> = found
            .into_iter()
            .filter(|m| m.handle.to_lowercase().contains(&query))
            .collect();

        debug!(query = %query, results = matches.len(), "User search");
        Ok(matches)
    }

    /// Add `member` to `group_id`. Joining twice is not an error.
    pub async fn join(&self, group_id: GroupId, member: &Member) -> Result<(), ApiError> {
        self.api.join_group(group_id, member.id).await?;

        let mut rosters = self.rosters.write().unwrap_or_else(PoisonError::into_inner);
        let roster = rosters.entry(group_id).or_default();
        if !roster.iter().any(|m| m.id == member.id) {
            roster.push(member.clone());
        }

        debug!(group = %group_id, user = %member.id, "Joined group");
        Ok(())
    }

    /// Reload a group's roster from the server.
    pub async fn refresh(&self, group_id: GroupId) -> Result<Vec<Member>, ApiError> {
        let members = self.api.list_members(group_id).await?;
        self.rosters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(group_id, members.clone());
        Ok(members)
    }

    /// Last known roster; empty until the first refresh or join.
    pub fn roster(&self, group_id: GroupId) -> Vec<Member> {
        self.rosters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&group_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.rosters.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
