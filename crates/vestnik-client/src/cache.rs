//! Per-group conversation logs merged from snapshot polls.
//!
//! Each group's log is an immutable [`ConversationLog`] value behind an
//! `Arc`. Writers build the next value and publish it with a single map
//! insert, so readers always see either the previous or the next log, never
//! a partially merged one.
//!
//! Confirmed messages are unique by id and kept in ascending id order; once
//! present they are never removed or reordered. Optimistic inserts live
//! alongside them as provisional entries with negative placeholder ids until
//! they are reconciled with their server copy, fail, or are discarded.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use vestnik_shared::constants::{DEFAULT_PENDING_TIMEOUT_MS, DEFAULT_RECONCILE_WINDOW_SECS};
use vestnik_shared::{GroupId, Identity, Message, MessageId};

// ---------------------------------------------------------------------------
// Log entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Observed in a server snapshot.
    Confirmed,
    /// Sent optimistically, waiting for its server copy.
    Pending,
    /// Never confirmed; waiting for the user to retry or discard it.
    Failed,
}

/// One row of a conversation as presented to readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub message: Message,
    pub state: DeliveryState,
}

#[derive(Debug, Clone)]
struct Provisional {
    message: Message,
    failed: bool,
    /// Server id learned from the post response.
    server_id: Option<MessageId>,
    /// Highest confirmed id at the time of the optimistic insert.
    after: Option<MessageId>,
    submitted: Instant,
}

impl Provisional {
    fn state(&self) -> DeliveryState {
        if self.failed {
            DeliveryState::Failed
        } else {
            DeliveryState::Pending
        }
    }

    /// Fallback match for entries whose server id is unknown.
    fn matches(&self, candidate: &Message, window: Duration) -> bool {
        let skew_ms = (candidate.created_at - self.message.created_at)
            .num_milliseconds()
            .unsigned_abs();

        self.after.map_or(true, |after| candidate.id > after)
            && candidate.group_id == self.message.group_id
            && candidate
                .author_handle
                .eq_ignore_ascii_case(&self.message.author_handle)
            && candidate.text == self.message.text
            && u128::from(skew_ms) <= window.as_millis()
    }
}

/// Immutable snapshot of one group's conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    confirmed: Vec<Message>,
    provisional: Vec<Provisional>,
    version: u64,
}

impl ConversationLog {
    /// Confirmed messages by ascending id, then provisional entries in
    /// submission order.
    pub fn entries(&self) -> Vec<LogEntry> {
        let confirmed = self.confirmed.iter().map(|m| LogEntry {
            message: m.clone(),
            state: DeliveryState::Confirmed,
        });
        let provisional = self.provisional.iter().map(|p| LogEntry {
            message: p.message.clone(),
            state: p.state(),
        });
        confirmed.chain(provisional).collect()
    }

    pub fn confirmed(&self) -> &[Message] {
        &self.confirmed
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn last_confirmed_id(&self) -> Option<MessageId> {
        self.confirmed.last().map(|m| m.id)
    }

    fn provisional_mut(&mut self, placeholder: MessageId) -> Option<&mut Provisional> {
        self.provisional
            .iter_mut()
            .find(|p| p.message.id == placeholder)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A provisional entry replaced by its server copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    pub placeholder: MessageId,
    pub server_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// Confirmed messages that were not in the log before.
    pub added: usize,
    pub reconciled: Vec<Reconciled>,
    pub log: Vec<LogEntry>,
    pub version: u64,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Unbound pending entries older than this are marked failed.
    pub pending_timeout: Duration,
    /// Maximum `created_at` distance for heuristic reconciliation. Also how
    /// long an entry bound to a server id may wait for its copy.
    pub reconcile_window: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            pending_timeout: Duration::from_millis(DEFAULT_PENDING_TIMEOUT_MS),
            reconcile_window: Duration::from_secs(DEFAULT_RECONCILE_WINDOW_SECS as u64),
        }
    }
}

pub struct ConversationCache {
    logs: RwLock<HashMap<GroupId, Arc<ConversationLog>>>,
    next_placeholder: AtomicI64,
    config: CacheConfig,
}

impl ConversationCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            next_placeholder: AtomicI64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Apply `f` to a copy of the group's log and publish the copy if `f`
    /// reports a change. Writers are serialised by the map lock.
    fn update<R>(
        &self,
        group_id: GroupId,
        f: impl FnOnce(&mut ConversationLog) -> (R, bool),
    ) -> (R, Arc<ConversationLog>) {
        let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
        let current = logs.get(&group_id).cloned().unwrap_or_default();

        let mut next = ConversationLog::clone(&current);
        let (result, changed) = f(&mut next);
        if !changed {
            return (result, current);
        }

        next.version += 1;
        let next = Arc::new(next);
        logs.insert(group_id, next.clone());
        (result, next)
    }

    fn snapshot(&self, group_id: GroupId) -> Option<Arc<ConversationLog>> {
        self.logs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&group_id)
            .cloned()
    }

    /// Merge a full snapshot of the group's messages.
    ///
    /// Idempotent: merging the same snapshot again adds nothing. When an id
    /// is already known the existing copy wins.
    pub fn merge(
        &self,
        group_id: GroupId,
        incoming: impl IntoIterator<Item = Message>,
    ) -> MergeResult {
        let window = self.config.reconcile_window;

        let ((added, reconciled), log) = self.update(group_id, |log| {
            let mut by_id: BTreeMap<MessageId, Message> =
                log.confirmed.iter().map(|m| (m.id, m.clone())).collect();
            let mut fresh = Vec::new();

            for message in incoming {
                if message.id.is_provisional() || message.group_id != group_id {
                    warn!(
                        group = %group_id,
                        msg_id = %message.id,
                        msg_group = %message.group_id,
                        "Ignoring message that does not belong in this log"
                    );
                    continue;
                }
                match by_id.entry(message.id) {
                    Entry::Vacant(slot) => {
                        fresh.push(message.clone());
                        slot.insert(message);
                    }
                    Entry::Occupied(existing) => {
                        if existing.get().text != message.text {
                            warn!(
                                group = %group_id,
                                msg_id = %message.id,
                                "Server sent a different copy of a known message, keeping ours"
                            );
                        }
                    }
                }
            }

            let added = fresh.len();
            if added > 0 {
                log.confirmed = by_id.into_values().collect();
            }

            fresh.sort_by_key(|m| m.id);
            let reconciled = reconcile(log, &fresh, window);
            let changed = added > 0 || !reconciled.is_empty();
            ((added, reconciled), changed)
        });

        if added > 0 || !reconciled.is_empty() {
            debug!(
                group = %group_id,
                added,
                reconciled = reconciled.len(),
                version = log.version,
                "Merged snapshot"
            );
        }

        MergeResult {
            added,
            reconciled,
            log: log.entries(),
            version: log.version,
        }
    }

    /// Allocate a placeholder id. Placeholders count down from -1 and never
    /// collide with server ids.
    pub fn next_placeholder_id(&self) -> MessageId {
        MessageId(self.next_placeholder.fetch_sub(1, Ordering::SeqCst) - 1)
    }

    /// Build an optimistic message authored by `author`.
    pub fn provisional(&self, group_id: GroupId, author: &Identity, text: &str) -> Message {
        Message {
            id: self.next_placeholder_id(),
            group_id,
            author_handle: author.handle.clone(),
            author_display_name: author.display_name.clone(),
            text: text.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Insert an optimistic message ahead of server confirmation.
    pub fn append(&self, group_id: GroupId, provisional: Message) {
        if !provisional.id.is_provisional() {
            warn!(
                group = %group_id,
                msg_id = %provisional.id,
                "Appended message carries a server id, merging it as confirmed"
            );
            self.merge(group_id, [provisional]);
            return;
        }

        let placeholder = provisional.id;
        let ((), _) = self.update(group_id, |log| {
            if log.provisional_mut(placeholder).is_some() {
                return ((), false);
            }
            let after = log.last_confirmed_id();
            log.provisional.push(Provisional {
                message: provisional,
                failed: false,
                server_id: None,
                after,
                submitted: Instant::now(),
            });
            ((), true)
        });

        debug!(group = %group_id, placeholder = %placeholder, "Optimistic insert");
    }

    /// Bind a provisional entry to the id the server assigned to it.
    ///
    /// Returns `true` if the server copy was already in the log, in which
    /// case the provisional entry is removed right away.
    pub fn acknowledge(
        &self,
        group_id: GroupId,
        placeholder: MessageId,
        server_id: MessageId,
    ) -> bool {
        let (replaced, _) = self.update(group_id, |log| {
            let already_known = log.confirmed.binary_search_by_key(&server_id, |m| m.id).is_ok();
            let Some(entry) = log.provisional_mut(placeholder) else {
                return (false, false);
            };
            if already_known {
                log.provisional.retain(|p| p.message.id != placeholder);
                return (true, true);
            }
            entry.server_id = Some(server_id);
            entry.failed = false;
            (false, true)
        });

        debug!(
            group = %group_id,
            placeholder = %placeholder,
            server_id = %server_id,
            replaced,
            "Provisional entry acknowledged"
        );
        replaced
    }

    /// Returns `false` if the placeholder is unknown.
    pub fn mark_failed(&self, group_id: GroupId, placeholder: MessageId) -> bool {
        let (found, _) = self.update(group_id, |log| match log.provisional_mut(placeholder) {
            Some(entry) if !entry.failed => {
                entry.failed = true;
                (true, true)
            }
            Some(_) => (true, false),
            None => (false, false),
        });
        if found {
            info!(group = %group_id, placeholder = %placeholder, "Message delivery failed");
        }
        found
    }

    /// Mark pending entries older than their timeout as failed and return
    /// their placeholders.
    ///
    /// Unbound entries use the pending timeout. Entries bound to a server id
    /// were accepted by the server and get the longer reconcile window to
    /// show up in a snapshot; they keep their binding once failed.
    pub fn expire_pending(&self, group_id: GroupId) -> Vec<MessageId> {
        let pending_timeout = self.config.pending_timeout;
        let bound_timeout = self.config.reconcile_window.max(pending_timeout);
        let now = Instant::now();

        let (expired, _) = self.update(group_id, |log| {
            let mut expired = Vec::new();
            for entry in log.provisional.iter_mut() {
                let timeout = if entry.server_id.is_some() {
                    bound_timeout
                } else {
                    pending_timeout
                };
                if !entry.failed && now.duration_since(entry.submitted) >= timeout {
                    entry.failed = true;
                    expired.push(entry.message.id);
                }
            }
            let changed = !expired.is_empty();
            (expired, changed)
        });

        for placeholder in &expired {
            info!(group = %group_id, placeholder = %placeholder, "Pending message timed out");
        }
        expired
    }

    /// Remove a provisional entry, returning it so the caller can offer a
    /// retry. Confirmed messages cannot be discarded.
    pub fn discard(&self, group_id: GroupId, placeholder: MessageId) -> Option<Message> {
        let (removed, _) = self.update(group_id, |log| {
            let Some(pos) = log
                .provisional
                .iter()
                .position(|p| p.message.id == placeholder)
            else {
                return (None, false);
            };
            let removed = log.provisional.remove(pos);
            (Some(removed.message), true)
        });
        removed
    }

    /// Owned snapshot of the whole conversation.
    pub fn read(&self, group_id: GroupId) -> Vec<LogEntry> {
        self.snapshot(group_id)
            .map(|log| log.entries())
            .unwrap_or_default()
    }

    /// Owned snapshot of the confirmed messages only.
    pub fn messages(&self, group_id: GroupId) -> Vec<Message> {
        self.snapshot(group_id)
            .map(|log| log.confirmed.clone())
            .unwrap_or_default()
    }

    pub fn failed(&self, group_id: GroupId) -> Vec<Message> {
        self.snapshot(group_id)
            .map(|log| {
                log.provisional
                    .iter()
                    .filter(|p| p.failed)
                    .map(|p| p.message.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Change counter; bumps on every published change.
    pub fn version(&self, group_id: GroupId) -> u64 {
        self.snapshot(group_id).map_or(0, |log| log.version)
    }

    /// Forget every conversation (used on logout).
    pub fn clear(&self) {
        self.logs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Replace provisional entries whose server copy is now in the log.
///
/// Entries bound to a server id are matched by id only. Unbound entries,
/// failed ones included, fall back to matching `fresh` messages on author,
/// text and time, with each fresh message claimed by at most one entry.
fn reconcile(log: &mut ConversationLog, fresh: &[Message], window: Duration) -> Vec<Reconciled> {
    if log.provisional.is_empty() {
        return Vec::new();
    }

    let known: HashSet<MessageId> = log.confirmed.iter().map(|m| m.id).collect();
    let mut claimed: HashSet<MessageId> =
        log.provisional.iter().filter_map(|p| p.server_id).collect();
    let mut reconciled = Vec::new();

    log.provisional.retain(|p| {
        if let Some(server_id) = p.server_id {
            if known.contains(&server_id) {
                reconciled.push(Reconciled {
                    placeholder: p.message.id,
                    server_id,
                });
                return false;
            }
            return true;
        }
        let candidate = fresh
            .iter()
            .find(|m| !claimed.contains(&m.id) && p.matches(m, window));
        match candidate {
            Some(m) => {
                claimed.insert(m.id);
                reconciled.push(Reconciled {
                    placeholder: p.message.id,
                    server_id: m.id,
                });
                false
            }
            None => true,
        }
    });

    reconciled
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use vestnik_shared::UserId;

    const G: GroupId = GroupId(7);

    fn at(id: i64, author: &str, text: &str, created_at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId(id),
            group_id: G,
            author_handle: author.to_string(),
            author_display_name: author.to_uppercase(),
            text: text.to_string(),
            created_at,
        }
    }

    fn msg(id: i64, author: &str, text: &str) -> Message {
        at(id, author, text, Utc::now())
    }

    fn ids(entries: &[LogEntry]) -> Vec<i64> {
        entries.iter().map(|e| e.message.id.0).collect()
    }

    fn me() -> Identity {
        Identity {
            id: UserId(1),
            handle: "alice".into(),
            display_name: "Alice".into(),
            is_privileged: false,
        }
    }

    #[test]
    fn test_merge_sorts_and_dedups() {
        let cache = ConversationCache::default();
        let result = cache.merge(G, vec![msg(3, "b", "c"), msg(1, "b", "a"), msg(2, "b", "b")]);
        assert_eq!(result.added, 3);
        assert_eq!(ids(&result.log), vec![1, 2, 3]);
        assert!(result
            .log
            .iter()
            .all(|e| e.state == DeliveryState::Confirmed));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let cache = ConversationCache::default();
        let snapshot = vec![msg(1, "b", "hi"), msg(2, "c", "yo")];

        let first = cache.merge(G, snapshot.clone());
        let second = cache.merge(G, snapshot);
        assert_eq!(first.added, 2);
        assert_eq!(second.added, 0);
        assert_eq!(first.log, second.log);
        assert_eq!(first.version, second.version);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let s1 = vec![msg(4, "b", "d"), msg(2, "b", "b")];
        let s2 = vec![msg(3, "b", "c"), msg(1, "b", "a")];
        let base = vec![msg(2, "b", "b")];

        let left = ConversationCache::default();
        left.merge(G, base.clone());
        let l = left.merge(G, s1.iter().chain(s2.iter()).cloned());

        let right = ConversationCache::default();
        right.merge(G, base);
        let r = right.merge(G, s2.iter().chain(s1.iter()).cloned());

        assert_eq!(l.log, r.log);
        assert_eq!(l.added, r.added);
    }

    #[test]
    fn test_merge_never_removes_messages() {
        let cache = ConversationCache::default();
        cache.merge(G, vec![msg(1, "b", "a"), msg(2, "b", "b"), msg(3, "b", "c")]);

        // A later snapshot that dropped old history still leaves them in place.
        let result = cache.merge(G, vec![msg(3, "b", "c"), msg(4, "b", "d")]);
        assert_eq!(result.added, 1);
        assert_eq!(ids(&result.log), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_existing_copy_wins() {
        let cache = ConversationCache::default();
        cache.merge(G, vec![msg(1, "b", "original")]);
        let result = cache.merge(G, vec![msg(1, "b", "edited")]);
        assert_eq!(result.added, 0);
        assert_eq!(result.log[0].message.text, "original");
    }

    #[test]
    fn test_merge_rejects_foreign_messages() {
        let cache = ConversationCache::default();
        let mut foreign = msg(5, "b", "elsewhere");
        foreign.group_id = GroupId(99);
        let result = cache.merge(G, vec![foreign, msg(-3, "b", "fake placeholder")]);
        assert_eq!(result.added, 0);
        assert!(cache.read(G).is_empty());
    }

    #[test]
    fn test_groups_are_independent() {
        let cache = ConversationCache::default();
        cache.merge(G, vec![msg(1, "b", "a")]);
        assert!(cache.read(GroupId(8)).is_empty());
        assert_eq!(cache.version(GroupId(8)), 0);
        assert_eq!(cache.version(G), 1);
    }

    #[test]
    fn test_optimistic_send_reconciles_by_content() {
        let cache = ConversationCache::default();
        cache.merge(G, vec![msg(1, "bob", "hi"), msg(2, "carol", "yo")]);
        assert_eq!(ids(&cache.read(G)), vec![1, 2]);

        let provisional = cache.provisional(G, &me(), "sup");
        assert_eq!(provisional.id, MessageId(-1));
        cache.append(G, provisional);

        let log = cache.read(G);
        assert_eq!(ids(&log), vec![1, 2, -1]);
        assert_eq!(log[2].state, DeliveryState::Pending);

        let result = cache.merge(
            G,
            vec![msg(1, "bob", "hi"), msg(2, "carol", "yo"), msg(3, "alice", "sup")],
        );
        assert_eq!(ids(&result.log), vec![1, 2, 3]);
        assert_eq!(
            result.reconciled,
            vec![Reconciled {
                placeholder: MessageId(-1),
                server_id: MessageId(3)
            }]
        );
        assert!(result
            .log
            .iter()
            .all(|e| e.state == DeliveryState::Confirmed));
    }

    #[test]
    fn test_reconcile_by_server_id() {
        let cache = ConversationCache::default();
        let provisional = cache.provisional(G, &me(), "same");
        let placeholder = provisional.id;
        cache.append(G, provisional);
        assert!(!cache.acknowledge(G, placeholder, MessageId(10)));

        // Another identical message from us arrives first; it must not be
        // taken for the acknowledged one.
        let result = cache.merge(G, vec![msg(9, "alice", "same")]);
        assert!(result.reconciled.is_empty());
        assert_eq!(ids(&result.log), vec![9, placeholder.0]);

        let result = cache.merge(G, vec![msg(9, "alice", "same"), msg(10, "alice", "same")]);
        assert_eq!(ids(&result.log), vec![9, 10]);
        assert_eq!(result.reconciled[0].server_id, MessageId(10));
    }

    #[test]
    fn test_acknowledge_after_poll_already_delivered() {
        let cache = ConversationCache::default();
        let provisional = cache.provisional(G, &me(), "race");
        let placeholder = provisional.id;
        cache.append(G, provisional);
        let mut acked = cache.provisional(G, &me(), "race");
        acked.id = MessageId(-50);
        cache.append(G, acked);

        // The poll lands before the post response; the first matching entry
        // claims the only candidate.
        cache.merge(G, vec![msg(4, "alice", "race")]);
        assert_eq!(ids(&cache.read(G)), vec![4, -50]);

        assert!(!cache.acknowledge(G, placeholder, MessageId(4)));
        assert!(cache.acknowledge(G, MessageId(-50), MessageId(4)));
        assert_eq!(ids(&cache.read(G)), vec![4]);
    }

    #[test]
    fn test_heuristic_requires_newer_id_and_same_author() {
        let cache = ConversationCache::default();
        cache.merge(G, vec![msg(5, "alice", "again")]);

        let provisional = cache.provisional(G, &me(), "again");
        cache.append(G, provisional);

        // Old id and other author do not reconcile.
        let result = cache.merge(G, vec![msg(3, "alice", "again"), msg(6, "bob", "again")]);
        assert!(result.reconciled.is_empty());
        assert_eq!(ids(&result.log), vec![3, 5, 6, -1]);
    }

    #[test]
    fn test_heuristic_respects_time_window() {
        let cache = ConversationCache::new(CacheConfig {
            reconcile_window: Duration::from_secs(5),
            ..CacheConfig::default()
        });
        cache.append(G, cache.provisional(G, &me(), "late"));

        let stale = at(1, "alice", "late", Utc::now() - chrono::Duration::minutes(10));
        let result = cache.merge(G, vec![stale]);
        assert!(result.reconciled.is_empty());
        assert_eq!(cache.read(G).last().unwrap().state, DeliveryState::Pending);
    }

    #[test]
    fn test_duplicate_texts_reconcile_one_to_one() {
        let cache = ConversationCache::default();
        cache.append(G, cache.provisional(G, &me(), "ok"));
        cache.append(G, cache.provisional(G, &me(), "ok"));

        let result = cache.merge(G, vec![msg(1, "alice", "ok")]);
        assert_eq!(result.reconciled.len(), 1);
        assert_eq!(ids(&result.log), vec![1, -2]);

        let result = cache.merge(G, vec![msg(1, "alice", "ok"), msg(2, "alice", "ok")]);
        assert_eq!(ids(&result.log), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_entry_times_out_to_failed() {
        let cache = ConversationCache::new(CacheConfig {
            pending_timeout: Duration::from_secs(15),
            ..CacheConfig::default()
        });
        let provisional = cache.provisional(G, &me(), "lost");
        let placeholder = provisional.id;
        cache.append(G, provisional);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.expire_pending(G).is_empty());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.expire_pending(G), vec![placeholder]);
        assert!(cache.expire_pending(G).is_empty());

        let log = cache.read(G);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].state, DeliveryState::Failed);
        assert_eq!(cache.failed(G).len(), 1);

        // The server copy showing up late still replaces the failed entry.
        let result = cache.merge(G, vec![msg(1, "alice", "lost")]);
        assert_eq!(result.reconciled[0].placeholder, placeholder);
        assert_eq!(ids(&result.log), vec![1]);
        assert!(cache.failed(G).is_empty());
    }

    #[test]
    fn test_failed_entry_outside_window_is_kept() {
        let cache = ConversationCache::new(CacheConfig {
            reconcile_window: Duration::from_secs(5),
            ..CacheConfig::default()
        });
        let provisional = cache.provisional(G, &me(), "lost");
        let placeholder = provisional.id;
        cache.append(G, provisional);
        cache.mark_failed(G, placeholder);

        let stale = at(1, "alice", "lost", Utc::now() - chrono::Duration::minutes(10));
        let result = cache.merge(G, vec![stale]);
        assert!(result.reconciled.is_empty());
        assert_eq!(cache.failed(G).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_entry_gets_longer_timeout() {
        let cache = ConversationCache::new(CacheConfig {
            pending_timeout: Duration::from_secs(15),
            reconcile_window: Duration::from_secs(60),
        });
        let provisional = cache.provisional(G, &me(), "sent");
        let placeholder = provisional.id;
        cache.append(G, provisional);
        cache.acknowledge(G, placeholder, MessageId(201));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cache.expire_pending(G).is_empty());

        // The copy never shows up in a snapshot: the entry still fails.
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.expire_pending(G), vec![placeholder]);
        assert_eq!(cache.read(G)[0].state, DeliveryState::Failed);

        // Its binding survives, so a late copy still replaces it.
        let result = cache.merge(G, vec![msg(201, "alice", "sent")]);
        assert_eq!(ids(&result.log), vec![201]);
    }

    #[test]
    fn test_failed_entry_bound_to_id_still_reconciles() {
        let cache = ConversationCache::default();
        let provisional = cache.provisional(G, &me(), "flaky");
        let placeholder = provisional.id;
        cache.append(G, provisional);
        cache.acknowledge(G, placeholder, MessageId(2));
        cache.mark_failed(G, placeholder);

        let result = cache.merge(G, vec![msg(2, "alice", "flaky")]);
        assert_eq!(ids(&result.log), vec![2]);
    }

    #[test]
    fn test_discard_returns_message() {
        let cache = ConversationCache::default();
        let provisional = cache.provisional(G, &me(), "oops");
        let placeholder = provisional.id;
        cache.append(G, provisional);
        assert!(cache.mark_failed(G, placeholder));

        let removed = cache.discard(G, placeholder).unwrap();
        assert_eq!(removed.text, "oops");
        assert!(cache.read(G).is_empty());
        assert!(cache.discard(G, placeholder).is_none());
        assert!(!cache.mark_failed(G, placeholder));
    }

    #[test]
    fn test_append_with_server_id_is_merged() {
        let cache = ConversationCache::default();
        cache.append(G, msg(8, "alice", "direct"));
        let log = cache.read(G);
        assert_eq!(log[0].state, DeliveryState::Confirmed);
    }

    #[test]
    fn test_read_returns_owned_snapshot() {
        let cache = ConversationCache::default();
        cache.merge(G, vec![msg(1, "b", "a")]);
        let before = cache.read(G);
        cache.merge(G, vec![msg(2, "b", "b")]);
        assert_eq!(ids(&before), vec![1]);
        assert_eq!(ids(&cache.read(G)), vec![1, 2]);
    }

    #[test]
    fn test_concurrent_readers_see_whole_logs() {
        let cache = Arc::new(ConversationCache::default());
        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for n in 1..=200 {
                    let snapshot: Vec<Message> = (1..=n).map(|i| msg(i, "b", "x")).collect();
                    cache.merge(G, snapshot);
                }
            })
        };

        for _ in 0..200 {
            let log = cache.read(G);
            let got = ids(&log);
            let expected: Vec<i64> = (1..=got.len() as i64).collect();
            assert_eq!(got, expected);
        }
        writer.join().unwrap();
        assert_eq!(cache.read(G).len(), 200);
    }
}
