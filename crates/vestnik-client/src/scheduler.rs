//! Recurring snapshot polls, one session per group.
//!
//! A session is a spawned task that ticks on a `tokio::time::interval` and
//! runs the fetch-and-merge cycle inline, so a slow cycle delays the next
//! tick instead of overlapping with it. Missed ticks are skipped, never
//! queued.
//!
//! Each session carries a generation number. `stop` removes the session and
//! signals its task; a fetch already in flight may still complete, but the
//! cycle re-checks its generation under the session lock before merging and
//! drops the result if the session is gone.
//!
//! A stopped task keeps draining until its in-flight fetch returns. A new
//! session for the same group waits for it before its first fetch, so a
//! group never has two fetches in flight even across a stop and restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use vestnik_net::ApiClient;
use vestnik_shared::constants::DEFAULT_POLL_INTERVAL_MS;
use vestnik_shared::{ApiError, GroupId, Message};

use crate::cache::ConversationCache;
use crate::events::{ClientEvent, EventBus};

/// Where a poll cycle gets its snapshot from.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn fetch(&self, group_id: GroupId) -> Result<Vec<Message>, ApiError>;
}

#[async_trait]
impl MessageSource for ApiClient {
    async fn fetch(&self, group_id: GroupId) -> Result<Vec<Message>, ApiError> {
        self.list_messages(group_id).await
    }
}

/// Snapshot of a group's polling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSession {
    pub group_id: GroupId,
    pub interval_ms: u64,
    pub active: bool,
}

struct SessionHandle {
    generation: u64,
    interval: Duration,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

struct Inner {
    source: Arc<dyn MessageSource>,
    cache: Arc<ConversationCache>,
    events: EventBus,
    sessions: Mutex<HashMap<GroupId, SessionHandle>>,
    /// Tasks of stopped sessions, kept until a restart waits on them.
    /// Always locked after `sessions`.
    draining: Mutex<HashMap<GroupId, JoinHandle<()>>>,
    next_generation: AtomicU64,
}

pub struct PollScheduler {
    inner: Arc<Inner>,
}

impl PollScheduler {
    pub fn new(
        source: Arc<dyn MessageSource>,
        cache: Arc<ConversationCache>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                cache,
                events,
                sessions: Mutex::new(HashMap::new()),
                draining: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Begin polling `group_id`. The first cycle runs immediately.
    ///
    /// Returns `false` if the group is already polling, in which case the
    /// existing session (and its interval) is kept. Must be called from
    /// within a Tokio runtime.
    pub fn start(&self, group_id: GroupId, interval: Duration) -> bool {
        let interval = if interval.is_zero() {
            warn!(group = %group_id, "Zero poll interval, using default");
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
        } else {
            interval
        };

        let mut sessions = self.inner.lock_sessions();
        if sessions.contains_key(&group_id) {
            debug!(group = %group_id, "Already polling");
            return false;
        }

        let previous = self
            .inner
            .lock_draining()
            .remove(&group_id)
            .filter(|task| !task.is_finished());
        if previous.is_some() {
            debug!(group = %group_id, "Waiting for the stopped session to drain");
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let (cancel, cancelled) = watch::channel(false);
        let task = tokio::spawn(run_session(
            self.inner.clone(),
            group_id,
            generation,
            interval,
            previous,
            cancelled,
        ));

        sessions.insert(
            group_id,
            SessionHandle {
                generation,
                interval,
                cancel,
                task,
            },
        );

        info!(group = %group_id, interval_ms = interval.as_millis() as u64, generation, "Polling started");
        true
    }

    /// Stop polling `group_id`. Safe when idle; returns whether a session
    /// was running.
    pub fn stop(&self, group_id: GroupId) -> bool {
        let mut sessions = self.inner.lock_sessions();
        let Some(session) = sessions.remove(&group_id) else {
            return false;
        };
        let generation = session.generation;
        self.inner.retire(group_id, session);
        drop(sessions);

        info!(group = %group_id, generation, "Polling stopped");
        true
    }

    /// Stop every other session, then make sure `group_id` is polling.
    pub fn focus(&self, group_id: GroupId, interval: Duration) -> bool {
        let others: Vec<GroupId> = self
            .active_groups()
            .into_iter()
            .filter(|g| *g != group_id)
            .collect();
        for other in others {
            self.stop(other);
        }
        self.start(group_id, interval)
    }

    pub fn stop_all(&self) {
        let mut sessions = self.inner.lock_sessions();
        for (group_id, session) in sessions.drain() {
            self.inner.retire(group_id, session);
            debug!(group = %group_id, "Polling stopped");
        }
    }

    pub fn session(&self, group_id: GroupId) -> Option<PollSession> {
        self.inner
            .lock_sessions()
            .get(&group_id)
            .map(|s| PollSession {
                group_id,
                interval_ms: s.interval.as_millis() as u64,
                active: !s.task.is_finished(),
            })
    }

    pub fn is_polling(&self, group_id: GroupId) -> bool {
        self.inner.lock_sessions().contains_key(&group_id)
    }

    /// Polling groups in ascending id order.
    pub fn active_groups(&self) -> Vec<GroupId> {
        let mut groups: Vec<GroupId> = self.inner.lock_sessions().keys().copied().collect();
        groups.sort();
        groups
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        for (_, session) in self.inner.lock_sessions().drain() {
            session.cancel();
            session.task.abort();
        }
        for (_, task) in self.inner.lock_draining().drain() {
            task.abort();
        }
    }
}

impl Inner {
    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<GroupId, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_draining(&self) -> std::sync::MutexGuard<'_, HashMap<GroupId, JoinHandle<()>>> {
        self.draining.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel a removed session and park its task until it drains. Called
    /// with the session lock held.
    fn retire(&self, group_id: GroupId, session: SessionHandle) {
        session.cancel();
        let mut draining = self.lock_draining();
        draining.retain(|_, task| !task.is_finished());
        if !session.task.is_finished() {
            draining.insert(group_id, session.task);
        }
    }

    /// One fetch-and-merge pass. Failures are logged and left for the next
    /// tick.
    async fn cycle(&self, group_id: GroupId, generation: u64) {
        let fetched = self.source.fetch(group_id).await;

        let merged = {
            let sessions = self.lock_sessions();
            if sessions.get(&group_id).map(|s| s.generation) != Some(generation) {
                debug!(group = %group_id, generation, "Discarding result of a stopped session");
                return;
            }
            fetched.map(|messages| self.cache.merge(group_id, messages))
        };

        match merged {
            Ok(result) => {
                for pair in &result.reconciled {
                    self.events.emit(ClientEvent::DeliveryConfirmed {
                        group_id,
                        placeholder: pair.placeholder,
                        server_id: pair.server_id,
                    });
                }
                if result.added > 0 || !result.reconciled.is_empty() {
                    self.events.emit(ClientEvent::ConversationUpdated {
                        group_id,
                        added: result.added,
                        version: result.version,
                    });
                }
            }
            Err(e) => {
                warn!(group = %group_id, error = %e, "Poll failed, retrying next tick");
                self.events.emit(ClientEvent::PollFailed {
                    group_id,
                    error: e.to_string(),
                });
            }
        }

        for placeholder in self.cache.expire_pending(group_id) {
            self.events.emit(ClientEvent::DeliveryFailed {
                group_id,
                placeholder,
            });
        }
    }
}

async fn run_session(
    inner: Arc<Inner>,
    group_id: GroupId,
    generation: u64,
    interval: Duration,
    previous: Option<JoinHandle<()>>,
    mut cancelled: watch::Receiver<bool>,
) {
    // Wait out the stopped session even if this one is cancelled meanwhile,
    // so the task after us can rely on both being done.
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            // Fires on an explicit stop and when the handle is dropped.
            _ = cancelled.changed() => break,
            _ = ticker.tick() => {}
        }
        if *cancelled.borrow() {
            break;
        }
        inner.cycle(group_id, generation).await;
    }

    debug!(group = %group_id, generation, "Poll session ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use serde_json::{json, Value};
    use tokio::sync::broadcast::error::TryRecvError;
    use vestnik_net::{MockTransport, Request};
    use vestnik_shared::{Identity, TransportError, UserId};

    use crate::cache::CacheConfig;

    const G: GroupId = GroupId(1);
    const TICK: Duration = Duration::from_secs(3);

    fn snapshot(texts: &[&str]) -> Value {
        let messages: Vec<Value> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                json!({
                    "id": i + 1,
                    "username": "bob",
                    "display_name": "Bob",
                    "text": text,
                    "created_at": chrono::Utc::now(),
                })
            })
            .collect();
        json!({ "messages": messages })
    }

    struct Harness {
        mock: Arc<MockTransport>,
        cache: Arc<ConversationCache>,
        events: EventBus,
        scheduler: PollScheduler,
    }

    fn harness<F>(handler: F) -> Harness
    where
        F: Fn(&Request) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        harness_with(MockTransport::new(handler), CacheConfig::default())
    }

    fn harness_with(mock: MockTransport, config: CacheConfig) -> Harness {
        let mock = Arc::new(mock);
        let cache = Arc::new(ConversationCache::new(config));
        let events = EventBus::new();
        let source: Arc<dyn MessageSource> = Arc::new(ApiClient::new(mock.clone()));
        let scheduler = PollScheduler::new(source, cache.clone(), events.clone());
        Harness {
            mock,
            cache,
            events,
            scheduler,
        }
    }

    /// Let spawned tasks run without crossing a tick boundary.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_is_immediate() {
        let h = harness(|_| Ok(snapshot(&["hi", "yo"])));
        assert!(h.scheduler.start(G, TICK));
        settle().await;

        assert_eq!(h.mock.calls_to("messages"), 1);
        assert_eq!(h.cache.read(G).len(), 2);

        tokio::time::sleep(TICK).await;
        assert_eq!(h.mock.calls_to("messages"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_responses_never_overlap() {
        let mock = MockTransport::new(|_| Ok(snapshot(&["hi"]))).with_latency(Duration::from_secs(7));
        let h = harness_with(mock, CacheConfig::default());
        h.scheduler.start(G, TICK);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.mock.peak_in_flight(), 1);
        // Cycles start at 0, 7, 14, 21 and 28: back to back, never stacked.
        assert_eq!(h.mock.calls_to("messages"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_next_tick() {
        let h = harness(|_| Ok(snapshot(&["hi"])));
        h.scheduler.start(G, TICK);
        settle().await;
        let version = h.cache.version(G);

        assert!(h.scheduler.stop(G));
        assert!(!h.scheduler.stop(G));
        tokio::time::sleep(TICK * 4).await;

        assert_eq!(h.mock.calls_to("messages"), 1);
        assert_eq!(h.cache.version(G), version);
        assert!(!h.scheduler.is_polling(G));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_result_discarded_after_stop() {
        let mock = MockTransport::new(|_| Ok(snapshot(&["late"]))).with_latency(Duration::from_secs(2));
        let h = harness_with(mock, CacheConfig::default());
        h.scheduler.start(G, TICK);

        tokio::time::sleep(Duration::from_secs(1)).await;
        h.scheduler.stop(G);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(h.mock.calls_to("messages"), 1);
        assert!(h.cache.read(G).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_waits_for_in_flight_fetch() {
        let mock = MockTransport::new(|_| Ok(snapshot(&["hi"]))).with_latency(Duration::from_secs(2));
        let h = harness_with(mock, CacheConfig::default());
        h.scheduler.start(G, TICK);

        tokio::time::sleep(Duration::from_secs(1)).await;
        h.scheduler.stop(G);
        assert!(h.scheduler.start(G, TICK));
        settle().await;
        assert_eq!(h.mock.calls_to("messages"), 1);

        // The old fetch returns at 2s; the new session fetches from 2s to 4s.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.mock.peak_in_flight(), 1);
        assert_eq!(h.mock.calls_to("messages"), 2);
        assert_eq!(h.cache.read(G).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_focus_toggles_keep_one_fetch_per_group() {
        let mock = MockTransport::new(|_| Ok(snapshot(&[]))).with_latency(Duration::from_secs(2));
        let h = harness_with(mock, CacheConfig::default());
        let (a, b) = (GroupId(1), GroupId(2));

        h.scheduler.focus(a, TICK);
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.scheduler.focus(b, TICK);
        h.scheduler.focus(a, TICK);
        h.scheduler.focus(b, TICK);
        h.scheduler.focus(a, TICK);

        tokio::time::sleep(Duration::from_secs(10)).await;
        // One fetch per group may overlap with the other group's, never more.
        assert!(h.mock.peak_in_flight() <= 2);
        assert_eq!(h.scheduler.active_groups(), vec![a]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_starts_share_one_session() {
        let h = harness(|_| Ok(snapshot(&[])));
        let scheduler = Arc::new(h.scheduler);

        let a = tokio::spawn({
            let s = scheduler.clone();
            async move { s.start(G, TICK) }
        });
        let b = tokio::spawn({
            let s = scheduler.clone();
            async move { s.start(G, TICK) }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert!(a ^ b);
        assert_eq!(scheduler.active_groups(), vec![G]);
        assert_eq!(
            scheduler.session(G),
            Some(PollSession {
                group_id: G,
                interval_ms: 3000,
                active: true
            })
        );

        settle().await;
        assert_eq!(h.mock.calls_to("messages"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_groups_poll_independently() {
        let h = harness(|_| Ok(snapshot(&[])));
        h.scheduler.start(GroupId(1), TICK);
        h.scheduler.start(GroupId(2), Duration::from_secs(5));
        assert_eq!(h.scheduler.active_groups(), vec![GroupId(1), GroupId(2)]);

        h.scheduler.stop(GroupId(1));
        assert!(h.scheduler.is_polling(GroupId(2)));
        assert_eq!(h.scheduler.session(GroupId(2)).unwrap().interval_ms, 5000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_stops_other_sessions() {
        let h = harness(|_| Ok(snapshot(&[])));
        h.scheduler.start(GroupId(1), TICK);
        h.scheduler.start(GroupId(2), TICK);

        assert!(h.scheduler.focus(GroupId(3), TICK));
        assert_eq!(h.scheduler.active_groups(), vec![GroupId(3)]);
        assert!(!h.scheduler.focus(GroupId(3), TICK));

        h.scheduler.stop_all();
        assert!(h.scheduler.active_groups().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_is_retried_next_tick() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let h = harness({
            let attempts = attempts.clone();
            move |_| {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TransportError::Timeout)
                } else {
                    Ok(snapshot(&["back"]))
                }
            }
        });
        let mut events = h.events.subscribe();

        h.scheduler.start(G, TICK);
        settle().await;
        assert!(h.cache.read(G).is_empty());
        assert!(matches!(events.try_recv(), Ok(ClientEvent::PollFailed { .. })));
        assert!(h.scheduler.is_polling(G));

        tokio::time::sleep(TICK).await;
        assert_eq!(h.cache.read(G).len(), 1);
        assert_eq!(
            events.try_recv(),
            Ok(ClientEvent::ConversationUpdated {
                group_id: G,
                added: 1,
                version: 1
            })
        );
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_while_polling_is_skipped() {
        let h = harness(|_| Ok(json!({ "error": "Group not found" })));
        let mut events = h.events.subscribe();
        h.scheduler.start(G, TICK);
        settle().await;

        assert_eq!(
            events.try_recv(),
            Ok(ClientEvent::PollFailed {
                group_id: G,
                error: "Group not found".into()
            })
        );
        assert!(h.scheduler.is_polling(G));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_send_fails_after_timeout() {
        let config = CacheConfig {
            pending_timeout: Duration::from_secs(5),
            ..CacheConfig::default()
        };
        let h = harness_with(MockTransport::new(|_| Ok(snapshot(&[]))), config);
        let me = Identity {
            id: UserId(1),
            handle: "alice".into(),
            display_name: "Alice".into(),
            is_privileged: false,
        };
        let provisional = h.cache.provisional(G, &me, "lost");
        let placeholder = provisional.id;
        h.cache.append(G, provisional);

        let mut events = h.events.subscribe();
        h.scheduler.start(G, TICK);
        tokio::time::sleep(Duration::from_secs(7)).await;

        assert_eq!(
            events.try_recv(),
            Ok(ClientEvent::DeliveryFailed {
                group_id: G,
                placeholder
            })
        );
        assert_eq!(h.cache.failed(G).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_sessions() {
        let h = harness(|_| Ok(snapshot(&[])));
        h.scheduler.start(G, TICK);
        settle().await;
        drop(h.scheduler);

        tokio::time::sleep(TICK * 3).await;
        assert_eq!(h.mock.calls_to("messages"), 1);
    }
}
