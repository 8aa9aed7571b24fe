//! The `ChatClient` facade.
//!
//! Owns every core component and exposes the operations a presentation
//! layer needs. Reads are pull-based (`messages`, `members`); changes are
//! announced on the event bus.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use vestnik_net::{ApiClient, HttpTransport, Transport};
use vestnik_shared::protocol::AdminDump;
use vestnik_shared::validation::{
    normalize_handle, validate_group_name, validate_message_text, validate_registration,
};
use vestnik_shared::{ApplicationError, Group, GroupId, Identity, Member, Message, MessageId};
use vestnik_store::{Database, SessionStore};

use crate::cache::{ConversationCache, LogEntry};
use crate::config::ClientConfig;
use crate::directory::MembershipDirectory;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::scheduler::{MessageSource, PollScheduler};

pub struct ChatClient {
    config: ClientConfig,
    api: ApiClient,
    session: SessionStore,
    cache: Arc<ConversationCache>,
    scheduler: PollScheduler,
    directory: MembershipDirectory,
    events: EventBus,
}

impl ChatClient {
    /// HTTP transport to `config.server_url` and a session persisted in the
    /// configured data directory.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.server_url, config.request_timeout)?;
        let session = SessionStore::open(Database::open(config.data_dir.as_deref())?)?;
        Ok(Self::with_parts(config, Arc::new(transport), session))
    }

    pub fn with_parts(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        session: SessionStore,
    ) -> Self {
        let api = ApiClient::new(transport);
        let cache = Arc::new(ConversationCache::new(config.cache_config()));
        let events = EventBus::new();
        let source: Arc<dyn MessageSource> = Arc::new(api.clone());
        let scheduler = PollScheduler::new(source, cache.clone(), events.clone());
        let directory = MembershipDirectory::new(api.clone());

        Self {
            config,
            api,
            session,
            cache,
            scheduler,
            directory,
            events,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn cache(&self) -> &ConversationCache {
        &self.cache
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    // -- Session -------------------------------------------------------------

    /// Identity persisted by a previous run, if any.
    pub fn restore_session(&self) -> Option<Identity> {
        let identity = self.session.current();
        if let Some(ref identity) = identity {
            info!(user = %identity.handle, "Resuming session");
        }
        identity
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session.current()
    }

    fn require_identity(&self) -> Result<Identity> {
        self.session.current().ok_or(ClientError::NotAuthenticated)
    }

    pub async fn register(
        &self,
        handle: &str,
        display_name: &str,
        password: &str,
    ) -> Result<Identity> {
        let input = validate_registration(handle, display_name, password)?;
        let identity = self
            .api
            .register(&input.handle, &input.display_name, &input.password)
            .await?;
        self.establish(&identity)?;
        Ok(identity)
    }

    pub async fn login(&self, handle: &str, password: &str) -> Result<Identity> {
        let handle = normalize_handle(handle);
        if handle.is_empty() || password.is_empty() {
            return Err(ApplicationError::new("Handle and password are required").into());
        }
        let identity = self.api.login(&handle, password).await?;
        self.establish(&identity)?;
        Ok(identity)
    }

    fn establish(&self, identity: &Identity) -> Result<()> {
        if let Some(previous) = self.session.current() {
            if previous.id != identity.id {
                self.reset_local_state();
            }
        }
        self.session.save(identity)?;
        info!(user = %identity.handle, privileged = identity.is_privileged, "Logged in");
        Ok(())
    }

    /// Forget the identity, stop polling and drop cached conversations.
    pub fn logout(&self) -> Result<()> {
        self.reset_local_state();
        self.session.clear()?;
        Ok(())
    }

    fn reset_local_state(&self) {
        self.scheduler.stop_all();
        self.cache.clear();
        self.directory.clear();
    }

    // -- Groups --------------------------------------------------------------

    /// Groups the current user belongs to.
    pub async fn groups(&self) -> Result<Vec<Group>> {
        let me = self.require_identity()?;
        Ok(self.api.list_groups(Some(me.id)).await?)
    }

    pub async fn create_group(&self, name: &str, description: &str) -> Result<Group> {
        let me = self.require_identity()?;
        let name = validate_group_name(name)?;
        let group = self
            .api
            .create_group(&name, description.trim(), me.id)
            .await?;
        info!(group = %group.id, name = %group.name, "Group created");
        Ok(group)
    }

    /// Join `group_id` as the current user.
    pub async fn join_group(&self, group_id: GroupId) -> Result<()> {
        let me = self.require_identity()?;
        self.directory.join(group_id, &me.as_member()).await?;
        Ok(())
    }

    /// Add another user (typically from search results) to `group_id`.
    pub async fn add_member(&self, group_id: GroupId, user: &Member) -> Result<()> {
        self.require_identity()?;
        self.directory.join(group_id, user).await?;
        Ok(())
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<Member>> {
        Ok(self.directory.search(query).await?)
    }

    pub fn members(&self, group_id: GroupId) -> Vec<Member> {
        self.directory.roster(group_id)
    }

    pub async fn refresh_members(&self, group_id: GroupId) -> Result<Vec<Member>> {
        Ok(self.directory.refresh(group_id).await?)
    }

    // -- Conversations -------------------------------------------------------

    /// Start polling `group_id` alongside any other open conversation.
    pub fn open_conversation(&self, group_id: GroupId) -> Result<bool> {
        self.require_identity()?;
        Ok(self.scheduler.start(group_id, self.config.poll_interval))
    }

    pub fn close_conversation(&self, group_id: GroupId) -> bool {
        self.scheduler.stop(group_id)
    }

    /// Poll only `group_id`, stopping every other conversation.
    pub fn focus_conversation(&self, group_id: GroupId) -> Result<bool> {
        self.require_identity()?;
        Ok(self.scheduler.focus(group_id, self.config.poll_interval))
    }

    pub fn messages(&self, group_id: GroupId) -> Vec<LogEntry> {
        self.cache.read(group_id)
    }

    /// Show the message immediately, then post it.
    ///
    /// Returns the placeholder id of the optimistic entry. When the server
    /// rejects the message or is unreachable, the entry is marked failed and
    /// the error is returned; it is only resent through
    /// [`ChatClient::retry_send`]. When the outcome is unknown (timeout or a
    /// connection dropped mid-request) the entry stays pending: the next
    /// snapshot reconciles it, or the pending timeout fails it.
    ///
    /// `DeliveryConfirmed` comes either from here or from the poll that
    /// first sees the server copy, whichever lands first.
    pub async fn send_message(&self, group_id: GroupId, text: &str) -> Result<MessageId> {
        let me = self.require_identity()?;
        let text = validate_message_text(text)?;

        let provisional = self.cache.provisional(group_id, &me, &text);
        let placeholder = provisional.id;
        self.cache.append(group_id, provisional);
        self.events.emit(ClientEvent::ConversationUpdated {
            group_id,
            added: 0,
            version: self.cache.version(group_id),
        });

        match self.api.post_message(group_id, me.id, &text).await {
            Ok(Some(server_id)) => {
                if self.cache.acknowledge(group_id, placeholder, server_id) {
                    self.events.emit(ClientEvent::DeliveryConfirmed {
                        group_id,
                        placeholder,
                        server_id,
                    });
                }
                Ok(placeholder)
            }
            // No id in the response: the next poll reconciles by content.
            Ok(None) => Ok(placeholder),
            Err(e) if e.is_ambiguous() => {
                warn!(group = %group_id, placeholder = %placeholder, error = %e, "Send outcome unknown, awaiting snapshot");
                Ok(placeholder)
            }
            Err(e) => {
                warn!(group = %group_id, placeholder = %placeholder, error = %e, "Send failed");
                self.cache.mark_failed(group_id, placeholder);
                self.events.emit(ClientEvent::DeliveryFailed {
                    group_id,
                    placeholder,
                });
                Err(e.into())
            }
        }
    }

    /// Resend a failed message on explicit user request. The failed entry is
    /// replaced by a fresh pending one whose placeholder is returned.
    pub async fn retry_send(&self, group_id: GroupId, placeholder: MessageId) -> Result<MessageId> {
        self.require_identity()?;
        let failed = self.discard_failed(group_id, placeholder)?;
        info!(group = %group_id, placeholder = %placeholder, "Retrying send");
        self.send_message(group_id, &failed.text).await
    }

    /// Drop a failed message without resending it.
    pub fn discard_failed(&self, group_id: GroupId, placeholder: MessageId) -> Result<Message> {
        let is_failed = self
            .cache
            .failed(group_id)
            .iter()
            .any(|m| m.id == placeholder);
        if !is_failed {
            return Err(ClientError::UnknownMessage(placeholder));
        }
        self.cache
            .discard(group_id, placeholder)
            .ok_or(ClientError::UnknownMessage(placeholder))
    }

    /// Failed messages awaiting a retry or discard.
    pub fn failed_messages(&self, group_id: GroupId) -> Vec<Message> {
        self.cache.failed(group_id)
    }

    // -- Admin ---------------------------------------------------------------

    pub async fn admin_dump(&self) -> Result<AdminDump> {
        let me = self.require_identity()?;
        if !me.is_privileged {
            return Err(ClientError::Forbidden("admin access required".into()));
        }
        Ok(self.api.admin_dump(me.id).await?)
    }
}
