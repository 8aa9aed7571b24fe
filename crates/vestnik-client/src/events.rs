use tokio::sync::broadcast;

use vestnik_shared::{GroupId, MessageId};

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 256;

/// Notifications for presentation layers. Readers pull the current log from
/// the cache; events only say that something changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ConversationUpdated {
        group_id: GroupId,
        added: usize,
        version: u64,
    },
    DeliveryConfirmed {
        group_id: GroupId,
        placeholder: MessageId,
        server_id: MessageId,
    },
    DeliveryFailed {
        group_id: GroupId,
        placeholder: MessageId,
    },
    PollFailed {
        group_id: GroupId,
        error: String,
    },
}

impl ClientEvent {
    pub fn group_id(&self) -> GroupId {
        match self {
            ClientEvent::ConversationUpdated { group_id, .. }
            | ClientEvent::DeliveryConfirmed { group_id, .. }
            | ClientEvent::DeliveryFailed { group_id, .. }
            | ClientEvent::PollFailed { group_id, .. } => *group_id,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget; having no subscribers is fine.
    pub fn emit(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
