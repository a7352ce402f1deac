use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use uuid::Uuid;

use vesper_types::events::ChatEvent;

/// A fan-out target: either a user's private channel or a chat channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    User(Uuid),
    Chat(Uuid),
}

struct Subscriber {
    user_id: Uuid,
    chat_ids: HashSet<Uuid>,
    tx: mpsc::UnboundedSender<ChatEvent>,
}

impl Subscriber {
    fn listens_to(&self, channel: &Channel) -> bool {
        match channel {
            Channel::User(id) => self.user_id == *id,
            Channel::Chat(id) => self.chat_ids.contains(id),
        }
    }
}

/// Routes lifecycle events to connected clients.
///
/// Delivery contract: at-most-once, best-effort. An event published to a
/// channel with no connected subscriber is dropped — there is no queue and
/// no retry. Clients reconcile missed events by re-fetching the chat.
///
/// The dispatcher is an explicit dependency handed to each service at
/// construction; nothing in the codebase reaches for a process-wide hub.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<RwLock<HashMap<Uuid, Subscriber>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a connection for `user_id`. The user channel is active
    /// immediately; chat channels require an explicit subscribe.
    pub fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<ChatEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .write()
            .expect("dispatcher lock poisoned")
            .insert(
                conn_id,
                Subscriber {
                    user_id,
                    chat_ids: HashSet::new(),
                    tx,
                },
            );
        (conn_id, rx)
    }

    /// Replace the connection's chat subscriptions.
    pub fn subscribe_chats(&self, conn_id: Uuid, chat_ids: Vec<Uuid>) {
        if let Some(sub) = self
            .inner
            .write()
            .expect("dispatcher lock poisoned")
            .get_mut(&conn_id)
        {
            sub.chat_ids = chat_ids.into_iter().collect();
        }
    }

    pub fn unregister(&self, conn_id: Uuid) {
        self.inner
            .write()
            .expect("dispatcher lock poisoned")
            .remove(&conn_id);
    }

    /// Publish `event` to every connection listening on any of `targets`.
    /// A connection matching several targets still receives the event once.
    pub fn publish(&self, event: ChatEvent, targets: &[Channel]) {
        let subs = self.inner.read().expect("dispatcher lock poisoned");
        for sub in subs.values() {
            if targets.iter().any(|t| sub.listens_to(t)) {
                // Fire-and-forget: a closed receiver means the connection is
                // going away and will be unregistered by its own task.
                let _ = sub.tx.send(event.clone());
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
