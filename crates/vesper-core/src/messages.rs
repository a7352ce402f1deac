//! Message Lifecycle Manager.
//!
//! Owns message creation, delivery-state marking, and per-message deletion.
//! Every state-changing write goes through the record store's conditional
//! updates, so user actions and the expiry sweeper can race without
//! clobbering each other; events are only emitted when a write actually
//! changed something.

use std::sync::Arc;

use uuid::Uuid;

use vesper_db::Database;
use vesper_db::models::MessageRow;
use vesper_gateway::dispatcher::{Channel, Dispatcher};
use vesper_types::events::ChatEvent;

use crate::chats::ChatService;
use crate::deletion::DeletionFlags;
use crate::error::{CoreError, CoreResult};
use crate::{Actor, now_ms, parse_id};

pub const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Monotonic delivery progression: sent -> delivered -> read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeliveryState {
    Sent = 0,
    Delivered = 1,
    Read = 2,
}

impl DeliveryState {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Result of a chat fetch: the visible page plus the ids this fetch just
/// marked as read, so the read side effect is observable by callers instead
/// of implied by timing.
pub struct ChatPage {
    pub messages: Vec<MessageRow>,
    pub newly_read: Vec<String>,
}

#[derive(Clone)]
pub struct MessageService {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    chats: ChatService,
}

impl MessageService {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        let chats = ChatService::new(db.clone(), dispatcher.clone());
        Self {
            db,
            dispatcher,
            chats,
        }
    }

    /// Send a message. Without an explicit chat the 2-party chat for
    /// (sender, recipient) is resolved or created; with one, the sender must
    /// be a participant. The chat's auto-delete policy stamps the message's
    /// TTL unless the message later overrides it.
    pub fn send(
        &self,
        sender: Uuid,
        recipient: Uuid,
        chat_ref: Option<Uuid>,
        ciphertext: Vec<u8>,
        iv: Vec<u8>,
        client_message_id: &str,
    ) -> CoreResult<MessageRow> {
        if self.db.get_user_by_id(&recipient.to_string())?.is_none() {
            return Err(CoreError::RecipientNotFound);
        }

        let chat = match chat_ref {
            Some(chat_id) => {
                let chat = self
                    .db
                    .get_chat(&chat_id.to_string())?
                    .ok_or(CoreError::NotFound)?;
                if !chat.participant_ids().contains(&sender.to_string().as_str()) {
                    return Err(CoreError::ChatAccessDenied);
                }
                chat
            }
            None => self.chats.find_or_create(&[sender, recipient])?,
        };

        let now = now_ms();
        let record_id = Uuid::new_v4().to_string();

        // Chat-wide auto-delete policy applies at send time
        let ttl_seconds = chat.auto_delete_seconds;
        let scheduled_deletion_at = ttl_seconds.map(|s| now + s * 1000);

        self.db.insert_message(
            &record_id,
            client_message_id,
            &chat.id,
            &sender.to_string(),
            &recipient.to_string(),
            &ciphertext,
            &iv,
            ttl_seconds,
            scheduled_deletion_at,
            now,
        )?;

        self.db.touch_chat_activity(&chat.id, &record_id, now)?;

        self.dispatcher.publish(
            ChatEvent::NewMessage {
                message_id: client_message_id.to_string(),
                chat_id: parse_id(&chat.id),
                sender_id: sender,
            },
            &[Channel::User(recipient)],
        );

        Ok(MessageRow {
            id: record_id,
            message_id: client_message_id.to_string(),
            chat_id: chat.id,
            sender_id: sender.to_string(),
            recipient_id: recipient.to_string(),
            ciphertext,
            iv,
            delivery_state: DeliveryState::Sent.as_i64(),
            is_deleted_for_sender: false,
            is_deleted_for_recipient: false,
            is_deleted_remotely: false,
            ttl_seconds,
            scheduled_deletion_at,
            created_at: now,
            updated_at: now,
        })
    }

    /// Recipient-only, monotonic. Returns whether the state advanced.
    pub fn mark_delivered(&self, message_id: &str, actor: Uuid) -> CoreResult<bool> {
        let row = self.visible_message(message_id)?;
        if row.recipient_id != actor.to_string() {
            return Err(CoreError::NotAuthorized);
        }
        let changed =
            self.db
                .advance_delivery(message_id, DeliveryState::Delivered.as_i64(), now_ms())?;
        Ok(changed)
    }

    /// Recipient-only, monotonic. Emits a read receipt to the sender when
    /// the state actually advanced.
    pub fn mark_read(&self, message_id: &str, actor: Uuid) -> CoreResult<bool> {
        let row = self.visible_message(message_id)?;
        if row.recipient_id != actor.to_string() {
            return Err(CoreError::NotAuthorized);
        }
        let changed = self
            .db
            .advance_delivery(message_id, DeliveryState::Read.as_i64(), now_ms())?;
        if changed {
            self.publish_read(&row);
        }
        Ok(changed)
    }

    /// Delete for whichever side the actor occupies. Idempotent; no event.
    pub fn delete_local(&self, message_id: &str, actor: Uuid) -> CoreResult<()> {
        let row = self.visible_message(message_id)?;
        let actor = actor.to_string();
        let now = now_ms();
        if actor == row.sender_id {
            self.db.mark_deleted_for_sender(message_id, now)?;
        } else if actor == row.recipient_id {
            self.db.mark_deleted_for_recipient(message_id, now)?;
        } else {
            return Err(CoreError::NotAuthorized);
        }
        Ok(())
    }

    /// Logical purge: sender-only for users; the sweeper invokes it with
    /// `Actor::System`, for which an already-purged message is a no-op
    /// rather than an error.
    pub fn delete_remote(&self, message_id: &str, actor: Actor) -> CoreResult<()> {
        let row = self
            .db
            .get_message(message_id)?
            .ok_or(CoreError::NotFound)?;

        if flags_of(&row).is_purged() {
            return match actor {
                Actor::System => Ok(()),
                Actor::User(_) => Err(CoreError::NotFound),
            };
        }

        if let Actor::User(user) = actor {
            if row.sender_id != user.to_string() {
                return Err(CoreError::NotAuthorized);
            }
        }

        let now = now_ms();
        let changed = self.db.mark_deleted_remotely(message_id, now)?;
        if changed {
            // The chat must never reference a purged message
            self.db.repoint_last_message(&row.chat_id, now)?;

            let event = ChatEvent::MessageDeletedRemotely {
                message_id: row.message_id.clone(),
                chat_id: parse_id(&row.chat_id),
            };
            let target = match actor {
                Actor::User(_) => Channel::User(parse_id(&row.recipient_id)),
                Actor::System => Channel::Chat(parse_id(&row.chat_id)),
            };
            self.dispatcher.publish(event, &[target]);
        }
        Ok(())
    }

    /// Sender-only. Recomputes the scheduled deletion from now; a missing or
    /// non-positive `seconds` clears the timer.
    pub fn set_auto_delete(
        &self,
        message_id: &str,
        actor: Uuid,
        seconds: Option<i64>,
    ) -> CoreResult<()> {
        let row = self.visible_message(message_id)?;
        if row.sender_id != actor.to_string() {
            return Err(CoreError::NotAuthorized);
        }

        let now = now_ms();
        let ttl = seconds.filter(|s| *s > 0);
        let scheduled = ttl.map(|s| now + s * 1000);
        self.db.set_message_ttl(message_id, ttl, scheduled, now)?;

        self.dispatcher.publish(
            ChatEvent::MessageAutoDeleteSet {
                message_id: row.message_id.clone(),
                chat_id: parse_id(&row.chat_id),
                ttl,
            },
            &[Channel::User(parse_id(&row.recipient_id))],
        );
        Ok(())
    }

    /// Fetch the messages visible to `actor`, ascending by creation time.
    ///
    /// Side effect, made explicit in the return value: unread messages
    /// addressed to the actor are marked read and a read receipt goes to
    /// each sender. The advance is conditional, so an immediate re-fetch
    /// reads them back as already read and emits nothing.
    pub fn list_for_chat(
        &self,
        chat_id: Uuid,
        actor: Uuid,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> CoreResult<ChatPage> {
        let chat_id = chat_id.to_string();
        if self.db.get_chat(&chat_id)?.is_none() {
            return Err(CoreError::NotFound);
        }
        if !self.db.is_chat_participant(&chat_id, &actor.to_string())? {
            return Err(CoreError::ChatAccessDenied);
        }

        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        let mut rows = self
            .db
            .list_chat_messages(&chat_id, &actor.to_string(), since, limit)?;

        let mut newly_read = Vec::new();
        let now = now_ms();
        for row in rows.iter_mut() {
            if row.recipient_id != actor.to_string()
                || row.delivery_state >= DeliveryState::Read.as_i64()
            {
                continue;
            }
            if self
                .db
                .advance_delivery(&row.message_id, DeliveryState::Read.as_i64(), now)?
            {
                row.delivery_state = DeliveryState::Read.as_i64();
                row.updated_at = now;
                newly_read.push(row.message_id.clone());
                self.publish_read(row);
            }
        }

        Ok(ChatPage {
            messages: rows,
            newly_read,
        })
    }

    /// Fetch a message, treating purged ones as absent.
    fn visible_message(&self, message_id: &str) -> CoreResult<MessageRow> {
        let row = self
            .db
            .get_message(message_id)?
            .ok_or(CoreError::NotFound)?;
        if flags_of(&row).is_purged() {
            return Err(CoreError::NotFound);
        }
        Ok(row)
    }

    fn publish_read(&self, row: &MessageRow) {
        self.dispatcher.publish(
            ChatEvent::MessageRead {
                message_id: row.message_id.clone(),
                chat_id: parse_id(&row.chat_id),
            },
            &[Channel::User(parse_id(&row.sender_id))],
        );
    }
}

fn flags_of(row: &MessageRow) -> DeletionFlags {
    DeletionFlags {
        for_sender: row.is_deleted_for_sender,
        for_recipient: row.is_deleted_for_recipient,
        remote: row.is_deleted_remotely,
    }
}
