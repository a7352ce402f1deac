//! Chat Lifecycle Manager.

use std::sync::Arc;

use uuid::Uuid;

use vesper_db::Database;
use vesper_db::models::ChatRow;
use vesper_gateway::dispatcher::{Channel, Dispatcher};
use vesper_types::events::ChatEvent;

use crate::error::{CoreError, CoreResult};
use crate::{Actor, now_ms, parse_id};

#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl ChatService {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self { db, dispatcher }
    }

    /// Resolve or create the chat for a participant set. The set is
    /// canonicalized (sorted, deduplicated) into a unique key; concurrent
    /// calls with the same set converge on a single persisted chat.
    pub fn find_or_create(&self, participants: &[Uuid]) -> CoreResult<ChatRow> {
        let mut ids: Vec<String> = participants.iter().map(|p| p.to_string()).collect();
        ids.sort();
        ids.dedup();
        if ids.len() < 2 {
            return Err(CoreError::InvalidParticipants);
        }

        let participant_key = ids.join(":");
        let candidate_id = Uuid::new_v4().to_string();
        let chat = self
            .db
            .find_or_create_chat(&candidate_id, &participant_key, &ids, now_ms())?;
        Ok(chat)
    }

    /// Participant-only single-chat lookup.
    pub fn get(&self, chat_id: Uuid, actor: Uuid) -> CoreResult<ChatRow> {
        let chat = self
            .db
            .get_chat(&chat_id.to_string())?
            .ok_or(CoreError::NotFound)?;
        if !self
            .db
            .is_chat_participant(&chat.id, &actor.to_string())?
        {
            return Err(CoreError::NotAuthorized);
        }
        Ok(chat)
    }

    /// The user's chats, most recently updated first.
    pub fn list_for_user(&self, user_id: Uuid) -> CoreResult<Vec<ChatRow>> {
        Ok(self.db.list_chats_for_user(&user_id.to_string())?)
    }

    /// Chat-scope local delete: flags every message the actor sent in the
    /// chat as deleted-for-sender. `NotFound` when there was nothing to flag.
    pub fn delete_local_for_user(&self, chat_id: Uuid, actor: Uuid) -> CoreResult<usize> {
        let flagged = self.db.mark_chat_deleted_for_sender(
            &chat_id.to_string(),
            &actor.to_string(),
            now_ms(),
        )?;
        if flagged == 0 {
            return Err(CoreError::NotFound);
        }
        Ok(flagged)
    }

    /// Cascade deletion: purge every message, then remove the chat record —
    /// in that order, so a crash mid-cascade leaves an orphaned chat the
    /// next sweep re-selects, never dangling messages. Users must be
    /// participants; the sweeper drives this with `Actor::System`.
    pub fn delete_full(&self, chat_id: Uuid, actor: Actor) -> CoreResult<()> {
        let chat = self
            .db
            .get_chat(&chat_id.to_string())?
            .ok_or(CoreError::NotFound)?;

        if let Actor::User(user) = actor {
            if !chat.participant_ids().contains(&user.to_string().as_str()) {
                return Err(CoreError::NotAuthorized);
            }
        }

        let participants: Vec<Uuid> = chat.participant_ids().iter().map(|p| parse_id(p)).collect();

        self.db.delete_chat_cascade(&chat.id)?;

        let mut targets = vec![Channel::Chat(chat_id)];
        targets.extend(participants.into_iter().map(Channel::User));
        self.dispatcher
            .publish(ChatEvent::ChatDeletedRemotely { chat_id }, &targets);
        Ok(())
    }

    /// Set or clear the chat-wide auto-delete policy. Applies to future
    /// messages at send time; already-scheduled per-message TTLs are left
    /// untouched.
    pub fn set_auto_delete_policy(
        &self,
        chat_id: Uuid,
        actor: Uuid,
        seconds: Option<i64>,
    ) -> CoreResult<()> {
        let chat = self
            .db
            .get_chat(&chat_id.to_string())?
            .ok_or(CoreError::NotFound)?;
        if !chat.participant_ids().contains(&actor.to_string().as_str()) {
            return Err(CoreError::NotAuthorized);
        }

        let seconds = seconds.filter(|s| *s > 0);
        self.db.set_chat_auto_delete(&chat.id, seconds, now_ms())?;
        Ok(())
    }
}
