//! End-to-end lifecycle tests over an in-memory store and a live dispatcher.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use vesper_core::{Actor, ChatService, CoreError, MessageService, Sweeper};
use vesper_db::Database;
use vesper_gateway::dispatcher::Dispatcher;
use vesper_types::events::ChatEvent;

struct Harness {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    messages: MessageService,
    chats: ChatService,
    sweeper: Sweeper,
    alice: Uuid,
    bob: Uuid,
}

fn harness() -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let dispatcher = Dispatcher::new();
    let messages = MessageService::new(db.clone(), dispatcher.clone());
    let chats = ChatService::new(db.clone(), dispatcher.clone());
    let sweeper = Sweeper::new(db.clone(), messages.clone(), chats.clone());

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    db.create_user(&alice.to_string(), "alice", "hash", 0).unwrap();
    db.create_user(&bob.to_string(), "bob", "hash", 0).unwrap();

    Harness {
        db,
        dispatcher,
        messages,
        chats,
        sweeper,
        alice,
        bob,
    }
}

fn drain(rx: &mut UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn send(h: &Harness, message_id: &str) -> vesper_db::models::MessageRow {
    h.messages
        .send(h.alice, h.bob, None, b"ct".to_vec(), b"iv".to_vec(), message_id)
        .unwrap()
}

#[test]
fn send_auto_creates_chat_and_notifies_recipient() {
    let h = harness();
    let (_conn, mut rx) = h.dispatcher.register(h.bob);

    let row = send(&h, "m-1");

    let chat = h.db.get_chat(&row.chat_id).unwrap().expect("chat created");
    assert_eq!(chat.last_message_id.as_deref(), Some(row.id.as_str()));
    assert!(chat.participant_ids().contains(&h.alice.to_string().as_str()));
    assert!(chat.participant_ids().contains(&h.bob.to_string().as_str()));

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        ChatEvent::NewMessage { message_id, sender_id, .. }
            if message_id == "m-1" && *sender_id == h.alice
    ));
}

#[test]
fn send_rejects_unknown_recipient() {
    let h = harness();
    let err = h
        .messages
        .send(h.alice, Uuid::new_v4(), None, b"ct".to_vec(), b"iv".to_vec(), "m-1")
        .unwrap_err();
    assert!(matches!(err, CoreError::RecipientNotFound));
}

#[test]
fn explicit_chat_requires_membership() {
    let h = harness();
    let carol = Uuid::new_v4();
    h.db.create_user(&carol.to_string(), "carol", "hash", 0).unwrap();
    let chat = h.chats.find_or_create(&[h.alice, h.bob]).unwrap();

    let err = h
        .messages
        .send(
            carol,
            h.bob,
            Some(chat.id.parse().unwrap()),
            b"ct".to_vec(),
            b"iv".to_vec(),
            "m-1",
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::ChatAccessDenied));
}

#[test]
fn local_then_remote_delete_scenario() {
    let h = harness();
    let row = send(&h, "m-1");
    let chat_id: Uuid = row.chat_id.parse().unwrap();

    // B deletes locally: hidden from B, still visible to A
    h.messages.delete_local("m-1", h.bob).unwrap();
    let for_bob = h.messages.list_for_chat(chat_id, h.bob, None, None).unwrap();
    assert!(for_bob.messages.is_empty());
    let for_alice = h.messages.list_for_chat(chat_id, h.alice, None, None).unwrap();
    assert_eq!(for_alice.messages.len(), 1);

    // A deletes remotely: excluded for both
    h.messages.delete_remote("m-1", Actor::User(h.alice)).unwrap();
    assert!(h.messages.list_for_chat(chat_id, h.alice, None, None).unwrap().messages.is_empty());
    assert!(h.messages.list_for_chat(chat_id, h.bob, None, None).unwrap().messages.is_empty());

    let stored = h.db.get_message("m-1").unwrap().unwrap();
    assert!(stored.is_deleted_for_sender && stored.is_deleted_for_recipient);
    assert!(stored.is_deleted_remotely);
}

#[test]
fn remote_delete_is_sender_only() {
    let h = harness();
    send(&h, "m-1");
    let err = h.messages.delete_remote("m-1", Actor::User(h.bob)).unwrap_err();
    assert!(matches!(err, CoreError::NotAuthorized));
}

#[test]
fn delete_local_rejects_outsiders() {
    let h = harness();
    send(&h, "m-1");
    let err = h.messages.delete_local("m-1", Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, CoreError::NotAuthorized));
}

#[test]
fn repeated_remote_delete_is_quiet() {
    let h = harness();
    let row = send(&h, "m-1");
    let (conn, mut rx) = h.dispatcher.register(h.bob);
    h.dispatcher.subscribe_chats(conn, vec![row.chat_id.parse().unwrap()]);

    h.messages.delete_remote("m-1", Actor::System).unwrap();
    assert_eq!(drain(&mut rx).len(), 1);

    // Second application converges without a second event
    h.messages.delete_remote("m-1", Actor::System).unwrap();
    assert!(drain(&mut rx).is_empty());

    // An explicit user call on a purged message IS an error
    let err = h.messages.delete_remote("m-1", Actor::User(h.alice)).unwrap_err();
    assert!(matches!(err, CoreError::NotFound));
}

#[test]
fn concurrent_find_or_create_yields_one_chat() {
    let h = harness();
    let (alice, bob) = (h.alice, h.bob);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let chats = h.chats.clone();
            std::thread::spawn(move || chats.find_or_create(&[alice, bob]).unwrap().id)
        })
        .collect();

    let ids: Vec<String> = handles.into_iter().map(|j| j.join().unwrap()).collect();
    assert!(ids.iter().all(|id| *id == ids[0]));

    let listed = h.chats.list_for_user(alice).unwrap();
    assert_eq!(listed.len(), 1);
}

#[test]
fn participant_order_does_not_matter() {
    let h = harness();
    let a = h.chats.find_or_create(&[h.alice, h.bob]).unwrap();
    let b = h.chats.find_or_create(&[h.bob, h.alice]).unwrap();
    assert_eq!(a.id, b.id);
}

#[test]
fn find_or_create_needs_two_distinct_participants() {
    let h = harness();
    let err = h.chats.find_or_create(&[h.alice, h.alice]).unwrap_err();
    assert!(matches!(err, CoreError::InvalidParticipants));
}

#[test]
fn list_marks_read_exactly_once() {
    let h = harness();
    let row = send(&h, "m-1");
    let chat_id: Uuid = row.chat_id.parse().unwrap();
    let (_conn, mut rx) = h.dispatcher.register(h.alice);

    // First fetch by the recipient marks the message read and receipts A
    let page = h.messages.list_for_chat(chat_id, h.bob, None, None).unwrap();
    assert_eq!(page.newly_read, vec!["m-1".to_string()]);
    assert_eq!(page.messages[0].delivery_state, 2);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], ChatEvent::MessageRead { message_id, .. } if message_id == "m-1"));

    // Immediate re-fetch: nothing newly read, no duplicate receipt
    let page = h.messages.list_for_chat(chat_id, h.bob, None, None).unwrap();
    assert!(page.newly_read.is_empty());
    assert!(drain(&mut rx).is_empty());

    // The sender fetching never marks anything
    let page = h.messages.list_for_chat(chat_id, h.alice, None, None).unwrap();
    assert!(page.newly_read.is_empty());
}

#[test]
fn delivery_state_never_regresses() {
    let h = harness();
    send(&h, "m-1");

    assert!(h.messages.mark_read("m-1", h.bob).unwrap());
    // Delivered after read is a no-op, not a regression
    assert!(!h.messages.mark_delivered("m-1", h.bob).unwrap());
    assert_eq!(h.db.get_message("m-1").unwrap().unwrap().delivery_state, 2);

    let err = h.messages.mark_read("m-1", h.alice).unwrap_err();
    assert!(matches!(err, CoreError::NotAuthorized));
}

#[test]
fn auto_delete_recomputes_and_clears_schedule() {
    let h = harness();
    send(&h, "m-1");

    let err = h.messages.set_auto_delete("m-1", h.bob, Some(60)).unwrap_err();
    assert!(matches!(err, CoreError::NotAuthorized));

    h.messages.set_auto_delete("m-1", h.alice, Some(60)).unwrap();
    let row = h.db.get_message("m-1").unwrap().unwrap();
    assert_eq!(row.ttl_seconds, Some(60));
    let scheduled = row.scheduled_deletion_at.expect("schedule set");
    assert_eq!(scheduled, row.updated_at + 60_000);

    h.messages.set_auto_delete("m-1", h.alice, None).unwrap();
    let row = h.db.get_message("m-1").unwrap().unwrap();
    assert_eq!(row.ttl_seconds, None);
    assert_eq!(row.scheduled_deletion_at, None);
}

#[test]
fn sweep_purges_only_past_schedule() {
    let h = harness();
    let row = send(&h, "m-1");
    let chat_id: Uuid = row.chat_id.parse().unwrap();
    h.messages.set_auto_delete("m-1", h.alice, Some(60)).unwrap();
    let scheduled = h
        .db
        .get_message("m-1")
        .unwrap()
        .unwrap()
        .scheduled_deletion_at
        .unwrap();

    let (conn, mut rx) = h.dispatcher.register(h.bob);
    h.dispatcher.subscribe_chats(conn, vec![chat_id]);

    // Half-way through the window: untouched
    let stats = h.sweeper.sweep_once(scheduled - 30_000);
    assert_eq!(stats.messages_purged, 0);
    assert!(drain(&mut rx).is_empty());

    // Past the window: purged, one event on the chat channel
    let stats = h.sweeper.sweep_once(scheduled + 1_000);
    assert_eq!(stats.messages_purged, 1);
    assert_eq!(stats.failures, 0);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        ChatEvent::MessageDeletedRemotely { message_id, .. } if message_id == "m-1"
    ));

    assert!(h.messages.list_for_chat(chat_id, h.bob, None, None).unwrap().messages.is_empty());

    // Re-sweeping finds nothing new
    let stats = h.sweeper.sweep_once(scheduled + 2_000);
    assert_eq!(stats.messages_purged, 0);
}

#[test]
fn sweep_cascades_idle_chats() {
    let h = harness();
    let row = send(&h, "m-1");
    send(&h, "m-2");
    let chat_id: Uuid = row.chat_id.parse().unwrap();
    h.chats.set_auto_delete_policy(chat_id, h.alice, Some(3600)).unwrap();
    let chat = h.db.get_chat(&row.chat_id).unwrap().unwrap();

    let (conn, mut rx) = h.dispatcher.register(h.bob);
    h.dispatcher.subscribe_chats(conn, vec![chat_id]);

    // Just under the window: chat survives
    let stats = h.sweeper.sweep_once(chat.last_activity_at + 3_599_000);
    assert_eq!(stats.chats_deleted, 0);

    // Past it: zero messages, zero chat record, one event
    let stats = h.sweeper.sweep_once(chat.last_activity_at + 3_601_000);
    assert_eq!(stats.chats_deleted, 1);
    assert_eq!(stats.failures, 0);
    assert!(h.db.get_chat(&row.chat_id).unwrap().is_none());
    assert_eq!(h.db.count_chat_messages(&row.chat_id).unwrap(), 0);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        ChatEvent::ChatDeletedRemotely { chat_id: id } if *id == chat_id
    ));
}

#[test]
fn chat_policy_stamps_messages_at_send_time() {
    let h = harness();
    let chat = h.chats.find_or_create(&[h.alice, h.bob]).unwrap();
    let chat_id: Uuid = chat.id.parse().unwrap();
    h.chats.set_auto_delete_policy(chat_id, h.alice, Some(120)).unwrap();

    let row = h
        .messages
        .send(h.alice, h.bob, Some(chat_id), b"ct".to_vec(), b"iv".to_vec(), "m-1")
        .unwrap();
    assert_eq!(row.ttl_seconds, Some(120));
    assert_eq!(row.scheduled_deletion_at, Some(row.created_at + 120_000));

    // Clearing the policy does not retroactively touch the schedule
    h.chats.set_auto_delete_policy(chat_id, h.bob, None).unwrap();
    let stored = h.db.get_message("m-1").unwrap().unwrap();
    assert_eq!(stored.scheduled_deletion_at, row.scheduled_deletion_at);
}

#[test]
fn remote_delete_repoints_last_message() {
    let h = harness();
    let first = send(&h, "m-1");
    let second = send(&h, "m-2");
    // Distinct created_at so "newest" is unambiguous
    h.db.with_conn_mut(|conn| {
        conn.execute(
            "UPDATE messages SET created_at = created_at + 1000 WHERE message_id = 'm-2'",
            [],
        )?;
        Ok(())
    })
    .unwrap();

    h.messages.delete_remote("m-2", Actor::User(h.alice)).unwrap();

    let chat = h.db.get_chat(&second.chat_id).unwrap().unwrap();
    assert_eq!(chat.last_message_id.as_deref(), Some(first.id.as_str()));

    h.messages.delete_remote("m-1", Actor::User(h.alice)).unwrap();
    let chat = h.db.get_chat(&first.chat_id).unwrap().unwrap();
    assert_eq!(chat.last_message_id, None);
}

#[test]
fn chat_local_delete_flags_only_own_messages() {
    let h = harness();
    let row = send(&h, "m-1");
    let chat_id: Uuid = row.chat_id.parse().unwrap();
    h.messages
        .send(h.bob, h.alice, Some(chat_id), b"ct".to_vec(), b"iv".to_vec(), "m-2")
        .unwrap();

    let flagged = h.chats.delete_local_for_user(chat_id, h.alice).unwrap();
    assert_eq!(flagged, 1);

    // Alice no longer sees her own message; Bob's reply is untouched
    let page = h.messages.list_for_chat(chat_id, h.alice, None, None).unwrap();
    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.messages[0].message_id, "m-2");

    // Nothing left to flag on a second call
    let err = h.chats.delete_local_for_user(chat_id, h.alice).unwrap_err();
    assert!(matches!(err, CoreError::NotFound));
}

#[test]
fn full_delete_requires_participant() {
    let h = harness();
    let row = send(&h, "m-1");
    let chat_id: Uuid = row.chat_id.parse().unwrap();

    let err = h.chats.delete_full(chat_id, Actor::User(Uuid::new_v4())).unwrap_err();
    assert!(matches!(err, CoreError::NotAuthorized));

    h.chats.delete_full(chat_id, Actor::User(h.bob)).unwrap();
    assert!(h.db.get_chat(&row.chat_id).unwrap().is_none());
    assert_eq!(h.db.count_chat_messages(&row.chat_id).unwrap(), 0);
}

#[test]
fn since_filter_and_limit() {
    let h = harness();
    let first = send(&h, "m-1");
    send(&h, "m-2");
    h.db.with_conn_mut(|conn| {
        conn.execute(
            "UPDATE messages SET created_at = created_at + 1000 WHERE message_id = 'm-2'",
            [],
        )?;
        Ok(())
    })
    .unwrap();
    let chat_id: Uuid = first.chat_id.parse().unwrap();

    let page = h
        .messages
        .list_for_chat(chat_id, h.alice, Some(first.created_at), None)
        .unwrap();
    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.messages[0].message_id, "m-2");

    let page = h.messages.list_for_chat(chat_id, h.alice, None, Some(1)).unwrap();
    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.messages[0].message_id, "m-1");
}
