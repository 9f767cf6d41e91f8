use meshlink_encoding::types::{ContactKind, KeyPrefix, PublicKey};

use crate::entity::{MessageDirection, SessionRole};
use crate::event::Event;
use crate::test_util::*;

#[tokio::test(start_paused = true)]
async fn drain_with_mixed_frames() {
    let mut h = setup();
    h.connect_ready().await;
    let known = h.seed_contact(ContactKind::Chat, 0).await;
    let channel = h.seed_channel(0, "public").await;
    let unknown_prefix = KeyPrefix::new([9, 9, 9, 9, 9, 9]);

    h.handle.push(messages_waiting_push());

    let frame = h.handle.next_write().await;
    assert_eq!(frame, vec![0x0A], "expected SYNC_NEXT_MESSAGE");
    h.handle.respond(contact_msg_v3_frame(&known.prefix(), 0, 1_700_000_000, b"from a friend"));

    assert_eq!(h.handle.next_write().await, vec![0x0A]);
    h.handle.respond(channel_msg_v3_frame(0, 1_700_000_001, "on the air"));

    assert_eq!(h.handle.next_write().await, vec![0x0A]);
    h.handle.respond(contact_msg_v3_frame(&unknown_prefix, 0, 1_700_000_002, b"who dis"));

    assert_eq!(h.handle.next_write().await, vec![0x0A]);
    h.handle.respond(no_more_messages_frame());

    // drain finished: two rows persisted, one unknown-sender notification.
    // The unknown frame is processed last, so seeing its event means the
    // whole queue went through.
    let mut events = Vec::new();
    loop {
        events.extend(h.drain_events());
        if events
            .iter()
            .any(|e| matches!(e, Event::UnknownSender { prefix } if *prefix == unknown_prefix))
        {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(h.store.message_count(), 2);
    assert!(events.iter().any(|e| matches!(e, Event::DirectMessage { .. })));
    assert!(events.iter().any(|e| matches!(e, Event::ChannelMessage { .. })));

    let direct =
        h.store.messages_for_contact_sync(known.id).into_iter().next().expect("direct row");
    assert_eq!(direct.direction, MessageDirection::In);
    assert_eq!(direct.text, "from a friend");
    assert_eq!(direct.path_len, Some(1));

    assert_eq!(h.store.contact(known.id).unwrap().unread_count, 1);
    assert_eq!(h.store.channel_unread(channel.id), 1);
    assert!(h.handle.try_next_write().is_none(), "drain terminated");
}

#[tokio::test(start_paused = true)]
async fn empty_queue_drains_cleanly() {
    let mut h = setup();
    h.connect_ready().await;

    h.handle.push(messages_waiting_push());
    assert_eq!(h.handle.next_write().await, vec![0x0A]);
    h.handle.respond(no_more_messages_frame());

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert_eq!(h.store.message_count(), 0);
    assert!(h.handle.try_next_write().is_none());
}

#[tokio::test(start_paused = true)]
async fn waiting_pushes_mid_drain_are_absorbed() {
    let mut h = setup();
    h.connect_ready().await;

    h.handle.push(messages_waiting_push());
    assert_eq!(h.handle.next_write().await, vec![0x0A]);

    // more pushes land while the drain is mid-flight
    h.handle.push(messages_waiting_push());
    h.handle.push(messages_waiting_push());
    h.handle.respond(no_more_messages_frame());

    // absorbed into exactly one more pass
    assert_eq!(h.handle.next_write().await, vec![0x0A]);
    h.handle.respond(no_more_messages_frame());

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert!(h.handle.try_next_write().is_none());
}

#[tokio::test(start_paused = true)]
async fn legacy_frames_are_skipped_without_aborting() {
    let mut h = setup();
    h.connect_ready().await;
    let known = h.seed_contact(ContactKind::Chat, 0).await;

    h.handle.push(messages_waiting_push());
    assert_eq!(h.handle.next_write().await, vec![0x0A]);
    h.handle.respond(vec![0x07, 1, 2, 3]);

    assert_eq!(h.handle.next_write().await, vec![0x0A]);
    h.handle.respond(contact_msg_v3_frame(&known.prefix(), 0, 1_700_000_000, b"still here"));

    assert_eq!(h.handle.next_write().await, vec![0x0A]);
    h.handle.respond(no_more_messages_frame());

    loop {
        if h.store.message_count() == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn room_posts_deduplicate_and_attribute() {
    let mut h = setup();
    h.connect_ready().await;

    // the room server itself, known as contact and session
    let room_key = PublicKey::new([0x77; 32]);
    let room = h.seed_contact_keyed(room_key, ContactKind::Room, 1).await;
    h.seed_session(SessionRole::Room, 0x77, Some("pw")).await;

    // the original author, known by their key
    let mut author_key_raw = [0u8; 32];
    author_key_raw[..4].copy_from_slice(&[0xAB, 0xCD, 0xEF, 0x01]);
    let author_contact =
        h.seed_contact_keyed(PublicKey::new(author_key_raw), ContactKind::Chat, -1).await;

    let mut payload = vec![0xAB, 0xCD, 0xEF, 0x01];
    payload.extend_from_slice(b"meeting at the pass");

    h.handle.push(messages_waiting_push());

    // the same post relayed twice
    assert_eq!(h.handle.next_write().await, vec![0x0A]);
    h.handle.respond(contact_msg_v3_frame(&room.prefix(), 2, 1_700_000_500, &payload));
    assert_eq!(h.handle.next_write().await, vec![0x0A]);
    h.handle.respond(contact_msg_v3_frame(&room.prefix(), 2, 1_700_000_500, &payload));

    // a post by this host's own identity, echoed back by the room
    let mut own_payload = h.self_key.as_bytes()[..4].to_vec();
    own_payload.extend_from_slice(b"my own echo");
    assert_eq!(h.handle.next_write().await, vec![0x0A]);
    h.handle.respond(contact_msg_v3_frame(&room.prefix(), 2, 1_700_000_600, &own_payload));

    assert_eq!(h.handle.next_write().await, vec![0x0A]);
    h.handle.respond(no_more_messages_frame());

    loop {
        if h.store.message_count() == 2 {
            break;
        }
        tokio::task::yield_now().await;
    }
    let posts = h.store.messages_for_contact_sync(room.id);
    assert_eq!(posts.len(), 2, "duplicate relay stored once");
    assert_eq!(posts[0].text, "meeting at the pass");
    assert_eq!(posts[0].author.as_deref(), Some(author_contact.display_name()));
    assert!(!posts[0].is_from_self);
    assert_eq!(posts[1].text, "my own echo");
    assert!(posts[1].is_from_self);
    // unknown author falls back to the raw prefix, which is hex
    assert_eq!(posts[1].author.as_deref(), Some("eeeeeeee"));
}
