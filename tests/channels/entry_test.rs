//! Whole provider entries through `split_entry` and the adapters.

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use leadflow::channels::{
    comment, follow, mention, message, split_entry, InboundEvent, RawFragment,
};
use leadflow::leads::{Channel, EventKind};

/// Normalize every fragment of an Instagram/Facebook entry, ignoring ghosts.
fn normalize_entry(channel: Channel, entry: &Value) -> Vec<InboundEvent> {
    let mut events = Vec::new();
    for fragment in split_entry(entry) {
        match fragment {
            RawFragment::Messaging(fragment) => {
                events.extend(message::normalize_messaging(channel, &fragment));
            }
            RawFragment::Change(change) => match change.field.as_str() {
                "messages" => events.extend(
                    message::messaging_from_change(&change)
                        .and_then(|f| message::normalize_messaging(channel, &f)),
                ),
                "follows" => events.extend(follow::normalize_follow(channel, &change)),
                "comments" => events.extend(comment::normalize_comment(channel, &change)),
                "mentions" => events.extend(mention::normalize_mention(channel, &change)),
                _ => {}
            },
            RawFragment::Unknown(_) => {}
        }
    }
    events
}

#[test]
fn entry_with_both_shapes_yields_events_from_each() {
    let entry = json!({
        "id": "17841400000000000",
        "time": 1_700_000_100,
        "messaging": [{
            "sender": {"id": "u1", "username": "ann"},
            "recipient": {"id": "17841400000000000"},
            "timestamp": 1_700_000_000_000_i64,
            "message": {"mid": "m-1", "text": "is this available?"}
        }],
        "changes": [
            {"field": "comments", "value": {
                "id": "c-1", "from": {"id": "u2", "username": "ben"},
                "text": "nice", "media": {"id": "media-1"}
            }},
            {"field": "follows", "value": {"user_id": "u3", "username": "cat", "verb": "follow"}}
        ]
    });

    let events = normalize_entry(Channel::Instagram, &entry);
    let summary: Vec<_> = events
        .iter()
        .map(|e| (e.channel_user_id.as_str(), e.kind))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("u1", EventKind::Message),
            ("u2", EventKind::Comment),
            ("u3", EventKind::Follow),
        ]
    );
    assert_eq!(
        events[0].occurred_at,
        Utc.timestamp_millis_opt(1_700_000_000_000).single().expect("ts")
    );
    // Changes without their own timestamp fall back to entry.time.
    assert_eq!(
        events[1].occurred_at,
        Utc.timestamp_opt(1_700_000_100, 0).single().expect("ts")
    );
}

#[test]
fn malformed_sibling_does_not_affect_valid_fragments() {
    let entry = json!({
        "messaging": [
            "not an object",
            {"sender": {"id": "u1"}, "message": {"mid": "m-1", "text": "still here"}}
        ]
    });

    let fragments = split_entry(&entry);
    assert_eq!(fragments.len(), 2);
    assert!(matches!(fragments[0], RawFragment::Unknown(_)));
    assert!(matches!(fragments[1], RawFragment::Messaging(_)));

    let events = normalize_entry(Channel::Facebook, &entry);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].text.as_deref(), Some("still here"));
}

#[test]
fn entry_without_known_shape_is_unknown() {
    let fragments = split_entry(&json!({"id": "1", "standby": []}));
    assert_eq!(fragments.len(), 1);
    assert!(matches!(fragments[0], RawFragment::Unknown(_)));

    let fragments = split_entry(&json!(["not", "an", "entry"]));
    assert!(matches!(fragments[0], RawFragment::Unknown(_)));
}

#[test]
fn echoes_and_read_receipts_produce_nothing() {
    let entry = json!({
        "messaging": [
            {"sender": {"id": "page"}, "message": {"mid": "m-2", "text": "our reply", "is_echo": true}},
            {"sender": {"id": "u1"}, "read": {"mid": "m-1"}}
        ]
    });
    assert!(normalize_entry(Channel::Facebook, &entry).is_empty());
}

#[test]
fn messages_change_uses_messaging_shape() {
    let entry = json!({
        "time": 1_700_000_000,
        "changes": [{"field": "messages", "value": {
            "sender": {"id": "u8"},
            "recipient": {"id": "biz"},
            "message": {"mid": "m-8", "text": "hello from changes"}
        }}]
    });

    let events = normalize_entry(Channel::Instagram, &entry);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].channel_user_id, "u8");
    assert_eq!(events[0].provider_message_id.as_deref(), Some("m-8"));
    assert_eq!(
        events[0].occurred_at,
        Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts")
    );
}

#[test]
fn whatsapp_batch_yields_one_event_per_message() {
    let entry = json!({
        "id": "waba",
        "changes": [{"field": "messages", "value": {
            "messaging_product": "whatsapp",
            "contacts": [
                {"wa_id": "15550001111", "profile": {"name": "Dee"}},
                {"wa_id": "15550002222", "profile": {"name": "Eli"}}
            ],
            "messages": [
                {"from": "15550001111", "id": "wamid.1", "timestamp": "1700000000",
                 "type": "text", "text": {"body": "hi"}},
                {"from": "15550002222", "id": "wamid.2", "timestamp": "1700000001",
                 "type": "image", "image": {"id": "img"}}
            ],
            "statuses": [{"id": "wamid.0", "status": "delivered"}]
        }}]
    });

    let events: Vec<_> = split_entry(&entry)
        .into_iter()
        .flat_map(|fragment| match fragment {
            RawFragment::Change(change) => message::normalize_whatsapp_change(&change),
            _ => Vec::new(),
        })
        .collect();

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].sender_display_name.as_deref(), Some("Dee"));
    assert_eq!(events[0].text.as_deref(), Some("hi"));
    assert_eq!(events[0].phone.as_deref(), Some("15550001111"));
    assert_eq!(events[1].sender_display_name.as_deref(), Some("Eli"));
    assert_eq!(events[1].text.as_deref(), Some("[image message]"));
    assert_eq!(
        events[1].metadata.get("whatsapp.type"),
        Some(&json!("image"))
    );
}
