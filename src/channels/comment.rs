//! `comments` change adapter.

use serde::Deserialize;
use serde_json::Value;

use super::{lenient_id, non_blank, parse_occurred_at, ChangeFragment, InboundEvent, Party};
use crate::leads::{Channel, EventKind};

#[derive(Debug, Default, Deserialize)]
struct CommentValue {
    #[serde(default, deserialize_with = "lenient_id")]
    id: Option<String>,
    #[serde(default)]
    from: Option<Party>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    media: Option<Media>,
    #[serde(default, deserialize_with = "lenient_id")]
    parent_id: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Media {
    #[serde(default, deserialize_with = "lenient_id")]
    id: Option<String>,
}

/// Normalize a `comments` change. Requires a commenter id and comment text.
pub fn normalize_comment(channel: Channel, change: &ChangeFragment) -> Option<InboundEvent> {
    let value = CommentValue::deserialize(&change.value).ok()?;
    let from = value.from.as_ref()?;
    let user_id = from.id()?;
    let text = non_blank(value.text.as_deref())?.to_owned();

    let mut event = InboundEvent::new(
        channel,
        user_id,
        EventKind::Comment,
        parse_occurred_at(value.timestamp.as_ref().or(change.entry_time.as_ref())),
    )
    .with_meta("comment.id", value.id.clone())
    .with_meta("comment.media_id", value.media.and_then(|m| m.id))
    .with_meta("comment.parent_id", value.parent_id)
    .with_meta("comment.text", Some(text.clone()));
    event.sender_display_name = from.display_name();
    event.provider_message_id = value.id;
    event.text = Some(text);
    Some(event)
}
