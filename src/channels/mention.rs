//! `mentions` change adapter.

use serde::Deserialize;
use serde_json::Value;

use super::{lenient_id, parse_occurred_at, ChangeFragment, InboundEvent, Party};
use crate::leads::{Channel, EventKind};

#[derive(Debug, Default, Deserialize)]
struct MentionValue {
    #[serde(default)]
    from: Option<Party>,
    #[serde(default, deserialize_with = "lenient_id")]
    media_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    comment_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
}

/// Normalize a `mentions` change. The mentioning account must be present.
pub fn normalize_mention(channel: Channel, change: &ChangeFragment) -> Option<InboundEvent> {
    let value = MentionValue::deserialize(&change.value).ok()?;
    let from = value.from.as_ref()?;
    let user_id = from.id()?;

    let mut event = InboundEvent::new(
        channel,
        user_id,
        EventKind::Mention,
        parse_occurred_at(value.timestamp.as_ref().or(change.entry_time.as_ref())),
    )
    .with_meta("mention.media_id", value.media_id.clone())
    .with_meta("mention.comment_id", value.comment_id.clone());
    event.sender_display_name = from.display_name();
    event.text = super::non_blank(value.text.as_deref()).map(str::to_owned);
    event.provider_message_id = value.comment_id.or(value.media_id);
    Some(event)
}
