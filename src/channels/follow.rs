//! `follows` change adapter.

use serde::Deserialize;
use serde_json::Value;

use super::{lenient_id, non_blank, parse_occurred_at, ChangeFragment, InboundEvent, Party};
use crate::leads::{Channel, EventKind};

#[derive(Debug, Default, Deserialize)]
struct FollowValue {
    #[serde(default)]
    verb: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    user_id: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    from: Option<Party>,
    #[serde(default)]
    time: Option<Value>,
}

/// Normalize a `follows` change. Unfollows and sender-less values yield `None`.
pub fn normalize_follow(channel: Channel, change: &ChangeFragment) -> Option<InboundEvent> {
    let value = FollowValue::deserialize(&change.value).ok()?;
    if let Some(verb) = non_blank(value.verb.as_deref()) {
        if !verb.eq_ignore_ascii_case("follow") {
            return None;
        }
    }
    let from = value.from.unwrap_or_default();
    let user_id = non_blank(value.user_id.as_deref()).or_else(|| from.id())?;
    let username = non_blank(value.username.as_deref())
        .map(str::to_owned)
        .or_else(|| from.display_name());

    let mut event = InboundEvent::new(
        channel,
        user_id,
        EventKind::Follow,
        parse_occurred_at(value.time.as_ref().or(change.entry_time.as_ref())),
    );
    event.sender_display_name = username;
    Some(event)
}
