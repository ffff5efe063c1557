//! Channel adapters: provider payload fragments in, [`InboundEvent`]s out.
//!
//! Graph-style providers (Instagram, Facebook, WhatsApp) deliver an `entry[]`
//! array. Each entry may carry a `messaging[]` list, a `changes[]` list, or
//! both. [`split_entry`] turns one entry into typed [`RawFragment`]s; the
//! per-kind modules turn fragments into events.
//!
//! Every adapter is a pure function. Missing senders, missing text and
//! wrongly-typed fields yield `None` (or an [`RawFragment::Unknown`]), never a
//! panic or an error.

pub mod comment;
pub mod email;
pub mod follow;
pub mod form;
pub mod mention;
pub mod message;

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::leads::{Channel, EventKind, Identity};

/// Provider epoch values above this are milliseconds, below are seconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// How far past the local clock a provider timestamp may run.
const MAX_CLOCK_SKEW: TimeDelta = TimeDelta::hours(24);

/// A normalized provider event, ready for reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundEvent {
    /// Channel the event arrived on.
    pub channel: Channel,
    /// Provider-specific sender id (or email / phone for contact channels).
    pub channel_user_id: String,
    /// Sender name as reported by the provider.
    pub sender_display_name: Option<String>,
    /// Event kind.
    pub kind: EventKind,
    /// Message, comment or email body.
    pub text: Option<String>,
    /// When the provider says the event happened.
    pub occurred_at: DateTime<Utc>,
    /// Provider id for the underlying message, if any.
    pub provider_message_id: Option<String>,
    /// Sender email, when the channel exposes one.
    pub email: Option<String>,
    /// Sender phone, when the channel exposes one.
    pub phone: Option<String>,
    /// Namespaced provider extras (`comment.media_id`, `email.subject`, ...).
    pub metadata: BTreeMap<String, Value>,
}

impl InboundEvent {
    /// Build an event with the required fields; the rest start empty.
    pub fn new(
        channel: Channel,
        channel_user_id: impl Into<String>,
        kind: EventKind,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            channel,
            channel_user_id: channel_user_id.into(),
            sender_display_name: None,
            kind,
            text: None,
            occurred_at,
            provider_message_id: None,
            email: None,
            phone: None,
            metadata: BTreeMap::new(),
        }
    }

    /// The lead key for this event, or `None` when the sender id is blank.
    pub fn identity(&self) -> Option<Identity> {
        Identity::new(self.channel, &self.channel_user_id)
    }

    /// Insert a metadata value, skipping `None`.
    pub(crate) fn with_meta(mut self, key: &str, value: Option<impl Into<Value>>) -> Self {
        if let Some(value) = value {
            self.metadata.insert(key.to_owned(), value.into());
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Raw fragments
// ---------------------------------------------------------------------------

/// One unit of a provider `entry`, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFragment {
    /// An element of `entry.messaging[]`.
    Messaging(MessagingFragment),
    /// An element of `entry.changes[]`.
    Change(ChangeFragment),
    /// Anything that matched neither shape, with the reason.
    Unknown(String),
}

/// A sender or recipient reference.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Party {
    /// Provider user id; numbers are accepted and stringified.
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    /// Handle, when the provider includes it.
    #[serde(default)]
    pub username: Option<String>,
    /// Display name, when the provider includes it.
    #[serde(default)]
    pub name: Option<String>,
}

impl Party {
    /// The non-blank id, if any.
    pub fn id(&self) -> Option<&str> {
        non_blank(self.id.as_deref())
    }

    /// Best human-facing name: username, then name.
    pub fn display_name(&self) -> Option<String> {
        non_blank(self.username.as_deref())
            .or_else(|| non_blank(self.name.as_deref()))
            .map(str::to_owned)
    }
}

/// `messaging[].message`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessagePayload {
    /// Provider message id.
    #[serde(default)]
    pub mid: Option<String>,
    /// Text body.
    #[serde(default)]
    pub text: Option<String>,
    /// Set on messages the business account sent itself.
    #[serde(default)]
    pub is_echo: bool,
    /// Media attachments.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// A message attachment; only its type is used.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Attachment {
    /// `image`, `video`, `audio`, `file`, ...
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// `messaging[].message_edit`: an edit notification that may omit the text.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageEdit {
    /// Id of the edited message.
    #[serde(default)]
    pub mid: Option<String>,
    /// New text, when included.
    #[serde(default)]
    pub text: Option<String>,
    /// Edit counter.
    #[serde(default)]
    pub num_edit: Option<u32>,
}

/// An element of `entry.messaging[]`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessagingFragment {
    /// Who sent it.
    #[serde(default)]
    pub sender: Option<Party>,
    /// Who received it (the business account).
    #[serde(default)]
    pub recipient: Option<Party>,
    /// Epoch seconds or milliseconds.
    #[serde(default)]
    pub timestamp: Option<Value>,
    /// A regular message.
    #[serde(default)]
    pub message: Option<MessagePayload>,
    /// An edit notification.
    #[serde(default)]
    pub message_edit: Option<MessageEdit>,
}

impl MessagingFragment {
    /// The message id to look up when this fragment references content it
    /// does not carry.
    ///
    /// That is a `message_edit` without text, or a non-echo `message` with
    /// neither text nor attachments.
    pub fn ghost_message_id(&self) -> Option<&str> {
        if let Some(edit) = &self.message_edit {
            if non_blank(edit.text.as_deref()).is_none() {
                return non_blank(edit.mid.as_deref());
            }
            return None;
        }
        let message = self.message.as_ref()?;
        if message.is_echo
            || non_blank(message.text.as_deref()).is_some()
            || !message.attachments.is_empty()
        {
            return None;
        }
        non_blank(message.mid.as_deref())
    }

    /// Rebuild this fragment around content fetched from the provider.
    ///
    /// The fetched sender replaces the original one only when present.
    pub fn recover(
        self,
        text: String,
        sender_id: Option<String>,
        sender_name: Option<String>,
    ) -> Self {
        let mid = self
            .message_edit
            .as_ref()
            .and_then(|e| e.mid.clone())
            .or_else(|| self.message.as_ref().and_then(|m| m.mid.clone()));
        let sender = match sender_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => Some(Party {
                id: Some(id),
                username: sender_name,
                name: None,
            }),
            None => self.sender,
        };
        Self {
            sender,
            recipient: self.recipient,
            timestamp: self.timestamp,
            message: Some(MessagePayload {
                mid,
                text: Some(text),
                is_echo: false,
                attachments: Vec::new(),
            }),
            message_edit: None,
        }
    }
}

/// An element of `entry.changes[]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChangeFragment {
    /// Subscription field (`messages`, `follows`, `comments`, `mentions`).
    pub field: String,
    /// Field-specific payload.
    #[serde(default)]
    pub value: Value,
    /// `entry.time`, used when the value carries no timestamp.
    #[serde(skip)]
    pub entry_time: Option<Value>,
}

/// Split one `entry[]` element into typed fragments.
///
/// Both shapes are extracted when both are present. A fragment that fails to
/// deserialize becomes [`RawFragment::Unknown`] without affecting its
/// siblings.
pub fn split_entry(entry: &Value) -> Vec<RawFragment> {
    let Some(object) = entry.as_object() else {
        return vec![RawFragment::Unknown("entry is not an object".to_owned())];
    };
    let mut fragments = Vec::new();

    if let Some(messaging) = object.get("messaging") {
        match messaging.as_array() {
            Some(items) => fragments.extend(items.iter().map(|item| {
                match MessagingFragment::deserialize(item) {
                    Ok(fragment) => RawFragment::Messaging(fragment),
                    Err(e) => RawFragment::Unknown(format!("malformed messaging item: {e}")),
                }
            })),
            None => fragments.push(RawFragment::Unknown("messaging is not a list".to_owned())),
        }
    }

    if let Some(changes) = object.get("changes") {
        let entry_time = object.get("time").cloned();
        match changes.as_array() {
            Some(items) => fragments.extend(items.iter().map(|item| {
                match ChangeFragment::deserialize(item) {
                    Ok(mut change) => {
                        change.entry_time = entry_time.clone();
                        RawFragment::Change(change)
                    }
                    Err(e) => RawFragment::Unknown(format!("malformed change item: {e}")),
                }
            })),
            None => fragments.push(RawFragment::Unknown("changes is not a list".to_owned())),
        }
    }

    if fragments.is_empty() {
        fragments.push(RawFragment::Unknown(
            "entry carries neither messaging nor changes".to_owned(),
        ));
    }
    fragments
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Accept a JSON string or number as an id.
pub(crate) fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Trimmed, non-empty view of an optional string.
pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parse a provider timestamp.
///
/// Accepts epoch seconds or milliseconds (as a number or numeric string) and
/// RFC 3339 strings. Anything else, including values more than a day in the
/// future, means "now".
pub fn parse_occurred_at(raw: Option<&Value>) -> DateTime<Utc> {
    let now = Utc::now();
    let parsed = match raw {
        Some(Value::Number(n)) => n.as_i64().and_then(from_epoch),
        Some(Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(n) => from_epoch(n),
            Err(_) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
        },
        _ => None,
    };
    let latest = now.checked_add_signed(MAX_CLOCK_SKEW).unwrap_or(now);
    parsed.filter(|ts| *ts <= latest).unwrap_or(now)
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value <= 0 {
        return None;
    }
    if value > MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}
