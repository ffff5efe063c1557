//! Direct-message adapters.
//!
//! Instagram and Facebook deliver messages as `messaging[]` fragments (or, in
//! the newer subscription format, as a `changes[]` item with
//! `field = "messages"` whose value has the same shape). WhatsApp Cloud API
//! delivers `changes[]` items whose value batches `contacts[]` and
//! `messages[]`.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{lenient_id, non_blank, parse_occurred_at, ChangeFragment, InboundEvent, MessagingFragment};
use crate::leads::{normalize_phone, Channel, EventKind};

/// Normalize one `messaging[]` fragment.
///
/// Returns `None` for echoes, fragments without a sender, and fragments that
/// carry no usable content (read receipts, reactions, unresolved ghosts).
pub fn normalize_messaging(channel: Channel, fragment: &MessagingFragment) -> Option<InboundEvent> {
    let sender = fragment.sender.as_ref()?;
    let sender_id = sender.id()?;

    let (text, mid) = if let Some(edit) = &fragment.message_edit {
        (
            non_blank(edit.text.as_deref())?.to_owned(),
            edit.mid.clone(),
        )
    } else {
        let message = fragment.message.as_ref()?;
        if message.is_echo {
            return None;
        }
        let text = match non_blank(message.text.as_deref()) {
            Some(text) => text.to_owned(),
            None => {
                let attachment = message.attachments.first()?;
                format!(
                    "[{} attachment]",
                    non_blank(attachment.kind.as_deref()).unwrap_or("media")
                )
            }
        };
        (text, message.mid.clone())
    };

    let mut event = InboundEvent::new(
        channel,
        sender_id,
        EventKind::Message,
        parse_occurred_at(fragment.timestamp.as_ref()),
    )
    .with_meta("message.mid", mid.clone())
    .with_meta(
        "message.edited",
        fragment.message_edit.as_ref().map(|_| true),
    );
    event.sender_display_name = sender.display_name();
    event.text = Some(text);
    event.provider_message_id = mid;
    Some(event)
}

/// Normalize a `changes[]` item with `field = "messages"` for Instagram or
/// Facebook. The value is a messaging fragment.
pub fn messaging_from_change(change: &ChangeFragment) -> Option<MessagingFragment> {
    let mut fragment = MessagingFragment::deserialize(&change.value).ok()?;
    if fragment.timestamp.is_none() {
        fragment.timestamp = change.entry_time.clone();
    }
    Some(fragment)
}

// ── WhatsApp Cloud API ──────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct WhatsappValue {
    #[serde(default)]
    contacts: Vec<WhatsappContact>,
    #[serde(default)]
    messages: Vec<WhatsappMessage>,
    #[serde(default)]
    statuses: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsappContact {
    #[serde(default, deserialize_with = "lenient_id")]
    wa_id: Option<String>,
    #[serde(default)]
    profile: Option<WhatsappProfile>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsappProfile {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsappMessage {
    #[serde(default, deserialize_with = "lenient_id")]
    from: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    text: Option<WhatsappText>,
    #[serde(default)]
    button: Option<WhatsappButton>,
    #[serde(default)]
    interactive: Option<WhatsappInteractive>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsappText {
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsappButton {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsappInteractive {
    #[serde(default)]
    button_reply: Option<WhatsappReply>,
    #[serde(default)]
    list_reply: Option<WhatsappReply>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsappReply {
    #[serde(default)]
    title: Option<String>,
}

impl WhatsappMessage {
    /// Text for the lead record: the body for text messages, the label for
    /// button and interactive replies, `[<type> message]` otherwise.
    fn rendered_text(&self) -> String {
        let body = match self.kind.as_deref() {
            Some("text") => self.text.as_ref().and_then(|t| t.body.clone()),
            Some("button") => self.button.as_ref().and_then(|b| b.text.clone()),
            Some("interactive") => self.interactive.as_ref().and_then(|i| {
                i.button_reply
                    .as_ref()
                    .or(i.list_reply.as_ref())
                    .and_then(|r| r.title.clone())
            }),
            _ => None,
        };
        match body.as_deref().and_then(|b| non_blank(Some(b))) {
            Some(text) => text.to_owned(),
            None => format!("[{} message]", self.kind.as_deref().unwrap_or("unknown")),
        }
    }
}

/// Normalize a WhatsApp `changes[]` item. One event per inbound message;
/// delivery statuses are ignored.
pub fn normalize_whatsapp_change(change: &ChangeFragment) -> Vec<InboundEvent> {
    if change.field != "messages" {
        return Vec::new();
    }
    let value = match WhatsappValue::deserialize(&change.value) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "skipping malformed WhatsApp change value");
            return Vec::new();
        }
    };
    if !value.statuses.is_empty() {
        debug!(statuses = value.statuses.len(), "WhatsApp status updates ignored");
    }

    value
        .messages
        .iter()
        .filter_map(|message| {
            let from = non_blank(message.from.as_deref())?;
            let name = value
                .contacts
                .iter()
                .find(|c| c.wa_id.as_deref() == Some(from))
                .or_else(|| value.contacts.first())
                .and_then(|c| c.profile.as_ref())
                .and_then(|p| non_blank(p.name.as_deref()))
                .map(str::to_owned);

            let mut event = InboundEvent::new(
                Channel::Whatsapp,
                from,
                EventKind::Message,
                parse_occurred_at(message.timestamp.as_ref().or(change.entry_time.as_ref())),
            )
            .with_meta("whatsapp.message_id", message.id.clone())
            .with_meta("whatsapp.type", message.kind.clone());
            event.sender_display_name = name;
            event.text = Some(message.rendered_text());
            event.provider_message_id = message.id.clone();
            event.phone = normalize_phone(from);
            Some(event)
        })
        .collect()
}
