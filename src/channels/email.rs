//! Inbound email adapter.
//!
//! Accepts the JSON an inbound-mail relay posts for each message. The sender
//! may be an object (`{"address", "name"}`) or an RFC 5322 style string
//! (`"Name <addr@host>"`).

use serde::Deserialize;
use serde_json::Value;

use super::{non_blank, parse_occurred_at, InboundEvent};
use crate::leads::{normalize_email, Channel, EventKind, Identity};

/// Body shown when an email has neither a text nor an HTML part.
const EMPTY_BODY: &str = "No content";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Sender {
    Structured {
        #[serde(default)]
        address: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    Raw(String),
}

impl Sender {
    /// Split into `(address, name)`.
    fn parts(&self) -> (Option<String>, Option<String>) {
        match self {
            Self::Structured { address, name } => (
                address.as_deref().and_then(normalize_email),
                non_blank(name.as_deref()).map(str::to_owned),
            ),
            Self::Raw(raw) => match raw.rsplit_once('<') {
                Some((name, rest)) => {
                    let address = rest.trim_end().trim_end_matches('>');
                    let name = name.trim().trim_matches('"');
                    (
                        normalize_email(address),
                        non_blank(Some(name)).map(str::to_owned),
                    )
                }
                None => (normalize_email(raw), None),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct InboundEmail {
    from: Sender,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    html: Option<String>,
    #[serde(default, alias = "messageId")]
    message_id: Option<String>,
    #[serde(default, alias = "date")]
    received_at: Option<Value>,
}

/// Normalize an inbound email. Requires a parseable sender address.
pub fn normalize_email_message(body: &Value) -> Option<InboundEvent> {
    let email = InboundEmail::deserialize(body).ok()?;
    let (address, name) = email.from.parts();
    let address = address?;
    let identity = Identity::new(Channel::Email, &address)?;
    let occurred_at = parse_occurred_at(email.received_at.as_ref());
    let text = non_blank(email.text.as_deref())
        .or_else(|| non_blank(email.html.as_deref()))
        .unwrap_or(EMPTY_BODY)
        .to_owned();

    let mut event = InboundEvent::new(
        Channel::Email,
        identity.channel_user_id,
        EventKind::Message,
        occurred_at,
    )
    .with_meta("email.subject", non_blank(email.subject.as_deref()))
    .with_meta(
        "email.received_at",
        Some(crate::leads::format_timestamp(occurred_at)),
    );
    event.sender_display_name = name;
    event.text = Some(text);
    event.email = Some(address);
    event.provider_message_id = email.message_id;
    Some(event)
}
