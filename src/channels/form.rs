//! Website contact-form adapter.
//!
//! Form posts carry no provider id, so the lead is keyed by the lowercased
//! email address, or the phone digits when no email was given.

use serde::Deserialize;
use serde_json::Value;

use super::{non_blank, parse_occurred_at, InboundEvent};
use crate::leads::{normalize_email, normalize_phone, Channel, EventKind, Identity};

/// JSON body accepted on the website webhook.
#[derive(Debug, Default, Deserialize)]
pub struct FormSubmission {
    /// Visitor name.
    #[serde(default)]
    pub name: Option<String>,
    /// Visitor email.
    #[serde(default)]
    pub email: Option<String>,
    /// Visitor phone.
    #[serde(default)]
    pub phone: Option<String>,
    /// Free-text message.
    #[serde(default)]
    pub message: Option<String>,
    /// Page the form was submitted from.
    #[serde(default)]
    pub page: Option<String>,
    /// Campaign or source tag.
    #[serde(default)]
    pub source: Option<String>,
    /// Client-side submission time.
    #[serde(default)]
    pub submitted_at: Option<Value>,
}

/// Normalize a website form submission. Needs a valid email or phone.
pub fn normalize_form(body: &Value) -> Option<InboundEvent> {
    let form = FormSubmission::deserialize(body).ok()?;
    let identity = Identity::from_contact(
        Channel::Website,
        form.email.as_deref(),
        form.phone.as_deref(),
    )?;

    let mut event = InboundEvent::new(
        Channel::Website,
        identity.channel_user_id,
        EventKind::Message,
        parse_occurred_at(form.submitted_at.as_ref()),
    )
    .with_meta("form.page", non_blank(form.page.as_deref()))
    .with_meta("form.source", non_blank(form.source.as_deref()));
    event.sender_display_name = non_blank(form.name.as_deref()).map(str::to_owned);
    event.text = non_blank(form.message.as_deref()).map(str::to_owned);
    event.email = form.email.as_deref().and_then(normalize_email);
    event.phone = form.phone.as_deref().and_then(normalize_phone);
    Some(event)
}
