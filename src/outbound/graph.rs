//! Meta Graph API transport for Instagram, Facebook Messenger and WhatsApp.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{ContentLookup, FetchedMessage, LookupError, MessageSender, SendError};
use crate::config::ResolvedChannel;
use crate::leads::{Channel, Identity};

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum provider error body kept in [`SendError::Provider`].
const MAX_ERROR_BODY: usize = 512;

/// Length of a national number that gets the default country code.
const NATIONAL_NUMBER_LEN: usize = 10;

/// Graph API client bound to one channel's credentials.
pub struct GraphClient {
    client: reqwest::Client,
    channel: Channel,
    api_base: String,
    account_id: String,
    access_token: String,
    default_country_code: Option<String>,
}

impl std::fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClient")
            .field("channel", &self.channel)
            .field("api_base", &self.api_base)
            .field("account_id", &self.account_id)
            .field("access_token", &"__REDACTED__")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct MessengerSendResponse {
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhatsappSendResponse {
    #[serde(default)]
    messages: Vec<WhatsappSentMessage>,
}

#[derive(Debug, Deserialize)]
struct WhatsappSentMessage {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    from: Option<LookupSender>,
}

#[derive(Debug, Deserialize)]
struct LookupSender {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut = cut.saturating_sub(1);
        }
        body.truncate(cut);
    }
    body
}

/// Digits of `raw`, prefixed with `country_code` when it is a bare national
/// number.
pub fn whatsapp_recipient(raw: &str, country_code: Option<&str>) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    match country_code {
        Some(code) if digits.len() == NATIONAL_NUMBER_LEN => Some(format!("{code}{digits}")),
        _ => Some(digits),
    }
}

impl GraphClient {
    /// Build a client from resolved channel settings. `None` when the channel
    /// lacks credentials.
    pub fn from_channel(settings: &ResolvedChannel) -> Option<Self> {
        if !settings.can_send() {
            return None;
        }
        Some(Self::new(
            settings.channel,
            settings.api_base.clone(),
            settings.account_id.clone()?,
            settings.access_token.clone()?,
            settings.default_country_code.clone(),
        ))
    }

    /// Build a client from explicit values.
    pub fn new(
        channel: Channel,
        api_base: String,
        account_id: String,
        access_token: String,
        default_country_code: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            client,
            channel,
            api_base: api_base.trim_end_matches('/').to_owned(),
            account_id,
            access_token,
            default_country_code,
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.api_base, self.account_id)
    }

    async fn send_messenger(&self, recipient: &str, text: &str) -> Result<String, SendError> {
        let body = json!({
            "recipient": { "id": recipient },
            "message": { "text": text },
        });
        let resp = self
            .client
            .post(self.messages_url())
            .query(&[("access_token", self.access_token.as_str())])
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = truncate(resp.text().await.unwrap_or_default());
            return Err(SendError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: MessengerSendResponse = resp.json().await?;
        parsed
            .message_id
            .ok_or_else(|| SendError::InvalidResponse("missing message_id".to_owned()))
    }

    async fn send_whatsapp(&self, recipient: &str, text: &str) -> Result<String, SendError> {
        let to = whatsapp_recipient(recipient, self.default_country_code.as_deref())
            .ok_or_else(|| SendError::InvalidRecipient(recipient.to_owned()))?;
        let body = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": text },
        });
        let resp = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = truncate(resp.text().await.unwrap_or_default());
            return Err(SendError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: WhatsappSendResponse = resp.json().await?;
        parsed
            .messages
            .into_iter()
            .find_map(|m| m.id)
            .ok_or_else(|| SendError::InvalidResponse("missing messages[0].id".to_owned()))
    }
}

#[async_trait]
impl MessageSender for GraphClient {
    async fn send(&self, recipient: &Identity, text: &str) -> Result<String, SendError> {
        if recipient.channel != self.channel {
            return Err(SendError::NotConfigured(recipient.channel));
        }
        let message_id = match self.channel {
            Channel::Instagram | Channel::Facebook => {
                self.send_messenger(&recipient.channel_user_id, text).await?
            }
            Channel::Whatsapp => self.send_whatsapp(&recipient.channel_user_id, text).await?,
            Channel::Email | Channel::Website => {
                return Err(SendError::NotConfigured(self.channel))
            }
        };
        debug!(channel = %self.channel, %message_id, "message sent");
        Ok(message_id)
    }
}

#[async_trait]
impl ContentLookup for GraphClient {
    async fn fetch_message(&self, message_id: &str) -> Result<FetchedMessage, LookupError> {
        let url = format!("{}/{message_id}", self.api_base);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("fields", "message,from"),
                ("access_token", self.access_token.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = truncate(resp.text().await.unwrap_or_default());
            return Err(LookupError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: LookupResponse = resp.json().await?;
        let text = parsed
            .message
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| LookupError::NoContent(message_id.to_owned()))?;
        let (sender_id, sender_name) = match parsed.from {
            Some(from) => (from.id, from.username.or(from.name)),
            None => (None, None),
        };
        Ok(FetchedMessage {
            text,
            sender_id,
            sender_name,
        })
    }
}
