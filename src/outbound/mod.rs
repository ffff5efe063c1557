//! Outbound capabilities: sending messages to a lead and fetching message
//! content for ghost events.
//!
//! Both are traits so the pipeline can be driven by recording fakes in tests.
//! Neither retries or deduplicates; callers own the retry policy.

pub mod broadcast;
pub mod graph;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::Config;
use crate::leads::{Channel, Identity};

/// Errors from a send call.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The HTTP request itself failed (connect, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Provider {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The provider answered 2xx but without a message id.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// No sender is configured for this channel.
    #[error("no sender configured for {0}")]
    NotConfigured(Channel),

    /// The recipient cannot be addressed on this channel.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
}

/// Errors from a content lookup.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The HTTP request itself failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Provider {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The message exists but has no usable text.
    #[error("message {0} has no text")]
    NoContent(String),
}

/// Content recovered for a ghost event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Message text.
    pub text: String,
    /// Sender id, when the provider reports it.
    pub sender_id: Option<String>,
    /// Sender name, when the provider reports it.
    pub sender_name: Option<String>,
}

/// Sends a text message to a lead on one channel.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send `text` to `recipient`, returning the provider message id.
    async fn send(&self, recipient: &Identity, text: &str) -> Result<String, SendError>;
}

/// Fetches the authoritative content of a provider message.
#[async_trait]
pub trait ContentLookup: Send + Sync {
    /// Look up a message by provider id.
    async fn fetch_message(&self, message_id: &str) -> Result<FetchedMessage, LookupError>;
}

/// Per-channel senders and content lookups.
#[derive(Clone, Default)]
pub struct Transports {
    senders: HashMap<Channel, Arc<dyn MessageSender>>,
    lookups: HashMap<Channel, Arc<dyn ContentLookup>>,
}

impl std::fmt::Debug for Transports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut senders: Vec<_> = self.senders.keys().collect();
        senders.sort();
        let mut lookups: Vec<_> = self.lookups.keys().collect();
        lookups.sort();
        f.debug_struct("Transports")
            .field("senders", &senders)
            .field("lookups", &lookups)
            .finish()
    }
}

impl Transports {
    /// No transports; every send reports [`SendError::NotConfigured`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Build Graph API clients for every channel that has credentials.
    pub fn from_config(config: &Config) -> Self {
        let mut transports = Self::new();
        for channel in Channel::ALL {
            let resolved = config.channel(channel);
            if !resolved.enabled || !resolved.can_send() {
                continue;
            }
            if let Some(client) = graph::GraphClient::from_channel(&resolved) {
                let client = Arc::new(client);
                transports.senders.insert(channel, client.clone());
                if channel != Channel::Whatsapp {
                    transports.lookups.insert(channel, client);
                }
                info!(%channel, "outbound transport configured");
            }
        }
        transports
    }

    /// Register a sender for `channel`.
    pub fn with_sender(mut self, channel: Channel, sender: Arc<dyn MessageSender>) -> Self {
        self.senders.insert(channel, sender);
        self
    }

    /// Register a content lookup for `channel`.
    pub fn with_lookup(mut self, channel: Channel, lookup: Arc<dyn ContentLookup>) -> Self {
        self.lookups.insert(channel, lookup);
        self
    }

    /// Sender for `channel`, if configured.
    pub fn sender(&self, channel: Channel) -> Option<Arc<dyn MessageSender>> {
        self.senders.get(&channel).cloned()
    }

    /// Content lookup for `channel`, if configured.
    pub fn lookup(&self, channel: Channel) -> Option<Arc<dyn ContentLookup>> {
        self.lookups.get(&channel).cloned()
    }
}
