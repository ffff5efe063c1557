//! Automated replies with a durable at-most-once marker per reply kind.
//!
//! A marker moves `unset -> sent` only after the provider confirms the send.
//! A failed or timed-out send leaves it unset so the next event retries.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{bounded, Timeouts};
use crate::config::Config;
use crate::leads::store::LeadStore;
use crate::leads::{Channel, EventKind, Lead, ReplyKind};
use crate::outbound::Transports;

/// Configured reply copy per channel and reply kind.
#[derive(Debug, Clone, Default)]
pub struct ReplyTexts {
    texts: HashMap<(Channel, ReplyKind), String>,
}

impl ReplyTexts {
    /// Reply texts resolved from configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut texts = HashMap::new();
        for channel in Channel::ALL {
            let resolved = config.channel(channel);
            let pairs = [
                (ReplyKind::AutoReply, resolved.auto_reply),
                (ReplyKind::Welcome, resolved.follow_reply),
                (ReplyKind::CommentReply, resolved.comment_reply),
                (ReplyKind::MentionReply, resolved.mention_reply),
            ];
            for (kind, text) in pairs {
                if let Some(text) = text {
                    texts.insert((channel, kind), text);
                }
            }
        }
        Self { texts }
    }

    /// Set one reply text.
    pub fn with(mut self, channel: Channel, kind: ReplyKind, text: impl Into<String>) -> Self {
        self.texts.insert((channel, kind), text.into());
        self
    }

    /// Reply text for `channel` and `kind`, if enabled.
    pub fn get(&self, channel: Channel, kind: ReplyKind) -> Option<&str> {
        self.texts.get(&(channel, kind)).map(String::as_str)
    }
}

/// What [`ReplyDispatcher::maybe_reply`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Sent now; the marker is set.
    Sent {
        /// Provider message id.
        message_id: String,
    },
    /// The marker was already set; nothing sent.
    AlreadySent,
    /// No reply text configured for this channel and kind.
    Disabled,
    /// No sender configured for this channel.
    NoSender,
    /// The send failed or timed out; the marker stays unset.
    Failed(String),
}

/// Decides whether an event earns an automated reply and sends it.
#[derive(Clone)]
pub struct ReplyDispatcher {
    store: Arc<dyn LeadStore>,
    transports: Transports,
    texts: ReplyTexts,
    timeouts: Timeouts,
}

impl ReplyDispatcher {
    /// Create a dispatcher.
    pub fn new(
        store: Arc<dyn LeadStore>,
        transports: Transports,
        texts: ReplyTexts,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            store,
            transports,
            texts,
            timeouts,
        }
    }

    /// Reply to `lead` for an event of `kind` unless that reply was already
    /// sent. `lead` must be the state returned by the durable upsert.
    pub async fn maybe_reply(&self, lead: &Lead, kind: EventKind) -> ReplyOutcome {
        let reply = ReplyKind::for_event(kind);
        if lead.reply_sent(reply) {
            return ReplyOutcome::AlreadySent;
        }
        let Some(text) = self.texts.get(lead.channel, reply) else {
            return ReplyOutcome::Disabled;
        };
        let Some(sender) = self.transports.sender(lead.channel) else {
            debug!(channel = %lead.channel, "no sender configured, reply skipped");
            return ReplyOutcome::NoSender;
        };

        let message_id = match bounded(
            "reply send",
            self.timeouts.send,
            sender.send(&lead.identity(), text),
        )
        .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(lead_id = %lead.id, channel = %lead.channel, ?reply, error = %e, "reply send failed");
                return ReplyOutcome::Failed(e.to_string());
            }
        };

        match bounded(
            "reply marker",
            self.timeouts.store,
            self.store.mark_reply_sent(&lead.id, reply),
        )
        .await
        {
            Ok(true) => info!(lead_id = %lead.id, ?reply, %message_id, "reply sent"),
            Ok(false) => {
                warn!(lead_id = %lead.id, ?reply, "reply marker was already set by a concurrent delivery")
            }
            Err(e) => error!(
                lead_id = %lead.id,
                ?reply,
                error = %e,
                "reply sent but marker not persisted, a later event may resend"
            ),
        }
        ReplyOutcome::Sent { message_id }
    }
}
