//! Lead reconciliation: one normalized event in, one merged lead out.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::{bounded, PipelineError};
use crate::channels::InboundEvent;
use crate::leads::store::{LeadStore, LeadUpsert, UpsertOutcome};
use crate::leads::EventKind;

/// Stored as the message of a lead first seen through a follow.
const FOLLOW_MESSAGE: &str = "Started following your account";

/// Stored as the message of a lead first seen through a mention, and noted on
/// every mention.
const MENTION_MESSAGE: &str = "Mentioned you in a story/post";

/// Turns [`InboundEvent`]s into atomic lead upserts.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn LeadStore>,
    store_timeout: Duration,
}

impl Reconciler {
    /// Create a reconciler over `store`.
    pub fn new(store: Arc<dyn LeadStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Describe the merge for `event`, or `None` when its identity is blank.
    ///
    /// - message: overwrites the lead message, notes `New message: <text>`
    /// - follow: keeps the message, notes `Started following`
    /// - comment: overwrites the message with `Comment: <text>`
    ///
    /// A message or comment without text leaves the stored message alone.
    /// - mention: keeps the message, notes the mention
    pub fn plan(event: &InboundEvent) -> Option<LeadUpsert> {
        let identity = event.identity()?;
        let text = event
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let (message, initial_message, note) = match event.kind {
            EventKind::Message => match text {
                Some(text) => (
                    Some(text.to_owned()),
                    text.to_owned(),
                    format!("New message: {text}"),
                ),
                None => (None, String::new(), "New message".to_owned()),
            },
            EventKind::Follow => (
                None,
                FOLLOW_MESSAGE.to_owned(),
                "Started following".to_owned(),
            ),
            EventKind::Comment => match text {
                Some(text) => {
                    let message = format!("Comment: {text}");
                    (
                        Some(message.clone()),
                        message,
                        format!("Commented on post: {text}"),
                    )
                }
                None => (None, String::new(), "Commented on post".to_owned()),
            },
            EventKind::Mention => (
                None,
                MENTION_MESSAGE.to_owned(),
                MENTION_MESSAGE.to_owned(),
            ),
        };

        Some(LeadUpsert {
            identity,
            display_name: event.sender_display_name.clone(),
            email: event.email.clone(),
            phone: event.phone.clone(),
            kind: event.kind,
            message,
            initial_message,
            note,
            occurred_at: event.occurred_at,
            metadata: event.metadata.clone(),
        })
    }

    /// Find-or-create the lead for `event` and merge it in.
    ///
    /// Returns `Ok(None)` when the event has no usable identity; nothing is
    /// written in that case.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persistence`] or [`PipelineError::Timeout`]
    /// when the store fails; both are retryable.
    pub async fn reconcile(
        &self,
        event: &InboundEvent,
    ) -> Result<Option<UpsertOutcome>, PipelineError> {
        let Some(upsert) = Self::plan(event) else {
            debug!(channel = %event.channel, kind = event.kind.as_str(), "event without identity skipped");
            return Ok(None);
        };
        let outcome = bounded("lead upsert", self.store_timeout, self.store.upsert(&upsert)).await?;
        if outcome.created {
            info!(
                lead_id = %outcome.lead.id,
                identity = %upsert.identity,
                kind = event.kind.as_str(),
                qualification = outcome.lead.qualification.as_str(),
                "new lead created"
            );
        } else {
            debug!(
                lead_id = %outcome.lead.id,
                kind = event.kind.as_str(),
                interaction_count = outcome.lead.interaction_count,
                "lead updated"
            );
        }
        Ok(Some(outcome))
    }
}
