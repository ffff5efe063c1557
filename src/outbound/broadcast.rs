//! Staff-initiated sends: one-off messages and paced broadcasts.
//!
//! Broadcasts send sequentially with a fixed delay between messages to stay
//! under provider rate limits. A failure for one lead is recorded in the
//! report and the broadcast moves on.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use super::{SendError, Transports};
use crate::leads::store::LeadStore;
use crate::leads::{Lead, LeadError};

/// Errors from a one-off staff send.
#[derive(Debug, thiserror::Error)]
pub enum ContactError {
    /// The provider send failed.
    #[error("send failed: {0}")]
    Send(#[from] SendError),

    /// The send succeeded but recording it failed.
    #[error("store error: {0}")]
    Store(#[from] LeadError),

    /// The send did not finish in time.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

/// Outcome for one lead in a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BroadcastOutcome {
    /// Delivered.
    Sent {
        /// Provider message id.
        message_id: String,
    },
    /// Not delivered.
    Failed {
        /// Why.
        error: String,
    },
}

/// Per-lead broadcast result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BroadcastResult {
    /// Lead id.
    pub lead_id: String,
    /// Display name at send time.
    pub name: String,
    /// What happened.
    #[serde(flatten)]
    pub outcome: BroadcastOutcome,
}

/// Summary of a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Leads targeted.
    pub total: usize,
    /// Sends that succeeded.
    pub sent: usize,
    /// Sends that failed.
    pub failed: usize,
    /// One entry per targeted lead, in send order.
    pub results: Vec<BroadcastResult>,
}

/// Sends staff messages through the configured transports and records them
/// on the lead.
#[derive(Clone)]
pub struct Broadcaster {
    store: Arc<dyn LeadStore>,
    transports: Transports,
    delay: Duration,
    send_timeout: Duration,
}

impl Broadcaster {
    /// Create a broadcaster.
    pub fn new(
        store: Arc<dyn LeadStore>,
        transports: Transports,
        delay: Duration,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            transports,
            delay,
            send_timeout,
        }
    }

    async fn deliver(&self, lead: &Lead, text: &str) -> Result<String, ContactError> {
        let sender = self
            .transports
            .sender(lead.channel)
            .ok_or(SendError::NotConfigured(lead.channel))?;
        match tokio::time::timeout(self.send_timeout, sender.send(&lead.identity(), text)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ContactError::Timeout(self.send_timeout)),
        }
    }

    /// Send `text` to one lead, note it, and move a `new` lead to `contacted`.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError`] if the send fails or times out, or if the
    /// store rejects the contact record.
    pub async fn send_to_lead(&self, lead: &Lead, text: &str) -> Result<(Lead, String), ContactError> {
        let message_id = self.deliver(lead, text).await?;
        let note = format!("Sent {} message: {text}", lead.channel.label());
        let updated = self.store.record_contact(&lead.id, &note, true).await?;
        info!(lead_id = %lead.id, channel = %lead.channel, %message_id, "staff message sent");
        Ok((updated, message_id))
    }

    /// Send `text` to every lead in order, pausing between sends.
    pub async fn broadcast(&self, leads: &[Lead], text: &str) -> BroadcastReport {
        let mut report = BroadcastReport {
            total: leads.len(),
            ..BroadcastReport::default()
        };
        let note = format!("Broadcast message sent: {text}");

        for (index, lead) in leads.iter().enumerate() {
            if index > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let outcome = match self.deliver(lead, text).await {
                Ok(message_id) => {
                    if let Err(e) = self.store.record_contact(&lead.id, &note, false).await {
                        warn!(lead_id = %lead.id, error = %e, "broadcast sent but not recorded");
                    }
                    report.sent = report.sent.saturating_add(1);
                    BroadcastOutcome::Sent { message_id }
                }
                Err(e) => {
                    warn!(lead_id = %lead.id, channel = %lead.channel, error = %e, "broadcast send failed");
                    report.failed = report.failed.saturating_add(1);
                    BroadcastOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            report.results.push(BroadcastResult {
                lead_id: lead.id.clone(),
                name: lead.display_name.clone(),
                outcome,
            });
        }

        info!(
            total = report.total,
            sent = report.sent,
            failed = report.failed,
            "broadcast finished"
        );
        report
    }
}
