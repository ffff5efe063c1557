//! The webhook pipeline: route, reconcile, reply.
//!
//! ```text
//! POST body ─▶ EventRouter ─▶ channels::* adapters ─▶ InboundEvent
//!                  │ (ghost events: ContentLookup first)
//!                  ▼
//!             Reconciler ─▶ LeadStore::upsert (atomic per identity)
//!                  ▼
//!             ReplyDispatcher ─▶ MessageSender ─▶ LeadStore::mark_reply_sent
//! ```
//!
//! Nothing in here surfaces an error to the provider. The router turns every
//! failure into a [`DeliveryReport`] entry and a log line.

pub mod delivery_log;
pub mod dispatch;
pub mod reconcile;
pub mod router;

use std::time::Duration;

use serde::Serialize;

use crate::config::TimeoutsConfig;
use crate::leads::{Channel, LeadError};
use crate::outbound::SendError;

/// Failures inside the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The verify token did not match the configured secret.
    #[error("verification token mismatch")]
    VerificationMismatch,

    /// The verification request lacked `hub.mode` or `hub.verify_token`.
    #[error("verification request is missing {0}")]
    MissingVerificationParams(&'static str),

    /// A body or fragment could not be interpreted.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A ghost event's content could not be fetched.
    #[error("ghost event {message_id} unrecoverable: {reason}")]
    GhostEventUnrecoverable {
        /// Provider message id that was looked up.
        message_id: String,
        /// Why recovery failed.
        reason: String,
    },

    /// The lead store failed.
    #[error("persistence failure: {0}")]
    Persistence(#[from] LeadError),

    /// An outbound send failed.
    #[error("send failure: {0}")]
    Send(#[from] SendError),

    /// A bounded call ran past its deadline.
    #[error("{op} timed out after {after:?}")]
    Timeout {
        /// Which call.
        op: &'static str,
        /// The deadline.
        after: Duration,
    },
}

impl PipelineError {
    /// Whether a provider redelivery could succeed where this attempt failed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Timeout { .. })
    }
}

/// Deadlines for the pipeline's blocking calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Store lookups and upserts.
    pub store: Duration,
    /// Ghost-event content lookups.
    pub lookup: Duration,
    /// Outbound sends.
    pub send: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from(&TimeoutsConfig::default())
    }
}

impl From<&TimeoutsConfig> for Timeouts {
    fn from(config: &TimeoutsConfig) -> Self {
        Self {
            store: config.store(),
            lookup: config.lookup(),
            send: config.send(),
        }
    }
}

/// Run `fut` under `after`, mapping expiry to [`PipelineError::Timeout`].
pub(crate) async fn bounded<T, E>(
    op: &'static str,
    after: Duration,
    fut: impl std::future::Future<Output = Result<T, E>>,
) -> Result<T, PipelineError>
where
    PipelineError: From<E>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result.map_err(PipelineError::from),
        Err(_) => Err(PipelineError::Timeout { op, after }),
    }
}

/// Summary of one webhook delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Channel the delivery was addressed to.
    pub channel: Option<Channel>,
    /// `entry[]` elements (1 for email / website bodies).
    pub entries: usize,
    /// Events normalized from the delivery.
    pub events: usize,
    /// Events applied to the lead store.
    pub applied: usize,
    /// Fragments or events skipped (unknown shape, no sender, unrecoverable
    /// ghost, malformed identity).
    pub dropped: usize,
    /// Events that failed to persist.
    pub failed: usize,
    /// Auto-replies sent.
    pub replies_sent: usize,
    /// First few error messages, for the delivery log.
    pub errors: Vec<String>,
}

/// Error messages kept per report.
const MAX_REPORT_ERRORS: usize = 10;

impl DeliveryReport {
    pub(crate) fn new(channel: Channel) -> Self {
        Self {
            channel: Some(channel),
            ..Self::default()
        }
    }

    pub(crate) fn drop_fragment(&mut self) {
        self.dropped = self.dropped.saturating_add(1);
    }

    pub(crate) fn record_error(&mut self, error: &PipelineError) {
        if self.errors.len() < MAX_REPORT_ERRORS {
            self.errors.push(error.to_string());
        }
    }

    /// Errors joined for a single log column, or `None` if there were none.
    pub fn error_summary(&self) -> Option<String> {
        (!self.errors.is_empty()).then(|| self.errors.join("; "))
    }
}
