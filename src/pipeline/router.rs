//! Event router: verification handshakes and delivery processing.
//!
//! [`EventRouter::deliver`] never fails. Every problem (unparseable body,
//! unknown fragment, unrecoverable ghost, store outage) is logged and counted
//! in the returned [`DeliveryReport`]; the HTTP layer acknowledges regardless.
//! Events within one delivery are applied sequentially in payload order.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::delivery_log::DeliveryLog;
use super::dispatch::{ReplyDispatcher, ReplyOutcome, ReplyTexts};
use super::reconcile::Reconciler;
use super::{DeliveryReport, PipelineError, Timeouts};
use crate::channels::{self, comment, email, follow, form, mention, message};
use crate::channels::{InboundEvent, MessagingFragment, RawFragment};
use crate::config::{Config, ResolvedChannel};
use crate::leads::store::LeadStore;
use crate::leads::Channel;
use crate::outbound::Transports;

/// Query parameters of a subscription verification request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyQuery {
    /// Must be `subscribe`.
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    /// Secret to compare with the configured verify token.
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    /// Value to echo back on success.
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

struct RouterInner {
    channels: HashMap<Channel, ResolvedChannel>,
    transports: Transports,
    reconciler: Reconciler,
    dispatcher: ReplyDispatcher,
    timeouts: Timeouts,
    delivery_log: Option<DeliveryLog>,
}

/// Routes provider deliveries through normalization, reconciliation and
/// replies. Cheap to clone.
#[derive(Clone)]
pub struct EventRouter {
    inner: Arc<RouterInner>,
}

impl EventRouter {
    /// Build a router from configuration, without a delivery log.
    pub fn new(config: &Config, store: Arc<dyn LeadStore>, transports: Transports) -> Self {
        Self::with_parts(
            config,
            store,
            transports,
            ReplyTexts::from_config(config),
            Timeouts::from(&config.timeouts),
            None,
        )
    }

    /// Build a router with explicit reply texts and timeouts.
    pub fn with_parts(
        config: &Config,
        store: Arc<dyn LeadStore>,
        transports: Transports,
        texts: ReplyTexts,
        timeouts: Timeouts,
        delivery_log: Option<DeliveryLog>,
    ) -> Self {
        let channels = Channel::ALL
            .into_iter()
            .map(|c| (c, config.channel(c)))
            .collect();
        Self {
            inner: Arc::new(RouterInner {
                channels,
                transports: transports.clone(),
                reconciler: Reconciler::new(store.clone(), timeouts.store),
                dispatcher: ReplyDispatcher::new(store, transports, texts, timeouts),
                timeouts,
                delivery_log,
            }),
        }
    }

    /// The delivery log, if one is attached.
    pub fn delivery_log(&self) -> Option<&DeliveryLog> {
        self.inner.delivery_log.as_ref()
    }

    fn settings(&self, channel: Channel) -> Option<&ResolvedChannel> {
        self.inner.channels.get(&channel)
    }

    /// Answer a verification handshake for `channel`.
    ///
    /// Returns the challenge to echo. Never touches the lead store.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::MissingVerificationParams`] when `hub.mode` or
    ///   `hub.verify_token` is absent.
    /// - [`PipelineError::VerificationMismatch`] when the mode is not
    ///   `subscribe`, the token differs, or no token is configured.
    pub fn verify(&self, channel: Channel, query: &VerifyQuery) -> Result<String, PipelineError> {
        let mode = query
            .mode
            .as_deref()
            .ok_or(PipelineError::MissingVerificationParams("hub.mode"))?;
        let token = query
            .verify_token
            .as_deref()
            .ok_or(PipelineError::MissingVerificationParams("hub.verify_token"))?;

        let expected = self
            .settings(channel)
            .filter(|s| s.enabled)
            .and_then(|s| s.verify_token.as_deref());
        if mode == "subscribe" && expected == Some(token) {
            info!(%channel, "webhook verified");
            return Ok(query.challenge.clone().unwrap_or_default());
        }
        warn!(%channel, mode, "webhook verification rejected");
        Err(PipelineError::VerificationMismatch)
    }

    /// Process one delivery body for `channel`.
    pub async fn deliver(&self, channel: Channel, body: &[u8]) -> DeliveryReport {
        let mut report = DeliveryReport::new(channel);

        if !self.settings(channel).is_some_and(|s| s.enabled) {
            warn!(%channel, "delivery for disabled channel ignored");
            report.drop_fragment();
            self.log_delivery(&report).await;
            return report;
        }

        match serde_json::from_slice::<Value>(body) {
            Ok(payload) => self.process_payload(channel, &payload, &mut report).await,
            Err(e) => {
                let err = PipelineError::MalformedPayload(format!("body is not JSON: {e}"));
                warn!(%channel, error = %err, "delivery skipped");
                report.drop_fragment();
                report.record_error(&err);
            }
        }

        info!(
            %channel,
            entries = report.entries,
            events = report.events,
            applied = report.applied,
            dropped = report.dropped,
            failed = report.failed,
            replies = report.replies_sent,
            "delivery processed"
        );
        self.log_delivery(&report).await;
        report
    }

    /// Record a delivery whose body was never processed.
    pub async fn discard(&self, channel: Channel, reason: String) -> DeliveryReport {
        let mut report = DeliveryReport::new(channel);
        let err = PipelineError::MalformedPayload(reason);
        warn!(%channel, error = %err, "delivery skipped");
        report.drop_fragment();
        report.record_error(&err);
        self.log_delivery(&report).await;
        report
    }

    async fn log_delivery(&self, report: &DeliveryReport) {
        if let Some(log) = &self.inner.delivery_log {
            if let Err(e) = log.record(report).await {
                debug!(error = %e, "delivery log write failed");
            }
        }
    }

    async fn process_payload(&self, channel: Channel, payload: &Value, report: &mut DeliveryReport) {
        match channel {
            Channel::Email | Channel::Website => {
                report.entries = 1;
                let event = if channel == Channel::Email {
                    email::normalize_email_message(payload)
                } else {
                    form::normalize_form(payload)
                };
                match event {
                    Some(event) => self.apply(event, report).await,
                    None => {
                        let err = PipelineError::MalformedPayload(format!(
                            "{channel} body has no usable sender"
                        ));
                        warn!(%channel, error = %err, "delivery skipped");
                        report.drop_fragment();
                        report.record_error(&err);
                    }
                }
            }
            Channel::Instagram | Channel::Facebook | Channel::Whatsapp => {
                let Some(entries) = payload.get("entry").and_then(Value::as_array) else {
                    let err = PipelineError::MalformedPayload("missing entry[]".to_owned());
                    warn!(%channel, error = %err, "delivery skipped");
                    report.drop_fragment();
                    report.record_error(&err);
                    return;
                };
                report.entries = entries.len();
                for entry in entries {
                    for fragment in channels::split_entry(entry) {
                        for event in self.events_for(channel, fragment, report).await {
                            self.apply(event, report).await;
                        }
                    }
                }
            }
        }
    }

    /// Normalize one fragment into zero or more events.
    async fn events_for(
        &self,
        channel: Channel,
        fragment: RawFragment,
        report: &mut DeliveryReport,
    ) -> Vec<InboundEvent> {
        let events: Vec<InboundEvent> = match fragment {
            RawFragment::Messaging(fragment) => self
                .messaging_event(channel, fragment, report)
                .await
                .into_iter()
                .collect(),
            RawFragment::Change(change) => match (channel, change.field.as_str()) {
                (Channel::Whatsapp, _) => message::normalize_whatsapp_change(&change),
                (_, "messages") => match message::messaging_from_change(&change) {
                    Some(fragment) => self
                        .messaging_event(channel, fragment, report)
                        .await
                        .into_iter()
                        .collect(),
                    None => Vec::new(),
                },
                (_, "follows" | "follow") => {
                    follow::normalize_follow(channel, &change).into_iter().collect()
                }
                (_, "comments" | "comment" | "live_comments") => {
                    comment::normalize_comment(channel, &change).into_iter().collect()
                }
                (_, "mentions" | "mention") => {
                    mention::normalize_mention(channel, &change).into_iter().collect()
                }
                (_, field) => {
                    debug!(%channel, field, "unsubscribed change field skipped");
                    Vec::new()
                }
            },
            RawFragment::Unknown(reason) => {
                let err = PipelineError::MalformedPayload(reason);
                debug!(%channel, error = %err, "fragment skipped");
                report.record_error(&err);
                Vec::new()
            }
        };
        if events.is_empty() {
            report.drop_fragment();
        }
        events
    }

    /// Normalize a messaging fragment, recovering ghost content first.
    async fn messaging_event(
        &self,
        channel: Channel,
        fragment: MessagingFragment,
        report: &mut DeliveryReport,
    ) -> Option<InboundEvent> {
        let fragment = match fragment.ghost_message_id().map(str::to_owned) {
            Some(message_id) => match self.recover_ghost(channel, &message_id).await {
                Ok(fetched) => fragment.recover(fetched.text, fetched.sender_id, fetched.sender_name),
                Err(err) => {
                    warn!(%channel, error = %err, "ghost event dropped");
                    report.record_error(&err);
                    return None;
                }
            },
            None => fragment,
        };
        message::normalize_messaging(channel, &fragment)
    }

    async fn recover_ghost(
        &self,
        channel: Channel,
        message_id: &str,
    ) -> Result<crate::outbound::FetchedMessage, PipelineError> {
        let unrecoverable = |reason: String| PipelineError::GhostEventUnrecoverable {
            message_id: message_id.to_owned(),
            reason,
        };
        let lookup = self
            .inner
            .transports
            .lookup(channel)
            .ok_or_else(|| unrecoverable("no content lookup configured".to_owned()))?;
        let after = self.inner.timeouts.lookup;
        match tokio::time::timeout(after, lookup.fetch_message(message_id)).await {
            Ok(Ok(fetched)) => {
                debug!(%channel, message_id, "ghost event recovered");
                Ok(fetched)
            }
            Ok(Err(e)) => Err(unrecoverable(e.to_string())),
            Err(_) => Err(unrecoverable(format!("lookup timed out after {after:?}"))),
        }
    }

    /// Reconcile one event and, once durable, dispatch its reply.
    async fn apply(&self, event: InboundEvent, report: &mut DeliveryReport) {
        report.events = report.events.saturating_add(1);
        let outcome = match self.inner.reconciler.reconcile(&event).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                report.drop_fragment();
                return;
            }
            Err(e) => {
                error!(
                    channel = %event.channel,
                    sender = %event.channel_user_id,
                    retryable = e.is_retryable(),
                    error = %e,
                    "event not applied"
                );
                report.failed = report.failed.saturating_add(1);
                report.record_error(&e);
                return;
            }
        };
        report.applied = report.applied.saturating_add(1);

        if let ReplyOutcome::Sent { .. } = self
            .inner
            .dispatcher
            .maybe_reply(&outcome.lead, event.kind)
            .await
        {
            report.replies_sent = report.replies_sent.saturating_add(1);
        }
    }
}
