//! Tests for `src/outbound/broadcast.rs`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use leadflow::leads::store::LeadStore;
use leadflow::leads::{Channel, Lead, LeadStatus};
use leadflow::outbound::broadcast::{BroadcastOutcome, Broadcaster, ContactError};
use leadflow::outbound::{SendError, Transports};

use crate::common::{memory_store, message_upsert, FailingStore, HangingSender, RecordingSender};

async fn seeded(store: &dyn LeadStore, users: &[&str]) -> Vec<Lead> {
    let mut leads = Vec::new();
    for user in users {
        leads.push(
            store
                .upsert(&message_upsert(Channel::Instagram, user, None, "hi"))
                .await
                .expect("upsert")
                .lead,
        );
    }
    leads
}

#[tokio::test]
async fn broadcast_paces_sends_in_order() {
    let store = Arc::new(memory_store().await);
    let sender = RecordingSender::new();
    let broadcaster = Broadcaster::new(
        store.clone(),
        Transports::new().with_sender(Channel::Instagram, sender.clone()),
        Duration::from_millis(30),
        Duration::from_secs(1),
    );
    let leads = seeded(store.as_ref(), &["a", "b", "c"]).await;

    let started = Instant::now();
    let report = broadcaster.broadcast(&leads, "New arrivals").await;

    assert!(
        started.elapsed() >= Duration::from_millis(60),
        "two pauses between three sends"
    );
    assert_eq!(report.total, 3);
    assert_eq!(report.sent, 3);
    assert_eq!(report.failed, 0);
    let recipients: Vec<_> = sender
        .sent()
        .into_iter()
        .map(|m| m.recipient.channel_user_id)
        .collect();
    assert_eq!(recipients, vec!["a", "b", "c"]);

    let lead = store.get(&leads[0].id).await.expect("get").expect("exists");
    assert_eq!(lead.status, LeadStatus::New);
    assert_eq!(lead.interaction_count, 2);
    assert!(lead.last_contacted_at.is_some());
}

#[tokio::test]
async fn one_failure_does_not_stop_the_broadcast() {
    let store = Arc::new(memory_store().await);
    let sender = RecordingSender::failing_first(1);
    let broadcaster = Broadcaster::new(
        store.clone(),
        Transports::new().with_sender(Channel::Instagram, sender.clone()),
        Duration::ZERO,
        Duration::from_secs(1),
    );
    let leads = seeded(store.as_ref(), &["a", "b"]).await;

    let report = broadcaster.broadcast(&leads, "hello").await;

    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 1);
    assert!(matches!(
        report.results[0].outcome,
        BroadcastOutcome::Failed { .. }
    ));
    assert!(matches!(
        report.results[1].outcome,
        BroadcastOutcome::Sent { .. }
    ));

    let untouched = store.get(&leads[0].id).await.expect("get").expect("exists");
    assert_eq!(untouched.interaction_count, 1);
    assert!(untouched.last_contacted_at.is_none());
}

#[tokio::test]
async fn send_to_lead_reports_each_failure_mode() {
    let store = Arc::new(memory_store().await);
    let lead = seeded(store.as_ref(), &["x"]).await.remove(0);

    let unconfigured = Broadcaster::new(
        store.clone(),
        Transports::new(),
        Duration::ZERO,
        Duration::from_secs(1),
    );
    let err = unconfigured
        .send_to_lead(&lead, "hi")
        .await
        .expect_err("no sender");
    assert!(matches!(
        err,
        ContactError::Send(SendError::NotConfigured(Channel::Instagram))
    ));

    let hanging = Broadcaster::new(
        store.clone(),
        Transports::new().with_sender(Channel::Instagram, Arc::new(HangingSender)),
        Duration::ZERO,
        Duration::from_millis(50),
    );
    let err = hanging.send_to_lead(&lead, "hi").await.expect_err("timeout");
    assert!(matches!(err, ContactError::Timeout(_)));

    let unrecorded = Broadcaster::new(
        Arc::new(FailingStore),
        Transports::new().with_sender(Channel::Instagram, RecordingSender::new()),
        Duration::ZERO,
        Duration::from_secs(1),
    );
    let err = unrecorded.send_to_lead(&lead, "hi").await.expect_err("store");
    assert!(matches!(err, ContactError::Store(_)));

    let reloaded = store.get(&lead.id).await.expect("get").expect("exists");
    assert_eq!(reloaded.status, LeadStatus::New);
}
