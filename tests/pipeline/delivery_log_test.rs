//! Tests for `src/pipeline/delivery_log.rs`.

use std::sync::Arc;
use std::time::Duration;

use leadflow::config::Config;
use leadflow::leads::store::SqliteLeadStore;
use leadflow::leads::Channel;
use leadflow::outbound::Transports;
use leadflow::pipeline::delivery_log::DeliveryLog;
use leadflow::pipeline::dispatch::ReplyTexts;
use leadflow::pipeline::router::EventRouter;
use leadflow::pipeline::Timeouts;

use crate::common::memory_pool;

#[tokio::test]
async fn deliveries_are_logged_newest_first_and_trimmed() {
    let pool = memory_pool().await;
    let config = Config::default();
    let router = EventRouter::with_parts(
        &config,
        Arc::new(SqliteLeadStore::new(pool.clone())),
        Transports::new(),
        ReplyTexts::from_config(&config),
        Timeouts {
            store: Duration::from_secs(5),
            lookup: Duration::from_secs(1),
            send: Duration::from_secs(1),
        },
        Some(DeliveryLog::new(pool.clone(), 2)),
    );

    router.deliver(Channel::Instagram, b"not json").await;
    router
        .deliver(
            Channel::Website,
            br#"{"email": "a@example.com", "message": "hi"}"#,
        )
        .await;
    router
        .deliver(
            Channel::Email,
            br#"{"from": "b@example.com", "text": "hello"}"#,
        )
        .await;

    let log = router.delivery_log().expect("log attached");
    let rows = log.recent(10).await.expect("recent");
    assert_eq!(rows.len(), 2, "capacity trims the oldest row");
    assert_eq!(rows[0].channel, "email");
    assert_eq!(rows[0].applied, 1);
    assert_eq!(rows[0].error, None);
    assert_eq!(rows[1].channel, "website");
    assert!(rows[0].id > rows[1].id);
}

#[tokio::test]
async fn failures_are_summarised_in_the_log() {
    let pool = memory_pool().await;
    let log = DeliveryLog::new(pool.clone(), 10);
    let config = Config::default();
    let router = EventRouter::with_parts(
        &config,
        Arc::new(SqliteLeadStore::new(pool)),
        Transports::new(),
        ReplyTexts::default(),
        Timeouts::default(),
        Some(log.clone()),
    );

    router.deliver(Channel::Facebook, b"{broken").await;

    let rows = log.recent(1).await.expect("recent");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].channel, "facebook");
    assert_eq!(rows[0].dropped, 1);
    assert!(rows[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("malformed payload")));
}
