//! Concurrent upserts against a file-backed pool with several connections.

use std::sync::Arc;

use leadflow::leads::store::{self, LeadFilter, LeadStore, SqliteLeadStore};
use leadflow::leads::{Channel, Identity};

use crate::common::message_upsert;

async fn file_store(dir: &tempfile::TempDir) -> Arc<SqliteLeadStore> {
    let path = dir.path().join("leads.db");
    let pool = store::open_pool(&path.to_string_lossy(), 5)
        .await
        .expect("pool should open");
    store::migrate(&pool).await.expect("migrations should apply");
    Arc::new(SqliteLeadStore::new(pool))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_events_for_one_identity_yield_one_lead() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = file_store(&dir).await;

    let mut handles = Vec::new();
    for n in 0..20 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .upsert(&message_upsert(
                    Channel::Instagram,
                    "racer",
                    None,
                    &format!("msg {n}"),
                ))
                .await
                .expect("upsert")
        }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.expect("task").created {
            created += 1;
        }
    }
    assert_eq!(created, 1, "exactly one upsert creates the lead");

    let identity = Identity::new(Channel::Instagram, "racer").expect("identity");
    let lead = store
        .find_by_identity(&identity)
        .await
        .expect("find")
        .expect("lead exists");
    assert_eq!(lead.interaction_count, 20);
    assert_eq!(lead.notes.len(), 20);
    assert_eq!(store.count_by(&LeadFilter::default()).await.expect("count"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_events_for_distinct_identities_do_not_interfere() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = file_store(&dir).await;

    let mut handles = Vec::new();
    for n in 0..10 {
        for _ in 0..3 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .upsert(&message_upsert(Channel::Facebook, &format!("user{n}"), None, "hi"))
                    .await
                    .expect("upsert")
            }));
        }
    }
    for handle in handles {
        handle.await.expect("task");
    }

    let leads = store.list(&LeadFilter::default()).await.expect("list");
    assert_eq!(leads.len(), 10);
    assert!(leads.iter().all(|lead| lead.interaction_count == 3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reply_markers_have_one_winner() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = file_store(&dir).await;
    let lead = store
        .upsert(&message_upsert(Channel::Instagram, "marker", None, "hi"))
        .await
        .expect("upsert")
        .lead;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        let id = lead.id.clone();
        handles.push(tokio::spawn(async move {
            store
                .mark_reply_sent(&id, leadflow::leads::ReplyKind::AutoReply)
                .await
                .expect("mark")
        }));
    }
    let mut winners = 0;
    for handle in handles {
        if handle.await.expect("task") {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}
