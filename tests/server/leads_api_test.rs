//! Tests for `src/server/leads.rs`.

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};

use leadflow::leads::store::LeadStore;
use leadflow::leads::Channel;

use crate::common::message_upsert;
use crate::support::{
    assert_status, body_json, delete, get, json_request, send, test_app, TestApp,
};

async fn seed(app: &TestApp, channel: Channel, user: &str, name: &str, text: &str) -> String {
    app.store
        .upsert(&message_upsert(channel, user, Some(name), text))
        .await
        .expect("upsert")
        .lead
        .id
}

#[tokio::test]
async fn create_then_fetch_lead() {
    let app = test_app().await;
    let response = send(
        &app.router,
        json_request(
            Method::POST,
            "/api/leads",
            &json!({"name": "Grace", "email": "grace@example.com", "tags": ["vip"]}),
        ),
    )
    .await;
    assert_status(&response, StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["channel"], "website");
    assert_eq!(created["channel_user_id"], "grace@example.com");
    assert_eq!(created["status"], "new");

    let id = created["id"].as_str().expect("id");
    let response = send(&app.router, get(&format!("/api/leads/{id}"))).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(body_json(response).await["display_name"], "Grace");
}

#[tokio::test]
async fn duplicate_create_conflicts_and_anchorless_create_is_rejected() {
    let app = test_app().await;
    let body = json!({"channel": "instagram", "channel_user_id": "u1", "name": "Ann"});
    let first = send(&app.router, json_request(Method::POST, "/api/leads", &body)).await;
    assert_status(&first, StatusCode::CREATED);
    let second = send(&app.router, json_request(Method::POST, "/api/leads", &body)).await;
    assert_status(&second, StatusCode::CONFLICT);

    let anchorless = send(
        &app.router,
        json_request(Method::POST, "/api/leads", &json!({"name": "Nobody"})),
    )
    .await;
    assert_status(&anchorless, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_lead_is_not_found() {
    let app = test_app().await;
    assert_status(
        &send(&app.router, get("/api/leads/missing")).await,
        StatusCode::NOT_FOUND,
    );
    assert_status(
        &send(&app.router, delete("/api/leads/missing")).await,
        StatusCode::NOT_FOUND,
    );
    assert_status(
        &send(
            &app.router,
            json_request(Method::PATCH, "/api/leads/missing", &json!({"status": "closed"})),
        )
        .await,
        StatusCode::NOT_FOUND,
    );
}

#[tokio::test]
async fn list_filters_by_query_and_rejects_bad_enums() {
    let app = test_app().await;
    seed(&app, Channel::Instagram, "i1", "Ivy", "pricing").await;
    seed(&app, Channel::Instagram, "i2", "Ian", "hello").await;
    seed(&app, Channel::Facebook, "f1", "Fay", "pricing?").await;

    let response = send(&app.router, get("/api/leads?channel=instagram")).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(body_json(response).await.as_array().map(Vec::len), Some(2));

    let response = send(&app.router, get("/api/leads?search=pricing&limit=1")).await;
    assert_eq!(body_json(response).await.as_array().map(Vec::len), Some(1));

    let response = send(&app.router, get("/api/leads?status=follow-up")).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(body_json(response).await, json!([]));

    let response = send(&app.router, get("/api/leads?channel=myspace")).await;
    assert_status(&response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stats_count_by_tier_channel_and_status() {
    let app = test_app().await;
    seed(&app, Channel::Instagram, "i1", "Ivy", "hi").await;
    seed(&app, Channel::Facebook, "f1", "Fay", "hi").await;

    let response = send(&app.router, get("/api/leads/stats")).await;
    assert_status(&response, StatusCode::OK);
    let stats = body_json(response).await;
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["by_qualification"]["cold"], 2);
    assert_eq!(stats["by_qualification"]["hot"], 0);
    assert_eq!(stats["by_channel"]["instagram"], 1);
    assert_eq!(stats["by_channel"]["whatsapp"], 0);
    assert_eq!(stats["by_status"]["new"], 2);
}

#[tokio::test]
async fn patch_and_delete_lead() {
    let app = test_app().await;
    let id = seed(&app, Channel::Instagram, "p1", "Pat", "hi").await;

    let response = send(
        &app.router,
        json_request(
            Method::PATCH,
            &format!("/api/leads/{id}"),
            &json!({"status": "converted", "qualification": "hot", "tags": ["won"]}),
        ),
    )
    .await;
    assert_status(&response, StatusCode::OK);
    let updated = body_json(response).await;
    assert_eq!(updated["status"], "converted");
    assert_eq!(updated["qualification"], "hot");
    assert_eq!(updated["tags"], json!(["won"]));

    let response = send(&app.router, delete(&format!("/api/leads/{id}"))).await;
    assert_status(&response, StatusCode::NO_CONTENT);
    assert!(app.store.get(&id).await.expect("get").is_none());
}

#[tokio::test]
async fn notes_are_appended_with_author() {
    let app = test_app().await;
    let id = seed(&app, Channel::Instagram, "n1", "Nia", "hi").await;

    let response = send(
        &app.router,
        json_request(
            Method::POST,
            &format!("/api/leads/{id}/notes"),
            &json!({"text": "Called, interested", "created_by": "sam"}),
        ),
    )
    .await;
    assert_status(&response, StatusCode::OK);
    let lead = body_json(response).await;
    let notes = lead["notes"].as_array().expect("notes");
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[1]["text"], "Called, interested");
    assert_eq!(notes[1]["created_by"], "sam");

    let blank = send(
        &app.router,
        json_request(
            Method::POST,
            &format!("/api/leads/{id}/notes"),
            &json!({"text": "   "}),
        ),
    )
    .await;
    assert_status(&blank, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn send_marks_lead_contacted() {
    let app = test_app().await;
    let id = seed(&app, Channel::Facebook, "s1", "Sol", "hi").await;

    let response = send(
        &app.router,
        json_request(
            Method::POST,
            &format!("/api/leads/{id}/send"),
            &json!({"message": "Here is our price list"}),
        ),
    )
    .await;
    assert_status(&response, StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message_id"], "mid.1");
    assert_eq!(body["lead"]["status"], "contacted");
    assert_eq!(body["lead"]["interaction_count"], 2);
    let last_note = body["lead"]["notes"]
        .as_array()
        .and_then(|notes| notes.last())
        .cloned()
        .unwrap_or(Value::Null);
    assert_eq!(last_note["text"], "Sent Facebook message: Here is our price list");
}

#[tokio::test]
async fn send_without_transport_is_bad_request() {
    let app = test_app().await;
    let id = seed(&app, Channel::Whatsapp, "15550001111", "Wes", "hi").await;

    let response = send(
        &app.router,
        json_request(
            Method::POST,
            &format!("/api/leads/{id}/send"),
            &json!({"message": "hello"}),
        ),
    )
    .await;
    assert_status(&response, StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"]
        .as_str()
        .is_some_and(|e| e.contains("whatsapp")));
}

#[tokio::test]
async fn broadcast_reports_per_lead_outcomes() {
    let app = test_app().await;
    let ig = seed(&app, Channel::Instagram, "b1", "Bea", "hi").await;
    let fb = seed(&app, Channel::Facebook, "b2", "Bo", "hi").await;
    let wa = seed(&app, Channel::Whatsapp, "15550002222", "Bix", "hi").await;

    let response = send(
        &app.router,
        json_request(
            Method::POST,
            "/api/broadcast",
            &json!({"message": "Summer sale", "lead_ids": [ig, fb, wa]}),
        ),
    )
    .await;
    assert_status(&response, StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["total"], 3);
    assert_eq!(report["sent"], 2);
    assert_eq!(report["failed"], 1);

    let results = report["results"].as_array().expect("results");
    let whatsapp = results
        .iter()
        .find(|r| r["lead_id"] == wa.as_str())
        .expect("whatsapp result");
    assert_eq!(whatsapp["status"], "failed");
    assert_eq!(app.sender.sent().len(), 2);

    // Broadcasts do not change status.
    let lead = app.store.get(&ig).await.expect("get").expect("exists");
    assert_eq!(lead.status, leadflow::leads::LeadStatus::New);
    assert_eq!(
        lead.notes.last().map(|n| n.text.as_str()),
        Some("Broadcast message sent: Summer sale")
    );
}

#[tokio::test]
async fn broadcast_by_filter_and_validation() {
    let app = test_app().await;
    seed(&app, Channel::Instagram, "b1", "Bea", "hi").await;
    seed(&app, Channel::Facebook, "b2", "Bo", "hi").await;

    let response = send(
        &app.router,
        json_request(
            Method::POST,
            "/api/broadcast",
            &json!({"message": "IG only", "filter": {"channel": "instagram"}}),
        ),
    )
    .await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(body_json(response).await["total"], 1);

    let no_target = send(
        &app.router,
        json_request(Method::POST, "/api/broadcast", &json!({"message": "hi"})),
    )
    .await;
    assert_status(&no_target, StatusCode::BAD_REQUEST);

    let nothing_matched = send(
        &app.router,
        json_request(
            Method::POST,
            "/api/broadcast",
            &json!({"message": "hi", "lead_ids": ["missing"]}),
        ),
    )
    .await;
    assert_status(&nothing_matched, StatusCode::BAD_REQUEST);

    let blank = send(
        &app.router,
        json_request(
            Method::POST,
            "/api/broadcast",
            &json!({"message": " ", "filter": {}}),
        ),
    )
    .await;
    assert_status(&blank, StatusCode::BAD_REQUEST);
}
