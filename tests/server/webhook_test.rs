//! Tests for `src/server/webhook.rs`.

use axum::http::{Method, StatusCode};
use serde_json::json;

use leadflow::leads::store::LeadFilter;
use leadflow::leads::store::LeadStore;
use leadflow::server::webhook::ACK_BODY;

use crate::support::{
    assert_status, body_json, body_text, get, json_request, raw_post, raw_post_owned, send,
    test_app, test_app_with_body_limit, VERIFY_TOKEN,
};

#[tokio::test]
async fn health_is_ok() {
    let app = test_app().await;
    let response = send(&app.router, get("/health")).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn verification_echoes_challenge() {
    let app = test_app().await;
    let uri = format!(
        "/api/webhooks/instagram?hub.mode=subscribe&hub.verify_token={VERIFY_TOKEN}&hub.challenge=1158201444"
    );
    let response = send(&app.router, get(&uri)).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(body_text(response).await, "1158201444");
}

#[tokio::test]
async fn verification_with_wrong_token_is_forbidden() {
    let app = test_app().await;
    let response = send(
        &app.router,
        get("/api/webhooks/instagram?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=1"),
    )
    .await;
    assert_status(&response, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn verification_without_params_is_bad_request() {
    let app = test_app().await;
    let response = send(&app.router, get("/api/webhooks/instagram?hub.challenge=1")).await;
    assert_status(&response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn verification_on_unknown_or_contact_channel_is_not_found() {
    let app = test_app().await;
    let response = send(
        &app.router,
        get("/api/webhooks/telegram?hub.mode=subscribe&hub.verify_token=x&hub.challenge=1"),
    )
    .await;
    assert_status(&response, StatusCode::NOT_FOUND);

    let response = send(
        &app.router,
        get("/api/webhooks/email?hub.mode=subscribe&hub.verify_token=x&hub.challenge=1"),
    )
    .await;
    assert_status(&response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delivery_is_acknowledged_and_applied() {
    let app = test_app().await;
    let payload = json!({"object": "instagram", "entry": [{"messaging": [{
        "sender": {"id": "u42", "username": "bob"},
        "message": {"mid": "m1", "text": "hi"}
    }]}]});

    let response = send(
        &app.router,
        json_request(Method::POST, "/api/webhooks/instagram", &payload),
    )
    .await;

    assert_status(&response, StatusCode::OK);
    assert_eq!(body_text(response).await, ACK_BODY);
    assert_eq!(app.store.count_by(&LeadFilter::default()).await.expect("count"), 1);
    assert_eq!(app.sender.sent().len(), 1);
}

#[tokio::test]
async fn malformed_delivery_is_still_acknowledged() {
    let app = test_app().await;
    let bodies: [&'static [u8]; 4] = [b"{not json", b"", b"[]", br#"{"entry": "nope"}"#];
    for body in bodies {
        let response = send(&app.router, raw_post("/api/webhooks/facebook", body)).await;
        assert_status(&response, StatusCode::OK);
        assert_eq!(body_text(response).await, ACK_BODY);
    }
    assert_eq!(app.store.count_by(&LeadFilter::default()).await.expect("count"), 0);
}

#[tokio::test]
async fn delivery_to_unknown_channel_is_not_found() {
    let app = test_app().await;
    let response = send(&app.router, raw_post("/api/webhooks/telegram", b"{}")).await;
    assert_status(&response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delivery_log_lists_recent_deliveries() {
    let app = test_app().await;
    send(
        &app.router,
        json_request(
            Method::POST,
            "/api/webhooks/website",
            &json!({"email": "a@example.com", "message": "quote please"}),
        ),
    )
    .await;
    send(&app.router, raw_post("/api/webhooks/facebook", b"{bad")).await;

    let response = send(&app.router, get("/api/webhooks/deliveries?limit=10")).await;
    assert_status(&response, StatusCode::OK);
    let rows = body_json(response).await;
    let rows = rows.as_array().expect("array");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["channel"], "facebook");
    assert_eq!(rows[0]["dropped"], 1);
    assert_eq!(rows[1]["channel"], "website");
    assert_eq!(rows[1]["applied"], 1);
}

#[tokio::test]
async fn large_delivery_is_acknowledged() {
    let app = test_app().await;
    let body = vec![b' '; 3 * 1024 * 1024];
    let response = send(&app.router, raw_post_owned("/api/webhooks/instagram", body)).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(body_text(response).await, ACK_BODY);
}

#[tokio::test]
async fn delivery_over_body_limit_is_acknowledged_and_logged() {
    let app = test_app_with_body_limit(1024).await;
    let payload = json!({"entry": [{"messaging": [{
        "sender": {"id": "u1"},
        "message": {"mid": "m1", "text": "x".repeat(4096)}
    }]}]});
    let body = serde_json::to_vec(&payload).expect("serialize");

    let response = send(&app.router, raw_post_owned("/api/webhooks/instagram", body)).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(body_text(response).await, ACK_BODY);
    assert_eq!(app.store.count_by(&LeadFilter::default()).await.expect("count"), 0);

    let rows = body_json(send(&app.router, get("/api/webhooks/deliveries")).await).await;
    let rows = rows.as_array().expect("array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["dropped"], 1);
    assert!(rows[0]["error"]
        .as_str()
        .is_some_and(|e| e.contains("over 1024 bytes")));
}

#[tokio::test]
async fn far_future_provider_timestamp_keeps_leads_readable() {
    let app = test_app().await;
    let payload = json!({"entry": [{"messaging": [{
        "sender": {"id": "u7"},
        "timestamp": 300_000_000_000_000_i64,
        "message": {"mid": "m7", "text": "hi"}
    }]}]});
    let response = send(
        &app.router,
        json_request(Method::POST, "/api/webhooks/instagram", &payload),
    )
    .await;
    assert_status(&response, StatusCode::OK);

    let response = send(&app.router, get("/api/leads")).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(body_json(response).await.as_array().map(Vec::len), Some(1));
}
