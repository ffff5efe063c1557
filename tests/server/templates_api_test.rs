//! Tests for `src/server/templates.rs` and template-backed sends.

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};

use leadflow::leads::store::LeadStore;
use leadflow::leads::Channel;
use leadflow::templates::store::NewTemplate;
use leadflow::templates::{TemplateCategory, TemplatePlatform};

use crate::common::message_upsert;
use crate::support::{
    assert_status, body_json, delete, get, json_request, send, test_app, TestApp,
};

async fn create(app: &TestApp, body: Value) -> Value {
    let response = send(
        &app.router,
        json_request(Method::POST, "/api/templates", &body),
    )
    .await;
    assert_status(&response, StatusCode::CREATED);
    body_json(response).await
}

async fn seed_lead(app: &TestApp, channel: Channel, user: &str) -> String {
    app.store
        .upsert(&message_upsert(channel, user, Some("Tess"), "hi"))
        .await
        .expect("upsert")
        .lead
        .id
}

fn names(list: &Value) -> Vec<String> {
    let mut names: Vec<String> = list
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|t| t["name"].as_str().map(str::to_owned))
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn create_then_fetch_template() {
    let app = test_app().await;
    let created = create(
        &app,
        json!({
            "name": "Welcome",
            "category": "greeting",
            "message": "Thanks for reaching out!",
            "variables": [{"name": "name", "placeholder": "{{name}}"}]
        }),
    )
    .await;
    assert_eq!(created["platform"], "all");
    assert_eq!(created["is_active"], true);
    assert_eq!(created["variables"][0]["placeholder"], "{{name}}");

    let id = created["id"].as_str().expect("id");
    let response = send(&app.router, get(&format!("/api/templates/{id}"))).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(body_json(response).await["message"], "Thanks for reaching out!");
}

#[tokio::test]
async fn duplicate_name_conflicts_and_blank_message_is_rejected() {
    let app = test_app().await;
    let body = json!({"name": "Promo", "category": "promotional", "message": "10% off"});
    create(&app, body.clone()).await;

    let again = send(
        &app.router,
        json_request(Method::POST, "/api/templates", &body),
    )
    .await;
    assert_status(&again, StatusCode::CONFLICT);

    let blank = send(
        &app.router,
        json_request(
            Method::POST,
            "/api/templates",
            &json!({"name": "Empty", "category": "support", "message": "   "}),
        ),
    )
    .await;
    assert_status(&blank, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_filters_by_platform_category_and_active_flag() {
    let app = test_app().await;
    create(
        &app,
        json!({"name": "Any", "category": "greeting", "message": "hello"}),
    )
    .await;
    create(
        &app,
        json!({"name": "IG", "category": "greeting", "message": "hey", "platform": "instagram"}),
    )
    .await;
    create(
        &app,
        json!({"name": "Mail", "category": "reminder", "message": "see you", "platform": "email"}),
    )
    .await;
    create(
        &app,
        json!({"name": "Old", "category": "reminder", "message": "bye", "is_active": false}),
    )
    .await;

    let response = send(&app.router, get("/api/templates?platform=instagram")).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(names(&body_json(response).await), ["Any", "IG", "Old"]);

    let response = send(&app.router, get("/api/templates?category=reminder")).await;
    assert_eq!(names(&body_json(response).await), ["Mail", "Old"]);

    let response = send(&app.router, get("/api/templates?is_active=false")).await;
    assert_eq!(names(&body_json(response).await), ["Old"]);

    let response = send(&app.router, get("/api/templates?platform=myspace")).await;
    assert_status(&response, StatusCode::BAD_REQUEST);
    let response = send(&app.router, get("/api/templates?category=spam")).await;
    assert_status(&response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn put_and_patch_update_only_given_fields() {
    let app = test_app().await;
    let created = create(
        &app,
        json!({"name": "Follow", "category": "follow_up", "message": "checking in"}),
    )
    .await;
    let id = created["id"].as_str().expect("id");
    let uri = format!("/api/templates/{id}");

    let response = send(
        &app.router,
        json_request(Method::PATCH, &uri, &json!({"is_active": false})),
    )
    .await;
    assert_status(&response, StatusCode::OK);
    let patched = body_json(response).await;
    assert_eq!(patched["is_active"], false);
    assert_eq!(patched["message"], "checking in");

    let response = send(
        &app.router,
        json_request(
            Method::PUT,
            &uri,
            &json!({"message": "still interested?", "platform": "facebook"}),
        ),
    )
    .await;
    assert_status(&response, StatusCode::OK);
    let updated = body_json(response).await;
    assert_eq!(updated["message"], "still interested?");
    assert_eq!(updated["platform"], "facebook");
    assert_eq!(updated["name"], "Follow");
    assert_eq!(updated["is_active"], false);

    let missing = send(
        &app.router,
        json_request(Method::PATCH, "/api/templates/missing", &json!({"name": "x"})),
    )
    .await;
    assert_status(&missing, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_removes_template() {
    let app = test_app().await;
    let created = create(
        &app,
        json!({"name": "Gone", "category": "support", "message": "we're on it"}),
    )
    .await;
    let uri = format!("/api/templates/{}", created["id"].as_str().expect("id"));

    assert_status(&send(&app.router, delete(&uri)).await, StatusCode::NO_CONTENT);
    assert_status(&send(&app.router, get(&uri)).await, StatusCode::NOT_FOUND);
    assert_status(&send(&app.router, delete(&uri)).await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn send_with_template_uses_its_text() {
    let app = test_app().await;
    let template = app
        .templates
        .create(&NewTemplate {
            name: "Price list".to_owned(),
            category: TemplateCategory::Promotional,
            subject: None,
            message: "Our prices start at $20".to_owned(),
            platform: TemplatePlatform::Facebook,
            variables: Vec::new(),
            is_active: None,
        })
        .await
        .expect("create template");
    let id = seed_lead(&app, Channel::Facebook, "f1").await;

    let response = send(
        &app.router,
        json_request(
            Method::POST,
            &format!("/api/leads/{id}/send"),
            &json!({"template_id": template.id}),
        ),
    )
    .await;
    assert_status(&response, StatusCode::OK);
    let body = body_json(response).await;
    let last_note = body["lead"]["notes"]
        .as_array()
        .and_then(|notes| notes.last())
        .cloned()
        .unwrap_or(Value::Null);
    assert_eq!(last_note["text"], "Sent Facebook message: Our prices start at $20");
    assert_eq!(
        app.sender.sent().last().map(|m| m.text.clone()),
        Some("Our prices start at $20".to_owned())
    );
}

#[tokio::test]
async fn unusable_or_unknown_template_is_rejected() {
    let app = test_app().await;
    let lead = seed_lead(&app, Channel::Instagram, "i1").await;
    let email_only = create(
        &app,
        json!({"name": "Mail", "category": "reminder", "message": "see you", "platform": "email"}),
    )
    .await;
    let inactive = create(
        &app,
        json!({"name": "Old", "category": "greeting", "message": "hi", "is_active": false}),
    )
    .await;
    let uri = format!("/api/leads/{lead}/send");

    for template in [&email_only, &inactive] {
        let response = send(
            &app.router,
            json_request(Method::POST, &uri, &json!({"template_id": template["id"]})),
        )
        .await;
        assert_status(&response, StatusCode::BAD_REQUEST);
    }

    let unknown = send(
        &app.router,
        json_request(Method::POST, &uri, &json!({"template_id": "missing"})),
    )
    .await;
    assert_status(&unknown, StatusCode::NOT_FOUND);
    assert!(app.sender.sent().is_empty());
}

#[tokio::test]
async fn broadcast_with_template_skips_other_channels() {
    let app = test_app().await;
    let ig = seed_lead(&app, Channel::Instagram, "b1").await;
    let fb = seed_lead(&app, Channel::Facebook, "b2").await;
    let template = create(
        &app,
        json!({"name": "IG promo", "category": "promotional", "message": "Reels sale", "platform": "instagram"}),
    )
    .await;

    let response = send(
        &app.router,
        json_request(
            Method::POST,
            "/api/broadcast",
            &json!({"template_id": template["id"], "lead_ids": [ig, fb]}),
        ),
    )
    .await;
    assert_status(&response, StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["total"], 1);
    assert_eq!(report["sent"], 1);
    assert_eq!(app.sender.sent().len(), 1);

    let fb_only = send(
        &app.router,
        json_request(
            Method::POST,
            "/api/broadcast",
            &json!({"template_id": template["id"], "lead_ids": [fb]}),
        ),
    )
    .await;
    assert_status(&fb_only, StatusCode::BAD_REQUEST);
}
