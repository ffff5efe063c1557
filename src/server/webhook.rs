//! Provider webhook endpoints.
//!
//! Verification answers with a precise status. Delivery always answers
//! `200 EVENT_RECEIVED`, whatever happened inside, because providers disable
//! subscriptions that keep failing.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{error, warn};

use super::AppState;
use crate::leads::Channel;
use crate::pipeline::router::VerifyQuery;
use crate::pipeline::PipelineError;

/// Literal body of every delivery acknowledgment.
pub const ACK_BODY: &str = "EVENT_RECEIVED";

/// Default and maximum row counts for the delivery log endpoint.
const DEFAULT_DELIVERIES: u32 = 50;
const MAX_DELIVERIES: u32 = 500;

fn unknown_channel(raw: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("unknown channel: {raw}")).into_response()
}

/// `GET /api/webhooks/{channel}`: echo `hub.challenge` when the token matches.
///
/// - 200 with the challenge as plain text on success
/// - 400 when `hub.mode` or `hub.verify_token` is missing
/// - 403 on mismatch
/// - 404 for channels without a handshake
pub async fn verify_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    let parsed = match Channel::parse(&channel) {
        Ok(parsed) if parsed.uses_graph_webhooks() => parsed,
        _ => return unknown_channel(&channel),
    };
    match state.router().verify(parsed, &query) {
        Ok(challenge) => (StatusCode::OK, challenge).into_response(),
        Err(e @ PipelineError::MissingVerificationParams(_)) => {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => (StatusCode::FORBIDDEN, e.to_string()).into_response(),
    }
}

/// `POST /api/webhooks/{channel}`: process a delivery and acknowledge.
///
/// The body is read up to [`AppState::webhook_body_limit`]; a larger or
/// unreadable body is discarded but still acknowledged. Processing runs on its
/// own task; a panic there still yields the acknowledgment.
pub async fn deliver_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    body: Body,
) -> Response {
    let Ok(parsed) = Channel::parse(&channel) else {
        return unknown_channel(&channel);
    };
    let router = state.router().clone();
    let limit = state.webhook_body_limit();
    let body = match axum::body::to_bytes(body, limit).await {
        Ok(body) => body,
        Err(e) => {
            router
                .discard(parsed, format!("body unreadable or over {limit} bytes: {e}"))
                .await;
            return (StatusCode::OK, ACK_BODY).into_response();
        }
    };
    let task = tokio::spawn(async move { router.deliver(parsed, &body).await });
    match task.await {
        Ok(report) if report.failed > 0 => {
            warn!(channel = %parsed, failed = report.failed, "delivery had persistence failures");
        }
        Ok(_) => {}
        Err(e) => error!(channel = %parsed, error = %e, "delivery task aborted"),
    }
    (StatusCode::OK, ACK_BODY).into_response()
}

/// Query parameters for [`deliveries_handler`].
#[derive(Debug, Default, Deserialize)]
pub struct DeliveriesQuery {
    /// Rows to return.
    pub limit: Option<u32>,
}

/// `GET /api/webhooks/deliveries`: most recent delivery summaries.
pub async fn deliveries_handler(
    State(state): State<AppState>,
    Query(query): Query<DeliveriesQuery>,
) -> Response {
    let Some(log) = state.router().delivery_log() else {
        return Json(Vec::<crate::pipeline::delivery_log::DeliveryRecord>::new()).into_response();
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_DELIVERIES)
        .clamp(1, MAX_DELIVERIES);
    match log.recent(limit).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            error!(error = %e, "failed to read delivery log");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
