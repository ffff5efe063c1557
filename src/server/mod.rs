//! HTTP server.
//!
//! # Endpoints
//!
//! - `GET /api/webhooks/{channel}` - subscription verification handshake
//! - `POST /api/webhooks/{channel}` - event delivery (always `200 EVENT_RECEIVED`)
//! - `GET /api/webhooks/deliveries` - recent delivery log rows
//! - `GET|POST /api/leads`, `GET /api/leads/stats`,
//!   `GET|PATCH|DELETE /api/leads/{id}`, `POST /api/leads/{id}/notes`,
//!   `POST /api/leads/{id}/send` - staff lead API
//! - `POST /api/broadcast` - paced broadcast to selected leads
//! - `GET|POST /api/templates`, `GET|PUT|PATCH|DELETE /api/templates/{id}` -
//!   message templates
//! - `GET /health` - liveness

pub mod leads;
pub mod templates;
pub mod webhook;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::leads::store::LeadStore;
use crate::outbound::broadcast::Broadcaster;
use crate::pipeline::router::EventRouter;
use crate::templates::store::SqliteTemplateStore;

/// Shared application state, passed to handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    router: EventRouter,
    store: Arc<dyn LeadStore>,
    broadcaster: Broadcaster,
    templates: SqliteTemplateStore,
    webhook_body_limit: usize,
}

/// Largest delivery body read before it is discarded unprocessed.
pub const DEFAULT_WEBHOOK_BODY_LIMIT: usize = 10_485_760;

impl AppState {
    /// Creates a new `AppState`.
    pub fn new(
        router: EventRouter,
        store: Arc<dyn LeadStore>,
        broadcaster: Broadcaster,
        templates: SqliteTemplateStore,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                router,
                store,
                broadcaster,
                templates,
                webhook_body_limit: DEFAULT_WEBHOOK_BODY_LIMIT,
            }),
        }
    }

    /// Replaces the webhook body limit.
    pub fn with_webhook_body_limit(self, bytes: usize) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                router: self.inner.router.clone(),
                store: Arc::clone(&self.inner.store),
                broadcaster: self.inner.broadcaster.clone(),
                templates: self.inner.templates.clone(),
                webhook_body_limit: bytes,
            }),
        }
    }

    /// Returns the event router.
    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    /// Returns the lead store.
    pub fn store(&self) -> &Arc<dyn LeadStore> {
        &self.inner.store
    }

    /// Returns the broadcaster.
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.inner.broadcaster
    }

    /// Returns the template store.
    pub fn templates(&self) -> &SqliteTemplateStore {
        &self.inner.templates
    }

    /// Largest webhook body the delivery handler reads.
    pub fn webhook_body_limit(&self) -> usize {
        self.inner.webhook_body_limit
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::extract::DefaultBodyLimit;
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/api/webhooks/deliveries", get(webhook::deliveries_handler))
        .route(
            "/api/webhooks/{channel}",
            get(webhook::verify_handler)
                .post(webhook::deliver_handler)
                .layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/api/leads",
            get(leads::list_handler).post(leads::create_handler),
        )
        .route("/api/leads/stats", get(leads::stats_handler))
        .route(
            "/api/leads/{id}",
            get(leads::get_handler)
                .patch(leads::update_handler)
                .delete(leads::delete_handler),
        )
        .route("/api/leads/{id}/notes", post(leads::add_note_handler))
        .route("/api/leads/{id}/send", post(leads::send_handler))
        .route("/api/broadcast", post(leads::broadcast_handler))
        .route(
            "/api/templates",
            get(templates::list_handler).post(templates::create_handler),
        )
        .route(
            "/api/templates/{id}",
            get(templates::get_handler)
                .put(templates::update_handler)
                .patch(templates::update_handler)
                .delete(templates::delete_handler),
        )
        .with_state(app_state)
}

/// Liveness check.
pub async fn health_handler() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// Resolves on ctrl-c or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received ctrl-c"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
    tracing::info!("shutting down");
}
