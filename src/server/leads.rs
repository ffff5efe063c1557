//! Staff-facing lead API.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use super::AppState;
use crate::leads::store::{LeadFilter, LeadUpdate, NewLead};
use crate::leads::{Channel, EventKind, Lead, LeadError, LeadStatus, Qualification};
use crate::outbound::broadcast::{BroadcastReport, ContactError};
use crate::outbound::SendError;
use crate::templates::{Template, TemplateError};

/// Errors returned by the lead API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No such lead.
    #[error("lead not found: {0}")]
    NotFound(String),

    /// No such template.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// Request failed validation.
    #[error("{0}")]
    BadRequest(String),

    /// A lead for this identity already exists.
    #[error("{0}")]
    Conflict(String),

    /// The provider rejected or failed a send.
    #[error("{0}")]
    Upstream(String),

    /// The provider did not answer in time.
    #[error("{0}")]
    UpstreamTimeout(String),

    /// The store failed.
    #[error("store error: {0}")]
    Store(LeadError),

    /// The template store failed.
    #[error("store error: {0}")]
    TemplateStore(TemplateError),
}

impl From<LeadError> for ApiError {
    fn from(e: LeadError) -> Self {
        match e {
            LeadError::NotFound(id) => Self::NotFound(id),
            LeadError::Duplicate(_) => Self::Conflict(e.to_string()),
            LeadError::Invalid(_) | LeadError::InvalidEnum { .. } => Self::BadRequest(e.to_string()),
            other => Self::Store(other),
        }
    }
}

impl From<TemplateError> for ApiError {
    fn from(e: TemplateError) -> Self {
        match e {
            TemplateError::NotFound(id) => Self::TemplateNotFound(id),
            TemplateError::Duplicate(_) => Self::Conflict(e.to_string()),
            TemplateError::Invalid(_)
            | TemplateError::InvalidEnum { .. }
            | TemplateError::Unusable(_) => Self::BadRequest(e.to_string()),
            other => Self::TemplateStore(other),
        }
    }
}

impl From<ContactError> for ApiError {
    fn from(e: ContactError) -> Self {
        match e {
            ContactError::Send(SendError::NotConfigured(channel)) => {
                Self::BadRequest(format!("no sender configured for {channel}"))
            }
            ContactError::Send(e) => Self::Upstream(e.to_string()),
            ContactError::Timeout(_) => Self::UpstreamTimeout(e.to_string()),
            ContactError::Store(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) | ApiError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Store(e) => {
                error!(error = %e, "lead store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::TemplateStore(e) => {
                error!(error = %e, "template store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn non_blank(value: &str, what: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(format!("{what} is required")));
    }
    Ok(trimmed.to_owned())
}

// ── Listing and stats ───────────────────────────────────────────

/// Filter accepted as query string (list) or JSON (broadcast).
///
/// Enum values go through the lenient parsers, so `follow-up` is accepted as
/// a status.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Channel name.
    pub channel: Option<String>,
    /// Status name.
    pub status: Option<String>,
    /// Qualification tier.
    pub qualification: Option<String>,
    /// Interaction type.
    pub interaction_type: Option<String>,
    /// Substring over name, email and message.
    pub search: Option<String>,
    /// Page size.
    pub limit: Option<u32>,
}

impl ListQuery {
    fn into_filter(self) -> Result<LeadFilter, ApiError> {
        Ok(LeadFilter {
            channel: self.channel.as_deref().map(Channel::parse).transpose()?,
            status: self.status.as_deref().map(LeadStatus::parse).transpose()?,
            qualification: self
                .qualification
                .as_deref()
                .map(Qualification::parse)
                .transpose()?,
            interaction_type: self
                .interaction_type
                .as_deref()
                .map(EventKind::parse)
                .transpose()?,
            search: self.search,
            ids: None,
            limit: self.limit,
        })
    }
}

/// `GET /api/leads`
pub async fn list_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Lead>>, ApiError> {
    let filter = query.into_filter()?;
    Ok(Json(state.store().list(&filter).await?))
}

/// Lead counts by tier, channel and status.
#[derive(Debug, Serialize)]
pub struct LeadStats {
    /// All leads.
    pub total: u64,
    /// Per qualification tier.
    pub by_qualification: BTreeMap<&'static str, u64>,
    /// Per channel.
    pub by_channel: BTreeMap<&'static str, u64>,
    /// Per status.
    pub by_status: BTreeMap<&'static str, u64>,
}

/// `GET /api/leads/stats`
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<LeadStats>, ApiError> {
    let store = state.store();
    let mut stats = LeadStats {
        total: store.count_by(&LeadFilter::default()).await?,
        by_qualification: BTreeMap::new(),
        by_channel: BTreeMap::new(),
        by_status: BTreeMap::new(),
    };
    for qualification in Qualification::ALL {
        let filter = LeadFilter {
            qualification: Some(qualification),
            ..LeadFilter::default()
        };
        stats
            .by_qualification
            .insert(qualification.as_str(), store.count_by(&filter).await?);
    }
    for channel in Channel::ALL {
        let filter = LeadFilter {
            channel: Some(channel),
            ..LeadFilter::default()
        };
        stats
            .by_channel
            .insert(channel.as_str(), store.count_by(&filter).await?);
    }
    for status in LeadStatus::ALL {
        let filter = LeadFilter {
            status: Some(status),
            ..LeadFilter::default()
        };
        stats
            .by_status
            .insert(status.as_str(), store.count_by(&filter).await?);
    }
    Ok(Json(stats))
}

// ── CRUD ────────────────────────────────────────────────────────

/// `GET /api/leads/{id}`
pub async fn get_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Lead>, ApiError> {
    state
        .store()
        .get(&id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

/// `POST /api/leads`
pub async fn create_handler(
    State(state): State<AppState>,
    Json(body): Json<NewLead>,
) -> Result<(StatusCode, Json<Lead>), ApiError> {
    let lead = state.store().create(&body).await?;
    Ok((StatusCode::CREATED, Json(lead)))
}

/// `PATCH /api/leads/{id}`
pub async fn update_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<LeadUpdate>,
) -> Result<Json<Lead>, ApiError> {
    Ok(Json(state.store().update(&id, &body).await?))
}

/// `DELETE /api/leads/{id}`
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.store().delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(id))
    }
}

/// Body of `POST /api/leads/{id}/notes`.
#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    /// Note text.
    pub text: String,
    /// Staff member adding the note.
    #[serde(default)]
    pub created_by: Option<String>,
}

/// `POST /api/leads/{id}/notes`
pub async fn add_note_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<NoteRequest>,
) -> Result<Json<Lead>, ApiError> {
    let text = non_blank(&body.text, "text")?;
    let lead = state
        .store()
        .append_note(&id, &text, body.created_by.as_deref())
        .await?;
    Ok(Json(lead))
}

// ── Sending ─────────────────────────────────────────────────────

/// Body of `POST /api/leads/{id}/send`.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    /// Message text.
    #[serde(default)]
    pub message: Option<String>,
    /// Template to send instead of `message`.
    #[serde(default)]
    pub template_id: Option<String>,
}

async fn load_template(
    state: &AppState,
    template_id: Option<&str>,
) -> Result<Option<Template>, ApiError> {
    match template_id {
        Some(id) => Ok(Some(state.templates().require(id).await?)),
        None => Ok(None),
    }
}

/// `POST /api/leads/{id}/send`
pub async fn send_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SendRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let lead = state
        .store()
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(id.clone()))?;
    let text = match load_template(&state, body.template_id.as_deref()).await? {
        Some(template) => template.text_for(lead.channel)?.to_owned(),
        None => non_blank(body.message.as_deref().unwrap_or_default(), "message")?,
    };
    let (lead, message_id) = state.broadcaster().send_to_lead(&lead, &text).await?;
    Ok(Json(json!({ "message_id": message_id, "lead": lead })))
}

/// Body of `POST /api/broadcast`.
#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    /// Message text.
    #[serde(default)]
    pub message: Option<String>,
    /// Template to send instead of `message`. Leads on channels the
    /// template does not target are skipped.
    #[serde(default)]
    pub template_id: Option<String>,
    /// Explicit recipients. Wins over `filter`.
    #[serde(default)]
    pub lead_ids: Option<Vec<String>>,
    /// Recipient filter.
    #[serde(default)]
    pub filter: Option<ListQuery>,
}

/// `POST /api/broadcast`
pub async fn broadcast_handler(
    State(state): State<AppState>,
    Json(body): Json<BroadcastRequest>,
) -> Result<Json<BroadcastReport>, ApiError> {
    let template = load_template(&state, body.template_id.as_deref()).await?;
    let text = match &template {
        Some(template) => template.active_text()?.to_owned(),
        None => non_blank(body.message.as_deref().unwrap_or_default(), "message")?,
    };
    let filter = match (body.lead_ids, body.filter) {
        (Some(ids), _) => LeadFilter {
            ids: Some(ids),
            ..LeadFilter::default()
        },
        (None, Some(filter)) => filter.into_filter()?,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "lead_ids or filter is required".to_owned(),
            ))
        }
    };
    let mut leads = state.store().list(&filter).await?;
    if let Some(template) = &template {
        leads.retain(|lead| template.platform.covers(lead.channel));
    }
    if leads.is_empty() {
        return Err(ApiError::BadRequest("no leads matched".to_owned()));
    }
    Ok(Json(state.broadcaster().broadcast(&leads, &text).await))
}
