//! Staff-facing template API.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::leads::ApiError;
use super::AppState;
use crate::templates::store::{NewTemplate, TemplateFilter, TemplateUpdate};
use crate::templates::{Template, TemplateCategory, TemplatePlatform};

/// Query string of `GET /api/templates`.
#[derive(Debug, Default, Deserialize)]
pub struct TemplateQuery {
    /// Channel name; `all` templates are included.
    pub platform: Option<String>,
    /// Category name.
    pub category: Option<String>,
    /// `true` or `false`.
    pub is_active: Option<bool>,
}

impl TemplateQuery {
    fn into_filter(self) -> Result<TemplateFilter, ApiError> {
        Ok(TemplateFilter {
            platform: self
                .platform
                .as_deref()
                .map(TemplatePlatform::parse)
                .transpose()?,
            category: self
                .category
                .as_deref()
                .map(TemplateCategory::parse)
                .transpose()?,
            is_active: self.is_active,
        })
    }
}

/// `GET /api/templates`
pub async fn list_handler(
    State(state): State<AppState>,
    Query(query): Query<TemplateQuery>,
) -> Result<Json<Vec<Template>>, ApiError> {
    let filter = query.into_filter()?;
    Ok(Json(state.templates().list(&filter).await?))
}

/// `GET /api/templates/{id}`
pub async fn get_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Template>, ApiError> {
    Ok(Json(state.templates().require(&id).await?))
}

/// `POST /api/templates`
pub async fn create_handler(
    State(state): State<AppState>,
    Json(body): Json<NewTemplate>,
) -> Result<(StatusCode, Json<Template>), ApiError> {
    let template = state.templates().create(&body).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// `PUT|PATCH /api/templates/{id}`
pub async fn update_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TemplateUpdate>,
) -> Result<Json<Template>, ApiError> {
    Ok(Json(state.templates().update(&id, &body).await?))
}

/// `DELETE /api/templates/{id}`
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.templates().delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::TemplateNotFound(id))
    }
}
