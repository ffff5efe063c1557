//! Template persistence in the lead database.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::info;

use super::{Template, TemplateCategory, TemplateError, TemplatePlatform, TemplateVariable};
use crate::leads::format_timestamp;

const TEMPLATE_COLUMNS: &str =
    "id, name, category, subject, message, platform, variables, is_active, created_at, updated_at";

/// Template listing filter. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct TemplateFilter {
    /// Channel-specific platform; `All` templates always match too.
    pub platform: Option<TemplatePlatform>,
    /// Exact category.
    pub category: Option<TemplateCategory>,
    /// Active flag.
    pub is_active: Option<bool>,
}

/// Staff-created template.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTemplate {
    /// Unique name.
    pub name: String,
    /// Use category.
    pub category: TemplateCategory,
    /// Email subject line.
    #[serde(default)]
    pub subject: Option<String>,
    /// Message text.
    pub message: String,
    /// Target channel, `all` when omitted.
    #[serde(default)]
    pub platform: TemplatePlatform,
    /// Variable slots.
    #[serde(default)]
    pub variables: Vec<TemplateVariable>,
    /// Defaults to active.
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Partial template update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TemplateUpdate {
    /// New name.
    pub name: Option<String>,
    /// New category.
    pub category: Option<TemplateCategory>,
    /// New subject line.
    pub subject: Option<String>,
    /// New message text.
    pub message: Option<String>,
    /// New target channel.
    pub platform: Option<TemplatePlatform>,
    /// Replacement variable list.
    pub variables: Option<Vec<TemplateVariable>>,
    /// New active flag.
    pub is_active: Option<bool>,
}

#[derive(Debug, sqlx::FromRow)]
struct TemplateRow {
    id: String,
    name: String,
    category: String,
    subject: Option<String>,
    message: String,
    platform: String,
    variables: String,
    is_active: bool,
    created_at: String,
    updated_at: String,
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, TemplateError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| TemplateError::InvalidTimestamp(raw.to_owned()))
}

impl TryFrom<TemplateRow> for Template {
    type Error = TemplateError;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        Ok(Self {
            category: TemplateCategory::parse(&row.category)?,
            platform: TemplatePlatform::parse(&row.platform)?,
            variables: serde_json::from_str(&row.variables)?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
            id: row.id,
            name: row.name,
            subject: row.subject,
            message: row.message,
            is_active: row.is_active,
        })
    }
}

fn required(value: &str, field: &str) -> Result<String, TemplateError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TemplateError::Invalid(format!("{field} is required")));
    }
    Ok(trimmed.to_owned())
}

fn optional_required(value: Option<&str>, field: &str) -> Result<Option<String>, TemplateError> {
    value.map(|v| required(v, field)).transpose()
}

/// Map a unique-name violation to [`TemplateError::Duplicate`].
fn name_conflict(err: sqlx::Error, name: &str) -> TemplateError {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            TemplateError::Duplicate(name.to_owned())
        }
        other => other.into(),
    }
}

/// SQLite-backed template store sharing the lead pool.
#[derive(Debug, Clone)]
pub struct SqliteTemplateStore {
    db: SqlitePool,
}

impl SqliteTemplateStore {
    /// Create a store over an already-migrated pool.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Templates matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is corrupt.
    pub async fn list(&self, filter: &TemplateFilter) -> Result<Vec<Template>, TemplateError> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {TEMPLATE_COLUMNS} FROM message_templates WHERE 1 = 1"
        ));
        if let Some(platform) = filter.platform {
            builder
                .push(" AND (platform = ")
                .push_bind(platform.as_str())
                .push(" OR platform = 'all')");
        }
        if let Some(category) = filter.category {
            builder
                .push(" AND category = ")
                .push_bind(category.as_str());
        }
        if let Some(is_active) = filter.is_active {
            builder.push(" AND is_active = ").push_bind(is_active);
        }
        builder.push(" ORDER BY created_at DESC, id ASC");
        let rows: Vec<TemplateRow> = builder.build_query_as().fetch_all(&self.db).await?;
        rows.into_iter().map(Template::try_from).collect()
    }

    /// Fetch one template.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row is corrupt.
    pub async fn get(&self, id: &str) -> Result<Option<Template>, TemplateError> {
        let row: Option<TemplateRow> = sqlx::query_as(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM message_templates WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(Template::try_from).transpose()
    }

    /// Fetch one template or fail with [`TemplateError::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::NotFound`] for unknown ids.
    pub async fn require(&self, id: &str) -> Result<Template, TemplateError> {
        self.get(id)
            .await?
            .ok_or_else(|| TemplateError::NotFound(id.to_owned()))
    }

    /// Insert a template.
    ///
    /// # Errors
    ///
    /// - [`TemplateError::Invalid`] for a blank name or message
    /// - [`TemplateError::Duplicate`] when the name is taken
    pub async fn create(&self, template: &NewTemplate) -> Result<Template, TemplateError> {
        let name = required(&template.name, "name")?;
        let message = required(&template.message, "message")?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = format_timestamp(Utc::now());
        let variables = serde_json::to_string(&template.variables)?;

        sqlx::query(
            "INSERT INTO message_templates (id, name, category, subject, message, platform, \
             variables, is_active, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        )
        .bind(&id)
        .bind(&name)
        .bind(template.category.as_str())
        .bind(&template.subject)
        .bind(&message)
        .bind(template.platform.as_str())
        .bind(&variables)
        .bind(template.is_active.unwrap_or(true))
        .bind(&now)
        .execute(&self.db)
        .await
        .map_err(|e| name_conflict(e, &name))?;

        info!(template_id = %id, name = %name, "template created");
        self.require(&id).await
    }

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// - [`TemplateError::NotFound`] for unknown ids
    /// - [`TemplateError::Invalid`] for a blank name or message
    /// - [`TemplateError::Duplicate`] when renaming onto a taken name
    pub async fn update(&self, id: &str, update: &TemplateUpdate) -> Result<Template, TemplateError> {
        let name = optional_required(update.name.as_deref(), "name")?;
        let message = optional_required(update.message.as_deref(), "message")?;
        let variables = update
            .variables
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            "UPDATE message_templates SET \
               name = COALESCE(?1, name), \
               category = COALESCE(?2, category), \
               subject = COALESCE(?3, subject), \
               message = COALESCE(?4, message), \
               platform = COALESCE(?5, platform), \
               variables = COALESCE(?6, variables), \
               is_active = COALESCE(?7, is_active), \
               updated_at = ?8 \
             WHERE id = ?9",
        )
        .bind(&name)
        .bind(update.category.map(|c| c.as_str()))
        .bind(&update.subject)
        .bind(&message)
        .bind(update.platform.map(|p| p.as_str()))
        .bind(&variables)
        .bind(update.is_active)
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .execute(&self.db)
        .await
        .map_err(|e| name_conflict(e, name.as_deref().unwrap_or_default()))?;

        if result.rows_affected() == 0 {
            return Err(TemplateError::NotFound(id.to_owned()));
        }
        info!(template_id = id, "template updated");
        self.require(id).await
    }

    /// Delete a template. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn delete(&self, id: &str) -> Result<bool, TemplateError> {
        let result = sqlx::query("DELETE FROM message_templates WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(template_id = id, "template deleted");
        }
        Ok(deleted)
    }
}
