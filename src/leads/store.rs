//! Lead persistence.
//!
//! [`LeadStore`] is the seam the pipeline and the staff API depend on;
//! [`SqliteLeadStore`] is the production implementation.
//!
//! # Atomic upsert
//!
//! Providers retry and batch deliveries, so two events for the same identity
//! may be processed concurrently, possibly by different processes. The merge
//! is therefore never a read-modify-write in application code: [`LeadUpsert`]
//! describes the merge declaratively and the store applies it with a single
//! `INSERT .. ON CONFLICT DO UPDATE .. RETURNING` statement, appending the
//! event note in the same transaction. Counter increments and note appends
//! from concurrent deliveries are all preserved.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info, trace};

use super::{
    format_timestamp, is_placeholder_name, parse_timestamp, placeholder_name, Channel, EventKind,
    Identity, Lead, LeadError, LeadStatus, Note, Qualification, ReplyKind,
};

/// Schema migrations, applied in order by [`migrate`].
const MIGRATIONS: &[(&str, &str)] = &[
    ("001_leads", include_str!("../../migrations/001_leads.sql")),
    ("002_templates", include_str!("../../migrations/002_templates.sql")),
];

/// Column list shared by every `SELECT` / `RETURNING` of a lead row.
const LEAD_COLUMNS: &str = "id, channel, channel_user_id, display_name, name_is_placeholder, \
     email, phone, message, status, qualification, interaction_type, interaction_count, \
     last_interaction_at, is_follower, has_commented, has_mentioned, auto_reply_sent, \
     welcome_sent, comment_reply_sent, mention_reply_sent, metadata, tags, \
     last_contacted_at, created_at, updated_at";

/// Default page size for [`LeadStore::list`].
pub const DEFAULT_LIST_LIMIT: u32 = 200;

// ---------------------------------------------------------------------------
// Write descriptions
// ---------------------------------------------------------------------------

/// A declarative find-or-create-and-merge applied atomically per identity.
///
/// On insert the lead is created with `status = new`, the seeded
/// qualification, `interaction_type = kind` and a count of one. On conflict:
/// - `interaction_count` is incremented,
/// - `last_interaction_at` becomes the max of stored and `occurred_at`,
/// - `message` is overwritten only when `message` is `Some`,
/// - the kind-specific engagement flag is set,
/// - `display_name` is upgraded only from a placeholder to a real name,
/// - email/phone fill in only when previously unknown,
/// - `metadata` keys are merged (incoming wins).
///
/// `note` is appended in both cases.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadUpsert {
    /// Natural key.
    pub identity: Identity,
    /// Sender name, or `None` to use the channel placeholder.
    pub display_name: Option<String>,
    /// Email anchor, if the event carried one.
    pub email: Option<String>,
    /// Phone anchor, if the event carried one.
    pub phone: Option<String>,
    /// Kind of the event being applied.
    pub kind: EventKind,
    /// Text that replaces the lead's most recent message.
    pub message: Option<String>,
    /// Message stored on a newly created lead when `message` is `None`.
    pub initial_message: String,
    /// Audit note appended for this event.
    pub note: String,
    /// Event timestamp.
    pub occurred_at: DateTime<Utc>,
    /// Provider-specific extras to merge.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Result of an upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    /// The lead after the merge, notes included.
    pub lead: Lead,
    /// Whether this upsert created the lead.
    pub created: bool,
}

/// A lead created directly by staff.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLead {
    /// Channel; defaults to `website`.
    pub channel: Option<Channel>,
    /// Provider id; falls back to email/phone.
    pub channel_user_id: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Phone number.
    pub phone: Option<String>,
    /// Initial message.
    pub message: Option<String>,
    /// Initial status; defaults to `new`.
    pub status: Option<LeadStatus>,
    /// Initial qualification; defaults to `cold`.
    pub qualification: Option<Qualification>,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Staff edits to an existing lead. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New email.
    pub email: Option<String>,
    /// New phone.
    pub phone: Option<String>,
    /// New status.
    pub status: Option<LeadStatus>,
    /// New qualification.
    pub qualification: Option<Qualification>,
    /// Replacement tag list.
    pub tags: Option<Vec<String>>,
}

/// Query filter shared by [`LeadStore::list`] and [`LeadStore::count_by`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LeadFilter {
    /// Restrict to one channel.
    pub channel: Option<Channel>,
    /// Restrict to one status.
    pub status: Option<LeadStatus>,
    /// Restrict to one qualification tier.
    pub qualification: Option<Qualification>,
    /// Restrict to one interaction type.
    pub interaction_type: Option<EventKind>,
    /// Case-insensitive substring over name, email and message.
    pub search: Option<String>,
    /// Restrict to these lead ids.
    pub ids: Option<Vec<String>>,
    /// Maximum rows returned by `list`.
    pub limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Persistent keyed lead set.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Look up a lead by its natural key.
    async fn find_by_identity(&self, identity: &Identity) -> Result<Option<Lead>, LeadError>;

    /// Look up a lead by record id.
    async fn get(&self, id: &str) -> Result<Option<Lead>, LeadError>;

    /// Atomically find-or-create the lead for `upsert.identity` and merge.
    async fn upsert(&self, upsert: &LeadUpsert) -> Result<UpsertOutcome, LeadError>;

    /// Append a note to an existing lead.
    async fn append_note(
        &self,
        id: &str,
        text: &str,
        created_by: Option<&str>,
    ) -> Result<Lead, LeadError>;

    /// Flip a reply marker from unset to sent.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// marker was already set.
    async fn mark_reply_sent(&self, id: &str, kind: ReplyKind) -> Result<bool, LeadError>;

    /// Record a staff or broadcast contact: appends `note`, bumps the
    /// interaction count and contact timestamps, and optionally moves a `new`
    /// lead to `contacted`.
    async fn record_contact(
        &self,
        id: &str,
        note: &str,
        mark_contacted: bool,
    ) -> Result<Lead, LeadError>;

    /// Count leads matching `filter` (`limit` is ignored).
    async fn count_by(&self, filter: &LeadFilter) -> Result<u64, LeadError>;

    /// List leads matching `filter`, newest first.
    async fn list(&self, filter: &LeadFilter) -> Result<Vec<Lead>, LeadError>;

    /// Create a lead directly.
    async fn create(&self, lead: &NewLead) -> Result<Lead, LeadError>;

    /// Apply staff edits.
    async fn update(&self, id: &str, update: &LeadUpdate) -> Result<Lead, LeadError>;

    /// Delete a lead and its notes. Returns `false` if it did not exist.
    async fn delete(&self, id: &str) -> Result<bool, LeadError>;
}

// ---------------------------------------------------------------------------
// Pool setup
// ---------------------------------------------------------------------------

/// Open a SQLite pool for the lead database, creating the file if missing.
///
/// WAL mode lets readers proceed while a writer holds the upsert transaction;
/// the busy timeout makes concurrent writers queue instead of failing.
///
/// # Errors
///
/// Returns [`LeadError::Database`] if the database cannot be opened.
pub async fn open_pool(path: &str, max_connections: u32) -> Result<SqlitePool, LeadError> {
    let opts = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10));
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(opts)
        .await?;
    info!(path, max_connections, "lead database opened");
    Ok(pool)
}

/// Apply all schema migrations. Idempotent.
///
/// # Errors
///
/// Returns [`LeadError::Database`] if a migration fails.
pub async fn migrate(pool: &SqlitePool) -> Result<(), LeadError> {
    for (name, sql) in MIGRATIONS {
        sqlx::raw_sql(sql).execute(pool).await?;
        debug!(migration = name, "migration applied");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

/// Row shape of the `leads` table.
#[derive(Debug, sqlx::FromRow)]
struct LeadRow {
    id: String,
    channel: String,
    channel_user_id: String,
    display_name: String,
    name_is_placeholder: bool,
    email: Option<String>,
    phone: Option<String>,
    message: Option<String>,
    status: String,
    qualification: String,
    interaction_type: String,
    interaction_count: i64,
    last_interaction_at: Option<String>,
    is_follower: bool,
    has_commented: bool,
    has_mentioned: bool,
    auto_reply_sent: bool,
    welcome_sent: bool,
    comment_reply_sent: bool,
    mention_reply_sent: bool,
    metadata: String,
    tags: String,
    last_contacted_at: Option<String>,
    created_at: String,
    updated_at: String,
}

/// Row shape of the `lead_notes` table.
type NoteRow = (String, String, Option<String>);

impl LeadRow {
    fn into_lead(self, notes: Vec<Note>) -> Result<Lead, LeadError> {
        Ok(Lead {
            id: self.id,
            channel: Channel::parse(&self.channel)?,
            channel_user_id: self.channel_user_id,
            display_name: self.display_name,
            name_is_placeholder: self.name_is_placeholder,
            email: self.email,
            phone: self.phone,
            message: self.message,
            status: LeadStatus::parse(&self.status)?,
            qualification: Qualification::parse(&self.qualification)?,
            interaction_type: EventKind::parse(&self.interaction_type)?,
            interaction_count: u64::try_from(self.interaction_count).unwrap_or(0),
            last_interaction_at: self
                .last_interaction_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            is_follower: self.is_follower,
            has_commented: self.has_commented,
            has_mentioned: self.has_mentioned,
            auto_reply_sent: self.auto_reply_sent,
            welcome_sent: self.welcome_sent,
            comment_reply_sent: self.comment_reply_sent,
            mention_reply_sent: self.mention_reply_sent,
            metadata: serde_json::from_str(&self.metadata)?,
            tags: serde_json::from_str(&self.tags)?,
            notes,
            last_contacted_at: self
                .last_contacted_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

/// SQLite-backed [`LeadStore`].
#[derive(Debug, Clone)]
pub struct SqliteLeadStore {
    db: SqlitePool,
}

impl SqliteLeadStore {
    /// Wrap an already-migrated pool.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Returns a reference to the underlying SQLite pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    async fn load<'e, E>(executor: E, id: &str) -> Result<Option<LeadRow>, LeadError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let sql = format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1");
        Ok(sqlx::query_as::<_, LeadRow>(&sql)
            .bind(id)
            .fetch_optional(executor)
            .await?)
    }

    async fn load_notes<'e, E>(executor: E, id: &str) -> Result<Vec<Note>, LeadError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let rows: Vec<NoteRow> = sqlx::query_as(
            "SELECT text, created_at, created_by FROM lead_notes \
             WHERE lead_id = ?1 ORDER BY id ASC",
        )
        .bind(id)
        .fetch_all(executor)
        .await?;
        rows.into_iter()
            .map(|(text, created_at, created_by)| {
                Ok(Note {
                    text,
                    created_at: parse_timestamp(&created_at)?,
                    created_by,
                })
            })
            .collect()
    }

    async fn hydrate(&self, row: LeadRow) -> Result<Lead, LeadError> {
        let notes = Self::load_notes(&self.db, &row.id).await?;
        row.into_lead(notes)
    }

    async fn require(&self, id: &str) -> Result<Lead, LeadError> {
        match Self::load(&self.db, id).await? {
            Some(row) => self.hydrate(row).await,
            None => Err(LeadError::NotFound(id.to_owned())),
        }
    }
}

fn engagement_flags(kind: EventKind) -> (bool, bool, bool) {
    (
        kind == EventKind::Follow,
        kind == EventKind::Comment,
        kind == EventKind::Mention,
    )
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &LeadFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(channel) = filter.channel {
        builder.push(" AND channel = ").push_bind(channel.as_str());
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(qualification) = filter.qualification {
        builder
            .push(" AND qualification = ")
            .push_bind(qualification.as_str());
    }
    if let Some(kind) = filter.interaction_type {
        builder.push(" AND interaction_type = ").push_bind(kind.as_str());
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        builder
            .push(" AND (display_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR email LIKE ")
            .push_bind(pattern.clone())
            .push(" OR message LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(ids) = &filter.ids {
        if ids.is_empty() {
            builder.push(" AND 0 = 1");
        } else {
            builder.push(" AND id IN (");
            let mut separated = builder.separated(", ");
            for id in ids {
                separated.push_bind(id.clone());
            }
            separated.push_unseparated(")");
        }
    }
}

#[async_trait]
impl LeadStore for SqliteLeadStore {
    async fn find_by_identity(&self, identity: &Identity) -> Result<Option<Lead>, LeadError> {
        let sql = format!(
            "SELECT {LEAD_COLUMNS} FROM leads WHERE channel = ?1 AND channel_user_id = ?2"
        );
        let row = sqlx::query_as::<_, LeadRow>(&sql)
            .bind(identity.channel.as_str())
            .bind(&identity.channel_user_id)
            .fetch_optional(&self.db)
            .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Lead>, LeadError> {
        match Self::load(&self.db, id).await? {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, upsert: &LeadUpsert) -> Result<UpsertOutcome, LeadError> {
        let candidate_id = uuid::Uuid::new_v4().to_string();
        let now = format_timestamp(Utc::now());
        let occurred_at = format_timestamp(upsert.occurred_at);
        let (display_name, placeholder) = match upsert.display_name.as_deref().map(str::trim) {
            Some(name) if !is_placeholder_name(name) => (name.to_owned(), false),
            _ => (placeholder_name(upsert.identity.channel), true),
        };
        let (is_follower, has_commented, has_mentioned) = engagement_flags(upsert.kind);
        let insert_message = upsert
            .message
            .clone()
            .unwrap_or_else(|| upsert.initial_message.clone());
        let metadata = serde_json::to_string(&upsert.metadata)?;

        let mut tx = self.db.begin().await?;

        let sql = format!(
            "INSERT INTO leads (id, channel, channel_user_id, display_name, name_is_placeholder, \
             email, phone, message, status, qualification, interaction_type, interaction_count, \
             last_interaction_at, is_follower, has_commented, has_mentioned, metadata, \
             created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'new', ?9, ?10, 1, ?11, ?12, ?13, ?14, ?15, \
             ?16, ?16) \
             ON CONFLICT (channel, channel_user_id) DO UPDATE SET \
               display_name = CASE WHEN leads.name_is_placeholder = 1 \
                 AND excluded.name_is_placeholder = 0 \
                 THEN excluded.display_name ELSE leads.display_name END, \
               name_is_placeholder = leads.name_is_placeholder AND excluded.name_is_placeholder, \
               email = COALESCE(leads.email, excluded.email), \
               phone = COALESCE(leads.phone, excluded.phone), \
               message = COALESCE(?17, leads.message), \
               interaction_count = leads.interaction_count + 1, \
               last_interaction_at = CASE WHEN leads.last_interaction_at IS NULL \
                 OR excluded.last_interaction_at > leads.last_interaction_at \
                 THEN excluded.last_interaction_at ELSE leads.last_interaction_at END, \
               is_follower = MAX(leads.is_follower, excluded.is_follower), \
               has_commented = MAX(leads.has_commented, excluded.has_commented), \
               has_mentioned = MAX(leads.has_mentioned, excluded.has_mentioned), \
               metadata = json_patch(leads.metadata, excluded.metadata), \
               updated_at = excluded.updated_at \
             RETURNING {LEAD_COLUMNS}"
        );
        let row = sqlx::query_as::<_, LeadRow>(&sql)
            .bind(&candidate_id)
            .bind(upsert.identity.channel.as_str())
            .bind(&upsert.identity.channel_user_id)
            .bind(&display_name)
            .bind(placeholder)
            .bind(&upsert.email)
            .bind(&upsert.phone)
            .bind(&insert_message)
            .bind(upsert.kind.seed_qualification().as_str())
            .bind(upsert.kind.as_str())
            .bind(&occurred_at)
            .bind(is_follower)
            .bind(has_commented)
            .bind(has_mentioned)
            .bind(&metadata)
            .bind(&now)
            .bind(&upsert.message)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO lead_notes (lead_id, text, created_at, created_by) VALUES (?1, ?2, ?3, NULL)",
        )
        .bind(&row.id)
        .bind(&upsert.note)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let notes = Self::load_notes(&mut *tx, &row.id).await?;
        let created = row.id == candidate_id;
        // A row that cannot be read back rolls back with the dropped transaction.
        let lead = row.into_lead(notes)?;
        tx.commit().await?;

        trace!(
            identity = %upsert.identity,
            lead_id = %lead.id,
            created,
            interaction_count = lead.interaction_count,
            "lead upserted"
        );
        Ok(UpsertOutcome { lead, created })
    }

    async fn append_note(
        &self,
        id: &str,
        text: &str,
        created_by: Option<&str>,
    ) -> Result<Lead, LeadError> {
        let now = format_timestamp(Utc::now());
        let mut tx = self.db.begin().await?;
        let touched = sqlx::query("UPDATE leads SET updated_at = ?1 WHERE id = ?2")
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(LeadError::NotFound(id.to_owned()));
        }
        sqlx::query(
            "INSERT INTO lead_notes (lead_id, text, created_at, created_by) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(id)
        .bind(text)
        .bind(&now)
        .bind(created_by)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        self.require(id).await
    }

    async fn mark_reply_sent(&self, id: &str, kind: ReplyKind) -> Result<bool, LeadError> {
        let column = kind.column();
        let sql = format!(
            "UPDATE leads SET {column} = 1, updated_at = ?1 WHERE id = ?2 AND {column} = 0"
        );
        let result = sqlx::query(&sql)
            .bind(format_timestamp(Utc::now()))
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() > 0 {
            trace!(lead_id = id, column, "reply marker set");
            return Ok(true);
        }
        match Self::load(&self.db, id).await? {
            Some(_) => Ok(false),
            None => Err(LeadError::NotFound(id.to_owned())),
        }
    }

    async fn record_contact(
        &self,
        id: &str,
        note: &str,
        mark_contacted: bool,
    ) -> Result<Lead, LeadError> {
        let now = format_timestamp(Utc::now());
        let mut tx = self.db.begin().await?;
        let result = sqlx::query(
            "UPDATE leads SET interaction_count = interaction_count + 1, \
             last_interaction_at = CASE WHEN last_interaction_at IS NULL \
               OR ?1 > last_interaction_at THEN ?1 ELSE last_interaction_at END, \
             last_contacted_at = ?1, \
             status = CASE WHEN ?2 = 1 AND status = 'new' THEN 'contacted' ELSE status END, \
             updated_at = ?1 \
             WHERE id = ?3",
        )
        .bind(&now)
        .bind(mark_contacted)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(LeadError::NotFound(id.to_owned()));
        }
        sqlx::query(
            "INSERT INTO lead_notes (lead_id, text, created_at, created_by) VALUES (?1, ?2, ?3, NULL)",
        )
        .bind(id)
        .bind(note)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        self.require(id).await
    }

    async fn count_by(&self, filter: &LeadFilter) -> Result<u64, LeadError> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT count(*) FROM leads");
        push_filter(&mut builder, filter);
        let (count,): (i64,) = builder.build_query_as().fetch_one(&self.db).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn list(&self, filter: &LeadFilter) -> Result<Vec<Lead>, LeadError> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {LEAD_COLUMNS} FROM leads"));
        push_filter(&mut builder, filter);
        builder
            .push(" ORDER BY created_at DESC, id ASC LIMIT ")
            .push_bind(i64::from(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT)));
        let rows: Vec<LeadRow> = builder.build_query_as().fetch_all(&self.db).await?;
        let mut leads = Vec::with_capacity(rows.len());
        for row in rows {
            leads.push(self.hydrate(row).await?);
        }
        Ok(leads)
    }

    async fn create(&self, lead: &NewLead) -> Result<Lead, LeadError> {
        let channel = lead.channel.unwrap_or(Channel::Website);
        let identity = match lead.channel_user_id.as_deref() {
            Some(raw) => Identity::new(channel, raw),
            None => Identity::from_contact(channel, lead.email.as_deref(), lead.phone.as_deref()),
        }
        .ok_or_else(|| {
            LeadError::Invalid("a channel user id, email or phone is required".to_owned())
        })?;

        let (display_name, placeholder) = match lead.name.as_deref().map(str::trim) {
            Some(name) if !is_placeholder_name(name) => (name.to_owned(), false),
            _ => (placeholder_name(channel), true),
        };
        let id = uuid::Uuid::new_v4().to_string();
        let now = format_timestamp(Utc::now());
        let tags = serde_json::to_string(&lead.tags)?;

        let result = sqlx::query(
            "INSERT INTO leads (id, channel, channel_user_id, display_name, name_is_placeholder, \
             email, phone, message, status, qualification, interaction_type, interaction_count, \
             tags, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'message', 0, ?11, ?12, ?12)",
        )
        .bind(&id)
        .bind(channel.as_str())
        .bind(&identity.channel_user_id)
        .bind(&display_name)
        .bind(placeholder)
        .bind(lead.email.as_deref().and_then(super::normalize_email))
        .bind(lead.phone.as_deref().map(str::trim))
        .bind(&lead.message)
        .bind(lead.status.unwrap_or(LeadStatus::New).as_str())
        .bind(lead.qualification.unwrap_or(Qualification::Cold).as_str())
        .bind(&tags)
        .bind(&now)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => {
                info!(lead_id = %id, identity = %identity, "lead created by staff");
                self.require(&id).await
            }
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(LeadError::Duplicate(identity.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn update(&self, id: &str, update: &LeadUpdate) -> Result<Lead, LeadError> {
        let name = update
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let tags = update.tags.as_ref().map(serde_json::to_string).transpose()?;
        let result = sqlx::query(
            "UPDATE leads SET \
               display_name = COALESCE(?1, display_name), \
               name_is_placeholder = CASE WHEN ?1 IS NULL THEN name_is_placeholder ELSE 0 END, \
               email = COALESCE(?2, email), \
               phone = COALESCE(?3, phone), \
               status = COALESCE(?4, status), \
               qualification = COALESCE(?5, qualification), \
               tags = COALESCE(?6, tags), \
               updated_at = ?7 \
             WHERE id = ?8",
        )
        .bind(name)
        .bind(update.email.as_deref().and_then(super::normalize_email))
        .bind(update.phone.as_deref().map(str::trim))
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.qualification.map(|q| q.as_str()))
        .bind(tags)
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(LeadError::NotFound(id.to_owned()));
        }
        self.require(id).await
    }

    async fn delete(&self, id: &str) -> Result<bool, LeadError> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM lead_notes WHERE lead_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM leads WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(lead_id = id, "lead deleted");
        }
        Ok(deleted)
    }
}
