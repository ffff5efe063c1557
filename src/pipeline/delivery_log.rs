//! Bounded log of webhook deliveries for operators.
//!
//! Rows are written after processing and never read by reconciliation.
//! The table is trimmed to `capacity` rows on every insert.

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;

use super::DeliveryReport;
use crate::leads::{format_timestamp, LeadError};

/// One logged delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct DeliveryRecord {
    /// Row id; increases with time.
    pub id: i64,
    /// Channel path segment.
    pub channel: String,
    /// When processing finished.
    pub received_at: String,
    /// `entry[]` elements.
    pub entries: i64,
    /// Normalized events.
    pub events: i64,
    /// Events applied.
    pub applied: i64,
    /// Fragments and events skipped.
    pub dropped: i64,
    /// Events that failed to persist.
    pub failed: i64,
    /// Replies sent.
    pub replies: i64,
    /// Joined error messages.
    pub error: Option<String>,
}

/// SQLite-backed delivery log.
#[derive(Debug, Clone)]
pub struct DeliveryLog {
    db: SqlitePool,
    capacity: u32,
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl DeliveryLog {
    /// Create a log over an already-migrated pool.
    pub fn new(db: SqlitePool, capacity: u32) -> Self {
        Self { db, capacity }
    }

    /// Append `report` and trim old rows.
    ///
    /// # Errors
    ///
    /// Returns [`LeadError::Database`] if the insert or trim fails.
    pub async fn record(&self, report: &DeliveryReport) -> Result<(), LeadError> {
        let channel = report.channel.map(|c| c.as_str()).unwrap_or("unknown");
        sqlx::query(
            "INSERT INTO webhook_deliveries \
             (channel, received_at, entries, events, applied, dropped, failed, replies, error) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(channel)
        .bind(format_timestamp(Utc::now()))
        .bind(count(report.entries))
        .bind(count(report.events))
        .bind(count(report.applied))
        .bind(count(report.dropped))
        .bind(count(report.failed))
        .bind(count(report.replies_sent))
        .bind(report.error_summary())
        .execute(&self.db)
        .await?;

        sqlx::query(
            "DELETE FROM webhook_deliveries WHERE id NOT IN \
             (SELECT id FROM webhook_deliveries ORDER BY id DESC LIMIT ?1)",
        )
        .bind(i64::from(self.capacity))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Most recent deliveries, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LeadError::Database`] if the query fails.
    pub async fn recent(&self, limit: u32) -> Result<Vec<DeliveryRecord>, LeadError> {
        let rows = sqlx::query_as::<_, DeliveryRecord>(
            "SELECT id, channel, received_at, entries, events, applied, dropped, failed, \
             replies, error FROM webhook_deliveries ORDER BY id DESC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}
