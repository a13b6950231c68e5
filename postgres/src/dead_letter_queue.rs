//! Dead Letter Queue (DLQ) for failed order intents.
//!
//! Stores intents that fulfillment gave up on, either after exhausting
//! redeliveries or on a permanent ledger rejection. Entries are reviewed and
//! then marked resolved (re-driven by an operator) or discarded.

use chrono::{DateTime, Utc};
use flash_sale_core::{DeadLetter, DeadLetterError, DeadLetterSink, OrderIntent};
use futures::future::BoxFuture;
use sqlx::{PgPool, Row};

fn database_error(error: &sqlx::Error) -> DeadLetterError {
    DeadLetterError::Database(error.to_string())
}

/// Status of a failed intent in the Dead Letter Queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DLQStatus {
    /// Waiting for investigation
    Pending,
    /// Being re-driven by an operator
    Processing,
    /// Handled; the buyer got their order or a refund
    Resolved,
    /// Given up on permanently
    Discarded,
}

impl DLQStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::InvalidStatus`] for unknown strings.
    pub fn parse(s: &str) -> Result<Self, DeadLetterError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(DeadLetterError::InvalidStatus(s.to_string())),
        }
    }
}

/// An entry in the Dead Letter Queue.
#[derive(Debug, Clone)]
pub struct FailedIntent {
    /// Unique identifier for this DLQ entry
    pub id: i64,
    /// The intent as it was delivered
    pub intent: OrderIntent,
    /// When the intent was admitted
    pub original_timestamp: DateTime<Utc>,
    /// Error message from the last failure
    pub error_message: String,
    /// Deliveries attempted before giving up
    pub attempts: i32,
    /// When the intent first landed here
    pub first_failed_at: DateTime<Utc>,
    /// Last status change
    pub last_failed_at: DateTime<Utc>,
    /// Current status
    pub status: DLQStatus,
    /// When the entry was resolved or discarded
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it
    pub resolved_by: Option<String>,
    /// Notes about the resolution
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-backed Dead Letter Queue on the `failed_intents` table.
///
/// # Example
///
/// ```no_run
/// use flash_sale_postgres::{DLQStatus, DeadLetterQueue};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = DeadLetterQueue::new(pool);
///
/// let pending = dlq.list_pending(100).await?;
/// println!("Pending failures: {}", pending.len());
///
/// dlq.update_status(pending[0].id, DLQStatus::Processing).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Create a new Dead Letter Queue with the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Add a failed intent and return the entry id.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Database`] if the insert fails.
    pub async fn add_entry(&self, letter: &DeadLetter) -> Result<i64, DeadLetterError> {
        let payload = serde_json::to_value(&letter.intent)
            .map_err(|e| DeadLetterError::Database(format!("Failed to encode intent: {e}")))?;
        let attempts = i32::try_from(letter.attempts).unwrap_or(i32::MAX);

        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_intents (
                intent_id, buyer_id, product_id, intent_payload,
                original_timestamp, error_message, attempts
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(letter.intent.intent_id)
        .bind(letter.intent.buyer_id.get())
        .bind(letter.intent.product_id.get())
        .bind(payload)
        .bind(letter.intent.created_at())
        .bind(&letter.error_message)
        .bind(attempts)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| database_error(&e))?;

        tracing::warn!(
            dlq_id = id,
            intent_id = %letter.intent.intent_id,
            product_id = %letter.intent.product_id,
            error = %letter.error_message,
            attempts,
            "Intent added to Dead Letter Queue"
        );

        metrics::counter!("flash_sale_dlq_added_total").increment(1);

        Ok(id)
    }

    /// List pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedIntent>, DeadLetterError> {
        self.list_by_status(DLQStatus::Pending, limit).await
    }

    /// List entries with `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: DLQStatus,
        limit: usize,
    ) -> Result<Vec<FailedIntent>, DeadLetterError> {
        let rows = sqlx::query(
            r"
            SELECT
                id, intent_payload, original_timestamp, error_message, attempts,
                first_failed_at, last_failed_at, status,
                resolved_at, resolved_by, resolution_notes
            FROM failed_intents
            WHERE status = $1
            ORDER BY first_failed_at ASC, id ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error(&e))?;

        rows.iter().map(Self::row_to_failed_intent).collect()
    }

    /// Get a specific entry.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Database`] if the query fails or the entry does not exist.
    pub async fn get_by_id(&self, id: i64) -> Result<FailedIntent, DeadLetterError> {
        let row = sqlx::query(
            r"
            SELECT
                id, intent_payload, original_timestamp, error_message, attempts,
                first_failed_at, last_failed_at, status,
                resolved_at, resolved_by, resolution_notes
            FROM failed_intents
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| database_error(&e))?;

        Self::row_to_failed_intent(&row)
    }

    /// Change an entry's status.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Database`] if the update fails.
    pub async fn update_status(&self, id: i64, status: DLQStatus) -> Result<(), DeadLetterError> {
        sqlx::query(
            r"
            UPDATE failed_intents
            SET status = $1, last_failed_at = NOW()
            WHERE id = $2
            ",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| database_error(&e))?;

        tracing::info!(dlq_id = id, status = status.as_str(), "DLQ entry status updated");
        Ok(())
    }

    /// Mark an entry resolved.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Database`] if the update fails.
    pub async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), DeadLetterError> {
        sqlx::query(
            r"
            UPDATE failed_intents
            SET status = 'resolved',
                resolved_at = NOW(),
                resolved_by = $1,
                resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| database_error(&e))?;

        tracing::info!(dlq_id = id, resolved_by, "DLQ entry marked as resolved");
        metrics::counter!("flash_sale_dlq_resolved_total").increment(1);
        Ok(())
    }

    /// Mark an entry discarded.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Database`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), DeadLetterError> {
        sqlx::query(
            r"
            UPDATE failed_intents
            SET status = 'discarded',
                resolved_at = NOW(),
                resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| database_error(&e))?;

        tracing::warn!(dlq_id = id, reason, "DLQ entry marked as discarded");
        metrics::counter!("flash_sale_dlq_discarded_total").increment(1);
        Ok(())
    }

    /// Number of pending entries.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Database`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, DeadLetterError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_intents WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| database_error(&e))?;
        Ok(count)
    }

    fn row_to_failed_intent(row: &sqlx::postgres::PgRow) -> Result<FailedIntent, DeadLetterError> {
        let payload: serde_json::Value = row.get("intent_payload");
        let intent: OrderIntent = serde_json::from_value(payload)
            .map_err(|e| DeadLetterError::Database(format!("Corrupt intent payload: {e}")))?;

        let status: String = row.get("status");

        Ok(FailedIntent {
            id: row.get("id"),
            intent,
            original_timestamp: row.get("original_timestamp"),
            error_message: row.get("error_message"),
            attempts: row.get("attempts"),
            first_failed_at: row.get("first_failed_at"),
            last_failed_at: row.get("last_failed_at"),
            status: DLQStatus::parse(&status)?,
            resolved_at: row.get("resolved_at"),
            resolved_by: row.get("resolved_by"),
            resolution_notes: row.get("resolution_notes"),
        })
    }
}

impl DeadLetterSink for DeadLetterQueue {
    fn record(&self, letter: DeadLetter) -> BoxFuture<'_, Result<i64, DeadLetterError>> {
        Box::pin(async move { self.add_entry(&letter).await })
    }
}
