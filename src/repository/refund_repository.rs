use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{Refund, RefundStatus},
    error::{AppError, Result},
    repository::{parse_optional_uuid, parse_uuid, to_utc, RefundRepository},
};

const REFUND_COLUMNS: &str = "id, registration_id, payment_artifact_id, amount_cents, reason, \
    status, processor_refund_id, failure_reason, requested_by, processed_by, requested_at, \
    processed_at, completed_at, updated_at";

#[derive(FromRow)]
struct RefundRow {
    id: String,
    registration_id: String,
    payment_artifact_id: Option<String>,
    amount_cents: i64,
    reason: String,
    status: String,
    processor_refund_id: Option<String>,
    failure_reason: Option<String>,
    requested_by: Option<String>,
    processed_by: Option<String>,
    requested_at: NaiveDateTime,
    processed_at: Option<NaiveDateTime>,
    completed_at: Option<NaiveDateTime>,
    updated_at: NaiveDateTime,
}

fn row_to_refund(row: RefundRow) -> Result<Refund> {
    let status = RefundStatus::from_str(&row.status)
        .ok_or_else(|| AppError::Database(format!("Invalid refund status: {}", row.status)))?;

    Ok(Refund {
        id: parse_uuid(&row.id)?,
        registration_id: parse_uuid(&row.registration_id)?,
        payment_artifact_id: row.payment_artifact_id,
        amount_cents: row.amount_cents,
        reason: row.reason,
        status,
        processor_refund_id: row.processor_refund_id,
        failure_reason: row.failure_reason,
        requested_by: parse_optional_uuid(row.requested_by.as_deref())?,
        processed_by: parse_optional_uuid(row.processed_by.as_deref())?,
        requested_at: to_utc(row.requested_at),
        processed_at: row.processed_at.map(to_utc),
        completed_at: row.completed_at.map(to_utc),
        updated_at: to_utc(row.updated_at),
    })
}

pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Refund>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM refunds WHERE id = ?", REFUND_COLUMNS);
    let row = sqlx::query_as::<_, RefundRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    row.map(row_to_refund).transpose()
}

/// Inserts a pending refund. The UNIQUE registration_id turns a concurrent
/// second request into a `Conflict`.
pub async fn insert<'e, E>(executor: E, refund: &Refund) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO refunds (
            id, registration_id, payment_artifact_id, amount_cents, reason, status,
            processor_refund_id, failure_reason, requested_by, processed_by,
            requested_at, processed_at, completed_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    )
    .bind(refund.id.to_string())
    .bind(refund.registration_id.to_string())
    .bind(&refund.payment_artifact_id)
    .bind(refund.amount_cents)
    .bind(&refund.reason)
    .bind(refund.status.as_str())
    .bind(&refund.processor_refund_id)
    .bind(&refund.failure_reason)
    .bind(refund.requested_by.map(|id| id.to_string()))
    .bind(refund.processed_by.map(|id| id.to_string()))
    .bind(refund.requested_at.naive_utc())
    .bind(refund.processed_at.map(|dt| dt.naive_utc()))
    .bind(refund.completed_at.map(|dt| dt.naive_utc()))
    .bind(refund.updated_at.naive_utc())
    .execute(executor)
    .await?;

    Ok(())
}

/// The processor accepted the refund; wait for its completion callback.
///
/// Only moves out of `pending`, so a completion callback that raced ahead of
/// the processor's synchronous response is not overwritten.
pub async fn mark_processing<'e, E>(
    executor: E,
    id: Uuid,
    processor_refund_id: &str,
    processed_by: Option<Uuid>,
    at: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE refunds
        SET status = 'processing', processor_refund_id = ?, processed_by = ?,
            processed_at = ?, failure_reason = NULL, updated_at = ?
        WHERE id = ? AND status = 'pending'
        "#
    )
    .bind(processor_refund_id)
    .bind(processed_by.map(|id| id.to_string()))
    .bind(at.naive_utc())
    .bind(at.naive_utc())
    .bind(id.to_string())
    .execute(executor)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_failed<'e, E>(executor: E, id: Uuid, reason: &str, at: DateTime<Utc>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE refunds
        SET status = 'failed', failure_reason = ?, processed_at = ?, updated_at = ?
        WHERE id = ? AND status IN ('pending', 'processing')
        "#
    )
    .bind(reason)
    .bind(at.naive_utc())
    .bind(at.naive_utc())
    .bind(id.to_string())
    .execute(executor)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_completed<'e, E>(executor: E, id: Uuid, at: DateTime<Utc>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE refunds
        SET status = 'completed', completed_at = ?, updated_at = ?
        WHERE id = ? AND status IN ('pending', 'processing')
        "#
    )
    .bind(at.naive_utc())
    .bind(at.naive_utc())
    .bind(id.to_string())
    .execute(executor)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

/// Re-arms a failed refund so it can be sent to the processor again.
pub async fn reset_for_retry<'e, E>(executor: E, id: Uuid, at: DateTime<Utc>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE refunds SET status = 'pending', updated_at = ? WHERE id = ? AND status = 'failed'"
    )
    .bind(at.naive_utc())
    .bind(id.to_string())
    .execute(executor)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_cancelled<'e, E>(executor: E, id: Uuid, by: Option<Uuid>, at: DateTime<Utc>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE refunds
        SET status = 'cancelled', processed_by = ?, updated_at = ?
        WHERE id = ? AND status IN ('pending', 'failed')
        "#
    )
    .bind(by.map(|id| id.to_string()))
    .bind(at.naive_utc())
    .bind(id.to_string())
    .execute(executor)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

pub struct SqliteRefundRepository {
    pool: SqlitePool,
}

impl SqliteRefundRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefundRepository for SqliteRefundRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Refund>> {
        find_by_id(&self.pool, id).await
    }

    async fn find_by_registration(&self, registration_id: Uuid) -> Result<Option<Refund>> {
        let sql = format!("SELECT {} FROM refunds WHERE registration_id = ?", REFUND_COLUMNS);
        let row = sqlx::query_as::<_, RefundRow>(&sql)
            .bind(registration_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(row_to_refund).transpose()
    }

    async fn find_by_artifact(&self, artifact_id: &str) -> Result<Option<Refund>> {
        let sql = format!(
            "SELECT {} FROM refunds WHERE payment_artifact_id = ? ORDER BY requested_at DESC LIMIT 1",
            REFUND_COLUMNS
        );
        let row = sqlx::query_as::<_, RefundRow>(&sql)
            .bind(artifact_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(row_to_refund).transpose()
    }

    async fn list_by_status(&self, status: RefundStatus) -> Result<Vec<Refund>> {
        let sql = format!(
            "SELECT {} FROM refunds WHERE status = ? ORDER BY requested_at ASC",
            REFUND_COLUMNS
        );
        let rows = sqlx::query_as::<_, RefundRow>(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter()
            .map(row_to_refund)
            .collect()
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Refund>> {
        let sql = format!(
            "SELECT {} FROM refunds ORDER BY requested_at DESC LIMIT ? OFFSET ?",
            REFUND_COLUMNS
        );
        let rows = sqlx::query_as::<_, RefundRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter()
            .map(row_to_refund)
            .collect()
    }
}
