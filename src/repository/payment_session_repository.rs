use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{IntentKey, PaymentSession},
    error::{AppError, Result},
    repository::{parse_uuid, to_utc, PaymentSessionRepository},
};

const SESSION_COLUMNS: &str = "id, user_id, intent_key, artifact_ids, client_secrets, \
    amounts_cents, currency, created_at, expires_at, is_used, used_at";

#[derive(FromRow)]
struct PaymentSessionRow {
    id: String,
    user_id: String,
    intent_key: String,
    artifact_ids: String,
    client_secrets: String,
    amounts_cents: String,
    currency: String,
    created_at: NaiveDateTime,
    expires_at: NaiveDateTime,
    is_used: bool,
    used_at: Option<NaiveDateTime>,
}

fn decode_list<T: serde::de::DeserializeOwned>(raw: &str) -> Result<Vec<T>> {
    serde_json::from_str(raw).map_err(|e| AppError::Database(format!("Invalid stored list: {}", e)))
}

fn encode_list<T: serde::Serialize>(items: &[T]) -> Result<String> {
    serde_json::to_string(items).map_err(|e| AppError::Internal(e.to_string()))
}

fn row_to_session(row: PaymentSessionRow) -> Result<PaymentSession> {
    Ok(PaymentSession {
        id: parse_uuid(&row.id)?,
        user_id: parse_uuid(&row.user_id)?,
        intent_key: IntentKey::new(row.intent_key),
        artifact_ids: decode_list(&row.artifact_ids)?,
        client_secrets: decode_list(&row.client_secrets)?,
        amounts_cents: decode_list(&row.amounts_cents)?,
        currency: row.currency,
        created_at: to_utc(row.created_at),
        expires_at: to_utc(row.expires_at),
        is_used: row.is_used,
        used_at: row.used_at.map(to_utc),
    })
}

pub struct SqlitePaymentSessionRepository {
    pool: SqlitePool,
}

impl SqlitePaymentSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentSessionRepository for SqlitePaymentSessionRepository {
    async fn create(&self, session: PaymentSession) -> Result<PaymentSession> {
        sqlx::query(
            r#"
            INSERT INTO payment_sessions (
                id, user_id, intent_key, artifact_ids, client_secrets, amounts_cents,
                currency, created_at, expires_at, is_used, used_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .bind(session.intent_key.as_str())
        .bind(encode_list(&session.artifact_ids)?)
        .bind(encode_list(&session.client_secrets)?)
        .bind(encode_list(&session.amounts_cents)?)
        .bind(&session.currency)
        .bind(session.created_at.naive_utc())
        .bind(session.expires_at.naive_utc())
        .bind(session.is_used)
        .bind(session.used_at.map(|dt| dt.naive_utc()))
        .execute(&self.pool)
        .await?;

        self.find_by_id(session.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created payment session".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentSession>> {
        let sql = format!("SELECT {} FROM payment_sessions WHERE id = ?", SESSION_COLUMNS);
        let row = sqlx::query_as::<_, PaymentSessionRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(row_to_session).transpose()
    }

    async fn find_unused(&self, user_id: Uuid, intent_key: &IntentKey) -> Result<Option<PaymentSession>> {
        let sql = format!(
            "SELECT {} FROM payment_sessions WHERE user_id = ? AND intent_key = ? AND is_used = 0",
            SESSION_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentSessionRow>(&sql)
            .bind(user_id.to_string())
            .bind(intent_key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(row_to_session).transpose()
    }

    async fn find_by_artifact(&self, artifact_id: &str) -> Result<Option<PaymentSession>> {
        // artifact_ids is a JSON array of strings; match the quoted element
        let pattern = format!("%\"{}\"%", artifact_id.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_"));
        let sql = format!(
            "SELECT {} FROM payment_sessions WHERE artifact_ids LIKE ? ESCAPE '\\' \
             ORDER BY created_at DESC LIMIT 1",
            SESSION_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentSessionRow>(&sql)
            .bind(pattern)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(row_to_session).transpose()
    }

    async fn mark_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE payment_sessions SET is_used = 1, used_at = ? WHERE id = ? AND is_used = 0"
        )
        .bind(at.naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_expired_unused(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<PaymentSession>> {
        let sql = format!(
            "SELECT {} FROM payment_sessions WHERE is_used = 0 AND expires_at < ? \
             ORDER BY last_sweep_at IS NOT NULL, last_sweep_at ASC, expires_at ASC LIMIT ?",
            SESSION_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentSessionRow>(&sql)
            .bind(now.naive_utc())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter()
            .map(row_to_session)
            .collect()
    }

    async fn record_sweep_failure(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE payment_sessions SET sweep_attempts = sweep_attempts + 1, last_sweep_at = ? \
             WHERE id = ? AND is_used = 0",
        )
        .bind(at.naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}
