use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite};

use crate::error::{AppError, Result};

/// Whether this processor event id has already been applied.
pub async fn was_applied<'e, E>(executor: E, event_id: &str) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processor_events WHERE event_id = ?")
        .bind(event_id)
        .fetch_one(executor)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(count > 0)
}

/// Records an applied event. Recording twice is harmless.
pub async fn record<'e, E>(
    executor: E,
    event_id: &str,
    kind: &str,
    artifact_id: &str,
    at: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO processor_events (event_id, kind, artifact_id, received_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (event_id) DO NOTHING
        "#
    )
    .bind(event_id)
    .bind(kind)
    .bind(artifact_id)
    .bind(at.naive_utc())
    .execute(executor)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(())
}
