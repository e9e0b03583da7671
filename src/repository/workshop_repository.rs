use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{Workshop, WorkshopStatus},
    error::{AppError, Result},
    repository::{parse_uuid, to_utc, WorkshopRepository},
};

const WORKSHOP_COLUMNS: &str = "id, title, description, location, status, starts_at, ends_at, \
    capacity, batch_size, cool_off_days, refund_window_days, price_cents, currency, \
    last_batch_sent_at, published_at, finished_at, cancelled_at, created_by, created_at, updated_at";

#[derive(FromRow)]
struct WorkshopRow {
    id: String,
    title: String,
    description: String,
    location: Option<String>,
    status: String,
    starts_at: NaiveDateTime,
    ends_at: NaiveDateTime,
    capacity: i64,
    batch_size: i64,
    cool_off_days: i64,
    refund_window_days: Option<i64>,
    price_cents: i64,
    currency: String,
    last_batch_sent_at: Option<NaiveDateTime>,
    published_at: Option<NaiveDateTime>,
    finished_at: Option<NaiveDateTime>,
    cancelled_at: Option<NaiveDateTime>,
    created_by: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

fn row_to_workshop(row: WorkshopRow) -> Result<Workshop> {
    let status = WorkshopStatus::from_str(&row.status)
        .ok_or_else(|| AppError::Database(format!("Invalid workshop status: {}", row.status)))?;

    Ok(Workshop {
        id: parse_uuid(&row.id)?,
        title: row.title,
        description: row.description,
        location: row.location,
        status,
        starts_at: to_utc(row.starts_at),
        ends_at: to_utc(row.ends_at),
        capacity: row.capacity,
        batch_size: row.batch_size,
        cool_off_days: row.cool_off_days,
        refund_window_days: row.refund_window_days,
        price_cents: row.price_cents,
        currency: row.currency,
        last_batch_sent_at: row.last_batch_sent_at.map(to_utc),
        published_at: row.published_at.map(to_utc),
        finished_at: row.finished_at.map(to_utc),
        cancelled_at: row.cancelled_at.map(to_utc),
        created_by: parse_uuid(&row.created_by)?,
        created_at: to_utc(row.created_at),
        updated_at: to_utc(row.updated_at),
    })
}

pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Workshop>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM workshops WHERE id = ?", WORKSHOP_COLUMNS);
    let row = sqlx::query_as::<_, WorkshopRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    row.map(row_to_workshop).transpose()
}

/// Moves a workshop from `from` to `to`, stamping the matching timestamp.
///
/// Returns false when the workshop was no longer in `from`, which callers
/// treat as a lost race rather than an error.
pub async fn transition<'e, E>(
    executor: E,
    id: Uuid,
    from: WorkshopStatus,
    to: WorkshopStatus,
    at: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let stamp_column = match to {
        WorkshopStatus::Published => "published_at",
        WorkshopStatus::Finished => "finished_at",
        WorkshopStatus::Cancelled => "cancelled_at",
        WorkshopStatus::Draft => "updated_at",
    };
    let sql = format!(
        "UPDATE workshops SET status = ?, {} = ?, updated_at = ? WHERE id = ? AND status = ?",
        stamp_column
    );
    let at = at.naive_utc();

    let result = sqlx::query(&sql)
        .bind(to.as_str())
        .bind(at)
        .bind(at)
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(executor)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

pub async fn set_last_batch_sent_at<'e, E>(executor: E, id: Uuid, at: DateTime<Utc>) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE workshops SET last_batch_sent_at = ?, updated_at = ? WHERE id = ?")
        .bind(at.naive_utc())
        .bind(at.naive_utc())
        .bind(id.to_string())
        .execute(executor)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
    Ok(())
}

pub async fn set_capacity<'e, E>(executor: E, id: Uuid, capacity: i64, batch_size: i64, at: DateTime<Utc>) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE workshops SET capacity = ?, batch_size = ?, updated_at = ? WHERE id = ?")
        .bind(capacity)
        .bind(batch_size)
        .bind(at.naive_utc())
        .bind(id.to_string())
        .execute(executor)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
    Ok(())
}

pub struct SqliteWorkshopRepository {
    pool: SqlitePool,
}

impl SqliteWorkshopRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkshopRepository for SqliteWorkshopRepository {
    async fn create(&self, workshop: Workshop) -> Result<Workshop> {
        sqlx::query(
            r#"
            INSERT INTO workshops (
                id, title, description, location, status, starts_at, ends_at,
                capacity, batch_size, cool_off_days, refund_window_days, price_cents,
                currency, last_batch_sent_at, published_at, finished_at, cancelled_at,
                created_by, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(workshop.id.to_string())
        .bind(&workshop.title)
        .bind(&workshop.description)
        .bind(&workshop.location)
        .bind(workshop.status.as_str())
        .bind(workshop.starts_at.naive_utc())
        .bind(workshop.ends_at.naive_utc())
        .bind(workshop.capacity)
        .bind(workshop.batch_size)
        .bind(workshop.cool_off_days)
        .bind(workshop.refund_window_days)
        .bind(workshop.price_cents)
        .bind(&workshop.currency)
        .bind(workshop.last_batch_sent_at.map(|dt| dt.naive_utc()))
        .bind(workshop.published_at.map(|dt| dt.naive_utc()))
        .bind(workshop.finished_at.map(|dt| dt.naive_utc()))
        .bind(workshop.cancelled_at.map(|dt| dt.naive_utc()))
        .bind(workshop.created_by.to_string())
        .bind(workshop.created_at.naive_utc())
        .bind(workshop.updated_at.naive_utc())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(workshop.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created workshop".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Workshop>> {
        find_by_id(&self.pool, id).await
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Workshop>> {
        let sql = format!(
            "SELECT {} FROM workshops ORDER BY starts_at DESC LIMIT ? OFFSET ?",
            WORKSHOP_COLUMNS
        );
        let rows = sqlx::query_as::<_, WorkshopRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter()
            .map(row_to_workshop)
            .collect()
    }

    async fn list_by_status(&self, status: WorkshopStatus) -> Result<Vec<Workshop>> {
        let sql = format!(
            "SELECT {} FROM workshops WHERE status = ? ORDER BY starts_at ASC",
            WORKSHOP_COLUMNS
        );
        let rows = sqlx::query_as::<_, WorkshopRow>(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter()
            .map(row_to_workshop)
            .collect()
    }

    async fn update(&self, id: Uuid, workshop: Workshop) -> Result<Workshop> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            UPDATE workshops
            SET title = ?, description = ?, location = ?, starts_at = ?, ends_at = ?,
                capacity = ?, batch_size = ?, cool_off_days = ?, refund_window_days = ?,
                price_cents = ?, currency = ?, updated_at = ?
            WHERE id = ?
            "#
        )
        .bind(&workshop.title)
        .bind(&workshop.description)
        .bind(&workshop.location)
        .bind(workshop.starts_at.naive_utc())
        .bind(workshop.ends_at.naive_utc())
        .bind(workshop.capacity)
        .bind(workshop.batch_size)
        .bind(workshop.cool_off_days)
        .bind(workshop.refund_window_days)
        .bind(workshop.price_cents)
        .bind(&workshop.currency)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve updated workshop".to_string())
        })
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM workshops WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}
