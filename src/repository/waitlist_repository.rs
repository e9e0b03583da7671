use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{Attendee, WaitlistEntry},
    error::{AppError, Result},
    repository::{parse_optional_uuid, parse_uuid, to_utc, WaitlistRepository},
};

const WAITLIST_COLUMNS: &str = "w.id, w.member_id, w.external_person_id, w.full_name, w.email, \
    w.priority, w.joined_at, w.fulfilled_at, w.removed_at";

#[derive(FromRow)]
struct WaitlistRow {
    id: String,
    member_id: Option<String>,
    external_person_id: Option<String>,
    full_name: String,
    email: String,
    priority: i64,
    joined_at: NaiveDateTime,
    fulfilled_at: Option<NaiveDateTime>,
    removed_at: Option<NaiveDateTime>,
}

fn row_to_entry(row: WaitlistRow) -> Result<WaitlistEntry> {
    let attendee = Attendee::from_columns(
        parse_optional_uuid(row.member_id.as_deref())?,
        parse_optional_uuid(row.external_person_id.as_deref())?,
    )
    .ok_or_else(|| AppError::Database(format!("Waitlist entry {} has no single attendee", row.id)))?;

    Ok(WaitlistEntry {
        id: parse_uuid(&row.id)?,
        attendee,
        full_name: row.full_name,
        email: row.email,
        priority: row.priority,
        joined_at: to_utc(row.joined_at),
        fulfilled_at: row.fulfilled_at.map(to_utc),
        removed_at: row.removed_at.map(to_utc),
    })
}

/// Entries that may be invited to `workshop_id`, in selection order.
///
/// Excludes anyone with a registration for this workshop (a cancelled one
/// only counts when `reinvite_cancelled` is off) and anyone who was a
/// no-show at a workshop starting on or after `no_show_cutoff`.
pub async fn eligible_candidates<'e, E>(
    executor: E,
    workshop_id: Uuid,
    reinvite_cancelled: bool,
    no_show_cutoff: DateTime<Utc>,
) -> Result<Vec<WaitlistEntry>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        r#"
        SELECT {}
        FROM waitlist_entries w
        WHERE w.fulfilled_at IS NULL AND w.removed_at IS NULL
          AND NOT EXISTS (
              SELECT 1 FROM registrations r
              WHERE r.workshop_id = ?
                AND (r.member_id = w.member_id OR r.external_person_id = w.external_person_id)
                AND (r.status <> 'cancelled' OR ? = 0)
          )
          AND NOT EXISTS (
              SELECT 1 FROM registrations r
              JOIN workshops ws ON ws.id = r.workshop_id
              WHERE r.status = 'no_show' AND ws.starts_at >= ?
                AND (r.member_id = w.member_id OR r.external_person_id = w.external_person_id)
          )
        ORDER BY w.priority ASC, w.joined_at ASC, w.id ASC
        "#,
        WAITLIST_COLUMNS
    );

    let rows = sqlx::query_as::<_, WaitlistRow>(&sql)
        .bind(workshop_id.to_string())
        .bind(reinvite_cancelled)
        .bind(no_show_cutoff.naive_utc())
        .fetch_all(executor)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    rows.into_iter()
        .map(row_to_entry)
        .collect()
}

/// Takes someone off the waitlist once they have attended a workshop.
pub async fn fulfil_for_attendee<'e, E>(executor: E, attendee: &Attendee, at: DateTime<Utc>) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (column, id) = match attendee {
        Attendee::Member(id) => ("member_id", id),
        Attendee::External(id) => ("external_person_id", id),
    };
    let sql = format!(
        "UPDATE waitlist_entries SET fulfilled_at = ? \
         WHERE {} = ? AND fulfilled_at IS NULL AND removed_at IS NULL",
        column
    );
    sqlx::query(&sql)
        .bind(at.naive_utc())
        .bind(id.to_string())
        .execute(executor)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
    Ok(())
}

pub struct SqliteWaitlistRepository {
    pool: SqlitePool,
}

impl SqliteWaitlistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WaitlistRepository for SqliteWaitlistRepository {
    async fn create(&self, entry: WaitlistEntry) -> Result<WaitlistEntry> {
        sqlx::query(
            r#"
            INSERT INTO waitlist_entries (
                id, member_id, external_person_id, full_name, email, priority, joined_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(entry.id.to_string())
        .bind(entry.attendee.member_id().map(|id| id.to_string()))
        .bind(entry.attendee.external_person_id().map(|id| id.to_string()))
        .bind(&entry.full_name)
        .bind(&entry.email)
        .bind(entry.priority)
        .bind(entry.joined_at.naive_utc())
        .execute(&self.pool)
        .await?;

        self.find_by_id(entry.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created waitlist entry".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<WaitlistEntry>> {
        let sql = format!("SELECT {} FROM waitlist_entries w WHERE w.id = ?", WAITLIST_COLUMNS);
        let row = sqlx::query_as::<_, WaitlistRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(row_to_entry).transpose()
    }

    async fn list_active(&self) -> Result<Vec<WaitlistEntry>> {
        let sql = format!(
            "SELECT {} FROM waitlist_entries w \
             WHERE w.fulfilled_at IS NULL AND w.removed_at IS NULL \
             ORDER BY w.priority ASC, w.joined_at ASC, w.id ASC",
            WAITLIST_COLUMNS
        );
        let rows = sqlx::query_as::<_, WaitlistRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter()
            .map(row_to_entry)
            .collect()
    }

    async fn find_active_by_email(&self, email: &str) -> Result<Option<WaitlistEntry>> {
        let sql = format!(
            "SELECT {} FROM waitlist_entries w \
             WHERE lower(w.email) = lower(?) AND w.fulfilled_at IS NULL AND w.removed_at IS NULL \
             ORDER BY w.joined_at ASC LIMIT 1",
            WAITLIST_COLUMNS
        );
        let row = sqlx::query_as::<_, WaitlistRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(row_to_entry).transpose()
    }

    async fn find_active_by_member(&self, member_id: Uuid) -> Result<Option<WaitlistEntry>> {
        let sql = format!(
            "SELECT {} FROM waitlist_entries w \
             WHERE w.member_id = ? AND w.fulfilled_at IS NULL AND w.removed_at IS NULL",
            WAITLIST_COLUMNS
        );
        let row = sqlx::query_as::<_, WaitlistRow>(&sql)
            .bind(member_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(row_to_entry).transpose()
    }

    async fn set_priority(&self, id: Uuid, priority: i64) -> Result<WaitlistEntry> {
        let result = sqlx::query("UPDATE waitlist_entries SET priority = ? WHERE id = ?")
            .bind(priority)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Waitlist entry not found".to_string()));
        }

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve updated waitlist entry".to_string())
        })
    }

    async fn remove(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE waitlist_entries SET removed_at = ? WHERE id = ? AND removed_at IS NULL")
            .bind(at.naive_utc())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}
