use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use sqlx::{query::Query, sqlite::SqliteArguments, Executor, FromRow, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{Attendee, OnboardingSubmission, Registration, RegistrationStatus},
    error::{AppError, Result},
    repository::{capacity, parse_optional_uuid, parse_uuid, to_utc, RegistrationRepository},
};

const REGISTRATION_COLUMNS: &str = "id, workshop_id, waitlist_entry_id, member_id, \
    external_person_id, full_name, email, status, priority, invited_at, payment_token_hash, \
    payment_token_expires_at, payment_artifact_id, amount_paid_cents, confirmed_at, \
    onboarding_token_hash, onboarding_token_issued_at, onboarding_token_used_at, \
    onboarding_completed_at, insurance_confirmed_at, media_consent_at, signature, \
    checked_in_at, cancelled_at, follow_up_sent_at, created_at, updated_at";

/// Columns written when a registration is first created; the rest start NULL.
pub(crate) const INSERT_COLUMNS: &str = "id, workshop_id, waitlist_entry_id, member_id, \
    external_person_id, full_name, email, status, priority, invited_at, payment_token_hash, \
    payment_token_expires_at, payment_artifact_id, amount_paid_cents, confirmed_at, \
    created_at, updated_at";

pub(crate) const INSERT_PLACEHOLDERS: &str = "?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?";

#[derive(FromRow)]
struct RegistrationRow {
    id: String,
    workshop_id: String,
    waitlist_entry_id: Option<String>,
    member_id: Option<String>,
    external_person_id: Option<String>,
    full_name: String,
    email: String,
    status: String,
    priority: i64,
    invited_at: NaiveDateTime,
    payment_token_hash: Option<String>,
    payment_token_expires_at: Option<NaiveDateTime>,
    payment_artifact_id: Option<String>,
    amount_paid_cents: i64,
    confirmed_at: Option<NaiveDateTime>,
    onboarding_token_hash: Option<String>,
    onboarding_token_issued_at: Option<NaiveDateTime>,
    onboarding_token_used_at: Option<NaiveDateTime>,
    onboarding_completed_at: Option<NaiveDateTime>,
    insurance_confirmed_at: Option<NaiveDateTime>,
    media_consent_at: Option<NaiveDateTime>,
    signature: Option<String>,
    checked_in_at: Option<NaiveDateTime>,
    cancelled_at: Option<NaiveDateTime>,
    follow_up_sent_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

fn row_to_registration(row: RegistrationRow) -> Result<Registration> {
    let attendee = Attendee::from_columns(
        parse_optional_uuid(row.member_id.as_deref())?,
        parse_optional_uuid(row.external_person_id.as_deref())?,
    )
    .ok_or_else(|| AppError::Database(format!("Registration {} has no single attendee", row.id)))?;

    let status = RegistrationStatus::from_str(&row.status)
        .ok_or_else(|| AppError::Database(format!("Invalid registration status: {}", row.status)))?;

    Ok(Registration {
        id: parse_uuid(&row.id)?,
        workshop_id: parse_uuid(&row.workshop_id)?,
        waitlist_entry_id: parse_optional_uuid(row.waitlist_entry_id.as_deref())?,
        attendee,
        full_name: row.full_name,
        email: row.email,
        status,
        priority: row.priority,
        invited_at: to_utc(row.invited_at),
        payment_token_hash: row.payment_token_hash,
        payment_token_expires_at: row.payment_token_expires_at.map(to_utc),
        payment_artifact_id: row.payment_artifact_id,
        amount_paid_cents: row.amount_paid_cents,
        confirmed_at: row.confirmed_at.map(to_utc),
        onboarding_token_hash: row.onboarding_token_hash,
        onboarding_token_issued_at: row.onboarding_token_issued_at.map(to_utc),
        onboarding_token_used_at: row.onboarding_token_used_at.map(to_utc),
        onboarding_completed_at: row.onboarding_completed_at.map(to_utc),
        insurance_confirmed_at: row.insurance_confirmed_at.map(to_utc),
        media_consent_at: row.media_consent_at.map(to_utc),
        signature: row.signature,
        checked_in_at: row.checked_in_at.map(to_utc),
        cancelled_at: row.cancelled_at.map(to_utc),
        follow_up_sent_at: row.follow_up_sent_at.map(to_utc),
        created_at: to_utc(row.created_at),
        updated_at: to_utc(row.updated_at),
    })
}

/// Binds a new registration in `INSERT_COLUMNS` order.
pub(crate) fn bind_new<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    registration: &Registration,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(registration.id.to_string())
        .bind(registration.workshop_id.to_string())
        .bind(registration.waitlist_entry_id.map(|id| id.to_string()))
        .bind(registration.attendee.member_id().map(|id| id.to_string()))
        .bind(registration.attendee.external_person_id().map(|id| id.to_string()))
        .bind(registration.full_name.clone())
        .bind(registration.email.clone())
        .bind(registration.status.as_str())
        .bind(registration.priority)
        .bind(registration.invited_at.naive_utc())
        .bind(registration.payment_token_hash.clone())
        .bind(registration.payment_token_expires_at.map(|dt| dt.naive_utc()))
        .bind(registration.payment_artifact_id.clone())
        .bind(registration.amount_paid_cents)
        .bind(registration.confirmed_at.map(|dt| dt.naive_utc()))
        .bind(registration.created_at.naive_utc())
        .bind(registration.updated_at.naive_utc())
}

fn status_placeholders(statuses: &[RegistrationStatus]) -> String {
    vec!["?"; statuses.len()].join(", ")
}

pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Registration>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM registrations WHERE id = ?", REGISTRATION_COLUMNS);
    let row = sqlx::query_as::<_, RegistrationRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    row.map(row_to_registration).transpose()
}

pub async fn list_by_workshop_and_status<'e, E>(
    executor: E,
    workshop_id: Uuid,
    statuses: &[RegistrationStatus],
) -> Result<Vec<Registration>>
where
    E: Executor<'e, Database = Sqlite>,
{
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {} FROM registrations WHERE workshop_id = ? AND status IN ({}) \
         ORDER BY priority ASC, invited_at ASC, id ASC",
        REGISTRATION_COLUMNS,
        status_placeholders(statuses)
    );
    let mut query = sqlx::query_as::<_, RegistrationRow>(&sql).bind(workshop_id.to_string());
    for status in statuses {
        query = query.bind(status.as_str());
    }
    let rows = query
        .fetch_all(executor)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    rows.into_iter()
        .map(row_to_registration)
        .collect()
}

pub async fn insert<'e, E>(executor: E, registration: &Registration) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "INSERT INTO registrations ({}) VALUES ({})",
        INSERT_COLUMNS, INSERT_PLACEHOLDERS
    );
    bind_new(sqlx::query(&sql), registration)
        .execute(executor)
        .await?;
    Ok(())
}

/// Moves a registration out of any of `from` into `to`.
///
/// The conditional update is what makes redelivered callbacks and
/// concurrent admin actions harmless: only the first caller sees `true`.
pub async fn transition<'e, E>(
    executor: E,
    id: Uuid,
    from: &[RegistrationStatus],
    to: RegistrationStatus,
    at: DateTime<chrono::Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let stamp_column = match to {
        RegistrationStatus::Confirmed => Some("confirmed_at"),
        RegistrationStatus::Attended => Some("checked_in_at"),
        RegistrationStatus::Cancelled => Some("cancelled_at"),
        _ => None,
    };
    let stamp = stamp_column
        .map(|column| format!(", {} = ?", column))
        .unwrap_or_default();
    let sql = format!(
        "UPDATE registrations SET status = ?, updated_at = ?{} WHERE id = ? AND status IN ({})",
        stamp,
        status_placeholders(from)
    );
    let at = at.naive_utc();
    let mut query = sqlx::query(&sql).bind(to.as_str()).bind(at);
    if stamp_column.is_some() {
        query = query.bind(at);
    }
    query = query.bind(id.to_string());
    for status in from {
        query = query.bind(status.as_str());
    }
    let result = query
        .execute(executor)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

/// Applies a successful payment to an invited registration.
///
/// Free workshops confirm with no artifact and a zero amount.
pub async fn confirm_payment<'e, E>(
    executor: E,
    id: Uuid,
    artifact_id: Option<&str>,
    amount_cents: i64,
    at: DateTime<chrono::Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE registrations
        SET status = 'confirmed', payment_artifact_id = COALESCE(?, payment_artifact_id),
            amount_paid_cents = ?,
            confirmed_at = ?, updated_at = ?
        WHERE id = ? AND status = 'invited'
        "#
    )
    .bind(artifact_id)
    .bind(amount_cents)
    .bind(at.naive_utc())
    .bind(at.naive_utc())
    .bind(id.to_string())
    .execute(executor)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

pub async fn set_payment_artifact<'e, E>(executor: E, id: Uuid, artifact_id: &str, at: DateTime<chrono::Utc>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE registrations SET payment_artifact_id = ?, updated_at = ? WHERE id = ? AND status = 'invited'"
    )
    .bind(artifact_id)
    .bind(at.naive_utc())
    .bind(id.to_string())
    .execute(executor)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

/// Stores an onboarding token hash unless one was already issued.
pub async fn issue_onboarding_token<'e, E>(executor: E, id: Uuid, token_hash: &str, at: DateTime<chrono::Utc>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE registrations
        SET onboarding_token_hash = ?, onboarding_token_issued_at = ?, updated_at = ?
        WHERE id = ? AND status = 'confirmed' AND onboarding_token_hash IS NULL
        "#
    )
    .bind(token_hash)
    .bind(at.naive_utc())
    .bind(at.naive_utc())
    .bind(id.to_string())
    .execute(executor)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

/// Records onboarding answers, voids the token and moves to pre_checked.
pub async fn complete_onboarding<'e, E>(
    executor: E,
    id: Uuid,
    submission: &OnboardingSubmission,
    at: DateTime<chrono::Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let at = at.naive_utc();
    let media_consent_at = if submission.media_consent { Some(at) } else { None };

    let result = sqlx::query(
        r#"
        UPDATE registrations
        SET status = 'pre_checked', insurance_confirmed_at = ?, media_consent_at = ?,
            signature = ?, onboarding_completed_at = ?,
            onboarding_token_used_at = COALESCE(onboarding_token_used_at, ?), updated_at = ?
        WHERE id = ? AND status = 'confirmed' AND onboarding_token_used_at IS NULL
        "#
    )
    .bind(at)
    .bind(media_consent_at)
    .bind(&submission.signature)
    .bind(at)
    .bind(at)
    .bind(at)
    .bind(id.to_string())
    .execute(executor)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_follow_up_sent<'e, E>(executor: E, id: Uuid, at: DateTime<chrono::Utc>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE registrations SET follow_up_sent_at = ?, updated_at = ? WHERE id = ? AND follow_up_sent_at IS NULL"
    )
    .bind(at.naive_utc())
    .bind(at.naive_utc())
    .bind(id.to_string())
    .execute(executor)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

/// The most recent registration of `attendee` for a workshop, in any status.
pub async fn find_for_attendee<'e, E>(executor: E, workshop_id: Uuid, attendee: &Attendee) -> Result<Option<Registration>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (column, attendee_id) = match attendee {
        Attendee::Member(id) => ("member_id", id),
        Attendee::External(id) => ("external_person_id", id),
    };
    let sql = format!(
        "SELECT {} FROM registrations WHERE workshop_id = ? AND {} = ? ORDER BY created_at DESC LIMIT 1",
        REGISTRATION_COLUMNS, column
    );
    let row = sqlx::query_as::<_, RegistrationRow>(&sql)
        .bind(workshop_id.to_string())
        .bind(attendee_id.to_string())
        .fetch_optional(executor)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    row.map(row_to_registration).transpose()
}

pub struct SqliteRegistrationRepository {
    pool: SqlitePool,
}

impl SqliteRegistrationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn find_one_by(&self, column: &str, value: &str) -> Result<Option<Registration>> {
        let sql = format!(
            "SELECT {} FROM registrations WHERE {} = ? ORDER BY created_at DESC LIMIT 1",
            REGISTRATION_COLUMNS, column
        );
        let row = sqlx::query_as::<_, RegistrationRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(row_to_registration).transpose()
    }
}

#[async_trait]
impl RegistrationRepository for SqliteRegistrationRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Registration>> {
        find_by_id(&self.pool, id).await
    }

    async fn find_by_payment_token(&self, token_hash: &str) -> Result<Option<Registration>> {
        self.find_one_by("payment_token_hash", token_hash).await
    }

    async fn find_by_onboarding_token(&self, token_hash: &str) -> Result<Option<Registration>> {
        self.find_one_by("onboarding_token_hash", token_hash).await
    }

    async fn find_by_artifact(&self, artifact_id: &str) -> Result<Option<Registration>> {
        self.find_one_by("payment_artifact_id", artifact_id).await
    }

    async fn find_for_attendee(&self, workshop_id: Uuid, attendee: &Attendee) -> Result<Option<Registration>> {
        find_for_attendee(&self.pool, workshop_id, attendee).await
    }

    async fn find_active_by_email(&self, workshop_id: Uuid, email: &str) -> Result<Option<Registration>> {
        let sql = format!(
            "SELECT {} FROM registrations \
             WHERE workshop_id = ? AND lower(email) = lower(?) \
               AND status IN ('invited', 'confirmed', 'pre_checked') \
             ORDER BY created_at DESC LIMIT 1",
            REGISTRATION_COLUMNS
        );
        let row = sqlx::query_as::<_, RegistrationRow>(&sql)
            .bind(workshop_id.to_string())
            .bind(email.trim())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(row_to_registration).transpose()
    }

    async fn find_external_person_by_email(&self, email: &str) -> Result<Option<Uuid>> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT external_person_id FROM registrations \
             WHERE external_person_id IS NOT NULL AND lower(email) = lower(?) \
             ORDER BY created_at ASC LIMIT 1",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        parse_optional_uuid(id.as_deref())
    }

    async fn list_by_workshop(&self, workshop_id: Uuid) -> Result<Vec<Registration>> {
        let sql = format!(
            "SELECT {} FROM registrations WHERE workshop_id = ? ORDER BY priority ASC, invited_at ASC, id ASC",
            REGISTRATION_COLUMNS
        );
        let rows = sqlx::query_as::<_, RegistrationRow>(&sql)
            .bind(workshop_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter()
            .map(row_to_registration)
            .collect()
    }

    async fn list_by_workshop_and_status(
        &self,
        workshop_id: Uuid,
        statuses: &[RegistrationStatus],
    ) -> Result<Vec<Registration>> {
        list_by_workshop_and_status(&self.pool, workshop_id, statuses).await
    }

    async fn count_occupied(&self, workshop_id: Uuid) -> Result<i64> {
        capacity::occupied(&self.pool, workshop_id).await
    }
}
