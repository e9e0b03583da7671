//! The capacity ledger.
//!
//! Occupied seats are never stored as a counter. They are always the number
//! of registrations in an occupying status, so releasing a seat is just a
//! status change. What this module guarantees is that admitting someone is
//! checked against that count atomically.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::{
    domain::{Registration, RegistrationStatus},
    error::{AppError, Result},
    repository::registration_repository::{bind_new, INSERT_COLUMNS},
};

const OCCUPYING_SQL: &str = "('invited', 'confirmed', 'pre_checked', 'attended')";
const ACTIVE_SQL: &str = "('invited', 'confirmed', 'pre_checked')";

pub async fn occupied<'e, E>(executor: E, workshop_id: Uuid) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT COUNT(*) FROM registrations WHERE workshop_id = ? AND status IN {}",
        OCCUPYING_SQL
    );
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(workshop_id.to_string())
        .fetch_one(executor)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(count)
}

/// Takes the workshop's write lock for the rest of the transaction.
///
/// SQLite has no `SELECT ... FOR UPDATE`; writing to the row first promotes
/// the transaction to a writer, so a second top-up or publish on the same
/// database waits here instead of reading a stale occupied count.
pub async fn lock_workshop(conn: &mut SqliteConnection, workshop_id: Uuid, at: DateTime<Utc>) -> Result<()> {
    let result = sqlx::query("UPDATE workshops SET updated_at = ? WHERE id = ?")
        .bind(at.naive_utc())
        .bind(workshop_id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Workshop not found".to_string()));
    }
    Ok(())
}

/// Inserts `registration` only if the published workshop still has a seat
/// and nobody with the same email already holds an active registration.
///
/// Both checks and the insert happen in one statement, so two concurrent
/// admissions at the last seat, or of the same person, cannot both succeed.
pub async fn admit<'e, E>(executor: E, registration: &Registration) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    debug_assert!(registration.status.occupies_seat());

    let sql = format!(
        "INSERT INTO registrations ({columns}) \
         SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ? \
         WHERE (SELECT COUNT(*) FROM registrations WHERE workshop_id = ? AND status IN {occupying}) \
             < (SELECT capacity FROM workshops WHERE id = ? AND status = 'published') \
           AND NOT EXISTS (SELECT 1 FROM registrations \
               WHERE workshop_id = ? AND lower(email) = lower(?) AND status IN {active})",
        columns = INSERT_COLUMNS,
        occupying = OCCUPYING_SQL,
        active = ACTIVE_SQL,
    );
    let workshop_id = registration.workshop_id.to_string();

    let result = bind_new(sqlx::query(&sql), registration)
        .bind(workshop_id.clone())
        .bind(workshop_id.clone())
        .bind(workshop_id)
        .bind(registration.email.clone())
        .execute(executor)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Seats left, never negative.
pub fn remaining(capacity: i64, occupied: i64) -> i64 {
    (capacity - occupied).max(0)
}

/// Whether a status change frees a seat.
pub fn releases_seat(from: RegistrationStatus, to: RegistrationStatus) -> bool {
    from.occupies_seat() && !to.occupies_seat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_never_negative() {
        assert_eq!(remaining(5, 3), 2);
        assert_eq!(remaining(5, 5), 0);
        assert_eq!(remaining(2, 3), 0);
    }

    #[test]
    fn test_releases_seat() {
        use RegistrationStatus::*;
        assert!(releases_seat(Invited, Cancelled));
        assert!(releases_seat(Confirmed, Refunded));
        assert!(releases_seat(PreChecked, NoShow));
        assert!(!releases_seat(Confirmed, Attended));
        assert!(!releases_seat(Invited, Confirmed));
    }
}
