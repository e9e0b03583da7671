use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::domain::*;
use crate::error::Result;

pub mod capacity;
pub mod workshop_repository;
pub mod registration_repository;
pub mod waitlist_repository;
pub mod payment_session_repository;
pub mod refund_repository;
pub mod processor_event_repository;

pub use workshop_repository::SqliteWorkshopRepository;
pub use registration_repository::SqliteRegistrationRepository;
pub use waitlist_repository::SqliteWaitlistRepository;
pub use payment_session_repository::SqlitePaymentSessionRepository;
pub use refund_repository::SqliteRefundRepository;

/// Timestamps are stored as naive UTC, the way sqlx encodes them for SQLite.
pub(crate) fn to_utc(dt: chrono::NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(dt, Utc)
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| crate::error::AppError::Database(e.to_string()))
}

pub(crate) fn parse_optional_uuid(s: Option<&str>) -> Result<Option<Uuid>> {
    s.map(parse_uuid).transpose()
}

#[async_trait]
pub trait WorkshopRepository: Send + Sync {
    async fn create(&self, workshop: Workshop) -> Result<Workshop>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Workshop>>;
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Workshop>>;
    async fn list_by_status(&self, status: WorkshopStatus) -> Result<Vec<Workshop>>;
    async fn update(&self, id: Uuid, workshop: Workshop) -> Result<Workshop>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait RegistrationRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Registration>>;
    async fn find_by_payment_token(&self, token_hash: &str) -> Result<Option<Registration>>;
    async fn find_by_onboarding_token(&self, token_hash: &str) -> Result<Option<Registration>>;
    async fn find_by_artifact(&self, artifact_id: &str) -> Result<Option<Registration>>;
    async fn find_for_attendee(&self, workshop_id: Uuid, attendee: &Attendee) -> Result<Option<Registration>>;
    /// The invited, confirmed or pre-checked registration using `email`, compared case-insensitively.
    async fn find_active_by_email(&self, workshop_id: Uuid, email: &str) -> Result<Option<Registration>>;
    /// The external person id previously registered under `email`, if any.
    async fn find_external_person_by_email(&self, email: &str) -> Result<Option<Uuid>>;
    async fn list_by_workshop(&self, workshop_id: Uuid) -> Result<Vec<Registration>>;
    async fn list_by_workshop_and_status(
        &self,
        workshop_id: Uuid,
        statuses: &[RegistrationStatus],
    ) -> Result<Vec<Registration>>;
    async fn count_occupied(&self, workshop_id: Uuid) -> Result<i64>;
}

#[async_trait]
pub trait WaitlistRepository: Send + Sync {
    async fn create(&self, entry: WaitlistEntry) -> Result<WaitlistEntry>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<WaitlistEntry>>;
    async fn list_active(&self) -> Result<Vec<WaitlistEntry>>;
    async fn find_active_by_email(&self, email: &str) -> Result<Option<WaitlistEntry>>;
    async fn find_active_by_member(&self, member_id: Uuid) -> Result<Option<WaitlistEntry>>;
    async fn set_priority(&self, id: Uuid, priority: i64) -> Result<WaitlistEntry>;
    async fn remove(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait PaymentSessionRepository: Send + Sync {
    async fn create(&self, session: PaymentSession) -> Result<PaymentSession>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentSession>>;
    /// The unused session for (user, intent), expired or not.
    async fn find_unused(&self, user_id: Uuid, intent_key: &IntentKey) -> Result<Option<PaymentSession>>;
    async fn find_by_artifact(&self, artifact_id: &str) -> Result<Option<PaymentSession>>;
    /// Returns whether this call flipped the flag.
    async fn mark_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;
    /// Expired unused sessions, never-swept first, then least recently swept.
    async fn list_expired_unused(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<PaymentSession>>;
    async fn record_sweep_failure(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait RefundRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Refund>>;
    async fn find_by_registration(&self, registration_id: Uuid) -> Result<Option<Refund>>;
    async fn find_by_artifact(&self, artifact_id: &str) -> Result<Option<Refund>>;
    async fn list_by_status(&self, status: RefundStatus) -> Result<Vec<Refund>>;
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Refund>>;
}
