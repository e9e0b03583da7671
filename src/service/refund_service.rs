use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    clock::Clock,
    config::RefundConfig,
    domain::*,
    error::{AppError, Result},
    notifications::{Notification, NotificationManager, NotificationTemplate},
    payments::{PaymentProcessor, ProcessorCallback},
    repository::{
        refund_repository, registration_repository, RefundRepository, RegistrationRepository,
        WorkshopRepository,
    },
};

#[derive(Debug, Default, Clone, Serialize)]
pub struct RetryReport {
    pub retried: usize,
    pub failures: usize,
}

/// Whether `registration` may be refunded at `now` on the attendee's request.
///
/// Workshop cancellation skips this check; it refunds paid attendees
/// regardless of the window.
pub fn is_refund_eligible(
    registration: &Registration,
    workshop: &Workshop,
    existing: Option<&Refund>,
    now: DateTime<Utc>,
) -> Result<()> {
    if existing.is_some() || registration.status == RegistrationStatus::Refunded {
        return Err(AppError::Conflict("A refund already exists for this registration".to_string()));
    }

    if !matches!(
        registration.status,
        RegistrationStatus::Confirmed | RegistrationStatus::PreChecked
    ) {
        return Err(AppError::NotEligible(format!(
            "Registrations in status {} cannot be refunded",
            registration.status
        )));
    }

    if workshop.status != WorkshopStatus::Published {
        return Err(AppError::NotEligible(format!(
            "Workshop is {}",
            workshop.status
        )));
    }

    match workshop.refund_deadline() {
        None => Err(AppError::NotEligible("This workshop does not offer refunds".to_string())),
        Some(deadline) if now > deadline => Err(AppError::NotEligible(format!(
            "Refunds closed at {}",
            deadline.to_rfc3339()
        ))),
        Some(_) => Ok(()),
    }
}

pub struct RefundService {
    refund_repo: Arc<dyn RefundRepository>,
    registration_repo: Arc<dyn RegistrationRepository>,
    workshop_repo: Arc<dyn WorkshopRepository>,
    processor: Arc<dyn PaymentProcessor>,
    notifications: Arc<NotificationManager>,
    clock: Arc<dyn Clock>,
    pool: SqlitePool,
    config: RefundConfig,
}

impl RefundService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        refund_repo: Arc<dyn RefundRepository>,
        registration_repo: Arc<dyn RegistrationRepository>,
        workshop_repo: Arc<dyn WorkshopRepository>,
        processor: Arc<dyn PaymentProcessor>,
        notifications: Arc<NotificationManager>,
        clock: Arc<dyn Clock>,
        pool: SqlitePool,
        config: RefundConfig,
    ) -> Self {
        Self {
            refund_repo,
            registration_repo,
            workshop_repo,
            processor,
            notifications,
            clock,
            pool,
            config,
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Refund> {
        self.refund_repo.find_by_id(id).await?
            .ok_or_else(|| AppError::NotFound("Refund not found".to_string()))
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Refund>> {
        self.refund_repo.list(limit, offset).await
    }

    pub async fn list_by_status(&self, status: RefundStatus) -> Result<Vec<Refund>> {
        self.refund_repo.list_by_status(status).await
    }

    /// Eligibility check without side effects, for "can I still get my money back".
    pub async fn check_eligibility(&self, registration_id: Uuid) -> Result<()> {
        let (registration, workshop) = self.load(registration_id).await?;
        let existing = self.refund_repo.find_by_registration(registration_id).await?;
        is_refund_eligible(&registration, &workshop, existing.as_ref(), self.clock.now())
    }

    /// Refunds a paid registration on request.
    ///
    /// The registration flips to refunded and its seat is released before the
    /// processor is called. A processor failure leaves the refund `failed`
    /// for the retry job; it does not undo the local state.
    pub async fn request_refund(
        &self,
        registration_id: Uuid,
        request: RefundRequest,
        actor: Option<Uuid>,
    ) -> Result<Refund> {
        let (registration, workshop) = self.load(registration_id).await?;
        let existing = self.refund_repo.find_by_registration(registration_id).await?;
        is_refund_eligible(&registration, &workshop, existing.as_ref(), self.clock.now())?;

        let amount = self.refund_amount(&registration, request.amount_cents)?;
        let refund = self
            .open_refund(
                &registration,
                registration.payment_artifact_id.clone(),
                amount,
                &request.reason,
                actor,
                true,
            )
            .await?;

        self.notify(NotificationTemplate::RefundRequested, &registration, &workshop, &refund).await;
        self.submit(refund, actor).await
    }

    /// Refunds a paid registration of a workshop that is being cancelled.
    pub(crate) async fn refund_for_cancelled_workshop(
        &self,
        registration: &Registration,
        workshop: &Workshop,
        actor: Option<Uuid>,
    ) -> Result<Refund> {
        if let Some(existing) = self.refund_repo.find_by_registration(registration.id).await? {
            return Ok(existing);
        }

        let refund = self
            .open_refund(
                registration,
                registration.payment_artifact_id.clone(),
                registration.amount_paid_cents,
                "Workshop cancelled",
                actor,
                true,
            )
            .await?;

        self.notify(NotificationTemplate::RefundRequested, registration, workshop, &refund).await;
        self.submit(refund, actor).await
    }

    /// Returns money that arrived for a registration that was already
    /// cancelled. The registration itself stays cancelled.
    pub(crate) async fn refund_unclaimed_payment(
        &self,
        registration: &Registration,
        artifact_id: &str,
        amount_cents: i64,
    ) -> Result<Option<Refund>> {
        if self.refund_repo.find_by_registration(registration.id).await?.is_some() {
            tracing::debug!("Late payment for registration {} already has a refund", registration.id);
            return Ok(None);
        }

        let refund = self
            .open_refund(
                registration,
                Some(artifact_id.to_string()),
                amount_cents,
                "Payment received after the registration was cancelled",
                None,
                false,
            )
            .await?;

        self.submit(refund, None).await.map(Some)
    }

    /// Sends a failed refund to the processor again.
    pub async fn retry(&self, id: Uuid, actor: Option<Uuid>) -> Result<Refund> {
        let now = self.clock.now();
        if !refund_repository::reset_for_retry(&self.pool, id, now).await? {
            let refund = self.get(id).await?;
            return Err(AppError::Conflict(format!(
                "Only failed refunds can be retried (this one is {})",
                refund.status
            )));
        }

        tracing::info!("Retrying refund {}", id);
        let refund = self.get(id).await?;
        self.submit(refund, actor).await
    }

    /// Retries every failed refund. Used by the `retryFailedRefunds` job.
    pub async fn retry_failed(&self) -> Result<RetryReport> {
        let failed = self.refund_repo.list_by_status(RefundStatus::Failed).await?;
        let mut report = RetryReport::default();

        for refund in failed {
            match self.retry(refund.id, None).await {
                Ok(updated) if updated.status == RefundStatus::Failed => report.failures += 1,
                Ok(_) => report.retried += 1,
                Err(e) => {
                    report.failures += 1;
                    tracing::error!("Refund retry failed for {}: {}", refund.id, e);
                }
            }
        }

        Ok(report)
    }

    /// Gives up on a refund that has not reached the processor or failed there.
    ///
    /// The registration stays refunded; any money owed is settled outside
    /// the system.
    pub async fn cancel(&self, id: Uuid, actor: Option<Uuid>) -> Result<Refund> {
        if !refund_repository::mark_cancelled(&self.pool, id, actor, self.clock.now()).await? {
            let refund = self.get(id).await?;
            return Err(AppError::Conflict(format!(
                "Refund in status {} cannot be cancelled",
                refund.status
            )));
        }

        tracing::warn!("Refund {} cancelled by {:?}", id, actor);
        self.get(id).await
    }

    pub async fn handle_refund_completed(&self, callback: &ProcessorCallback) -> Result<()> {
        let Some(refund) = self.refund_repo.find_by_artifact(&callback.artifact_id).await? else {
            tracing::warn!("Refund completion for unknown artifact {}", callback.artifact_id);
            return Ok(());
        };

        if !refund_repository::mark_completed(&self.pool, refund.id, self.clock.now()).await? {
            tracing::debug!("Refund {} already settled ({})", refund.id, refund.status);
            return Ok(());
        }

        tracing::info!("Refund {} completed ({} cents)", refund.id, refund.amount_cents);
        if let Ok((registration, workshop)) = self.load(refund.registration_id).await {
            self.notify(NotificationTemplate::RefundCompleted, &registration, &workshop, &refund).await;
        }
        Ok(())
    }

    pub async fn handle_refund_failed(&self, callback: &ProcessorCallback) -> Result<()> {
        let Some(refund) = self.refund_repo.find_by_artifact(&callback.artifact_id).await? else {
            tracing::warn!("Refund failure for unknown artifact {}", callback.artifact_id);
            return Ok(());
        };

        if refund_repository::mark_failed(
            &self.pool,
            refund.id,
            "Processor reported the refund as failed",
            self.clock.now(),
        )
        .await?
        {
            tracing::error!("Processor failed refund {}", refund.id);
        }
        Ok(())
    }

    fn refund_amount(&self, registration: &Registration, requested: Option<i64>) -> Result<i64> {
        let paid = registration.amount_paid_cents;
        match requested {
            None => Ok(paid),
            Some(amount) if amount == paid => Ok(paid),
            Some(amount) if self.config.allow_partial && amount > 0 && amount < paid => Ok(amount),
            Some(_) if !self.config.allow_partial => Err(AppError::Validation(
                "Partial refunds are not enabled".to_string(),
            )),
            Some(amount) => Err(AppError::Validation(format!(
                "Refund amount must be between 1 and {} cents, got {}",
                paid, amount
            ))),
        }
    }

    /// Inserts the pending refund and, when `release_seat`, flips the
    /// registration to refunded in the same transaction.
    async fn open_refund(
        &self,
        registration: &Registration,
        payment_artifact_id: Option<String>,
        amount_cents: i64,
        reason: &str,
        actor: Option<Uuid>,
        release_seat: bool,
    ) -> Result<Refund> {
        let now = self.clock.now();
        let refund = Refund {
            id: Uuid::new_v4(),
            registration_id: registration.id,
            payment_artifact_id,
            amount_cents,
            reason: reason.to_string(),
            status: RefundStatus::Pending,
            processor_refund_id: None,
            failure_reason: None,
            requested_by: actor,
            processed_by: None,
            requested_at: now,
            processed_at: None,
            completed_at: None,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;
        refund_repository::insert(&mut *tx, &refund).await?;

        if release_seat {
            let flipped = registration_repository::transition(
                &mut *tx,
                registration.id,
                &[RegistrationStatus::Confirmed, RegistrationStatus::PreChecked],
                RegistrationStatus::Refunded,
                now,
            )
            .await?;
            if !flipped {
                return Err(AppError::Conflict("Registration changed while refunding".to_string()));
            }
        }

        tx.commit().await?;

        tracing::info!(
            "Opened refund {} for registration {} ({} cents)",
            refund.id,
            registration.id,
            amount_cents
        );
        Ok(refund)
    }

    /// Hands a pending refund to the processor. Runs outside any transaction.
    async fn submit(&self, refund: Refund, actor: Option<Uuid>) -> Result<Refund> {
        if refund.status != RefundStatus::Pending {
            return Ok(refund);
        }
        let now = self.clock.now();

        if refund.amount_cents == 0 {
            refund_repository::mark_completed(&self.pool, refund.id, now).await?;
            return self.get(refund.id).await;
        }

        let Some(artifact_id) = refund.payment_artifact_id.as_deref() else {
            refund_repository::mark_failed(&self.pool, refund.id, "No payment on record", now).await?;
            return self.get(refund.id).await;
        };

        match self.processor.create_refund(artifact_id, refund.amount_cents).await {
            Ok(processor_refund_id) => {
                refund_repository::mark_processing(&self.pool, refund.id, &processor_refund_id, actor, now).await?;
                tracing::info!("Refund {} accepted by {} as {}", refund.id, self.processor.name(), processor_refund_id);
            }
            Err(e) => {
                tracing::error!("Processor refund failed for {}: {}", refund.id, e);
                refund_repository::mark_failed(&self.pool, refund.id, &e.to_string(), now).await?;
            }
        }

        self.get(refund.id).await
    }

    async fn load(&self, registration_id: Uuid) -> Result<(Registration, Workshop)> {
        let registration = self.registration_repo.find_by_id(registration_id).await?
            .ok_or_else(|| AppError::NotFound("Registration not found".to_string()))?;
        let workshop = self.workshop_repo.find_by_id(registration.workshop_id).await?
            .ok_or_else(|| AppError::NotFound("Workshop not found".to_string()))?;
        Ok((registration, workshop))
    }

    async fn notify(
        &self,
        template: NotificationTemplate,
        registration: &Registration,
        workshop: &Workshop,
        refund: &Refund,
    ) {
        let notification = Notification::new(template, &registration.email)
            .var("full_name", &registration.full_name)
            .var("workshop_title", &workshop.title)
            .var("amount_cents", refund.amount_cents)
            .var("currency", &workshop.currency);
        self.notifications.send(notification).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn workshop(starts_in_days: i64, refund_window_days: Option<i64>) -> Workshop {
        let now = Utc::now();
        Workshop {
            id: Uuid::new_v4(),
            title: "Knife Sharpening".to_string(),
            description: String::new(),
            location: None,
            status: WorkshopStatus::Published,
            starts_at: now + Duration::days(starts_in_days),
            ends_at: now + Duration::days(starts_in_days) + Duration::hours(3),
            capacity: 10,
            batch_size: 10,
            cool_off_days: 5,
            refund_window_days,
            price_cents: 2500,
            currency: "usd".to_string(),
            last_batch_sent_at: None,
            published_at: Some(now),
            finished_at: None,
            cancelled_at: None,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    fn registration(workshop: &Workshop, status: RegistrationStatus) -> Registration {
        let mut invitation = crate::service::invitation_service::new_invitation(
            workshop,
            Attendee::Member(Uuid::new_v4()),
            "Pat Doe",
            "pat@example.com",
            0,
            None,
            Utc::now(),
        )
        .registration;
        invitation.status = status;
        invitation.amount_paid_cents = workshop.price_cents;
        invitation
    }

    #[test]
    fn test_window_boundary() {
        let now = Utc::now();
        let w = workshop(4, Some(3));
        let r = registration(&w, RegistrationStatus::Confirmed);
        assert!(is_refund_eligible(&r, &w, None, now).is_ok());

        let late = now + Duration::days(3);
        assert!(matches!(
            is_refund_eligible(&r, &w, None, late),
            Err(AppError::NotEligible(_))
        ));
    }

    #[test]
    fn test_no_window_means_no_refund() {
        let w = workshop(30, None);
        let r = registration(&w, RegistrationStatus::PreChecked);
        assert!(matches!(
            is_refund_eligible(&r, &w, None, Utc::now()),
            Err(AppError::NotEligible(_))
        ));
    }

    #[test]
    fn test_invited_and_refunded_rejected() {
        let w = workshop(30, Some(3));
        let invited = registration(&w, RegistrationStatus::Invited);
        assert!(matches!(
            is_refund_eligible(&invited, &w, None, Utc::now()),
            Err(AppError::NotEligible(_))
        ));

        let refunded = registration(&w, RegistrationStatus::Refunded);
        assert!(matches!(
            is_refund_eligible(&refunded, &w, None, Utc::now()),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn test_finished_workshop_rejected() {
        let mut w = workshop(30, Some(3));
        w.status = WorkshopStatus::Finished;
        let r = registration(&w, RegistrationStatus::Confirmed);
        assert!(matches!(
            is_refund_eligible(&r, &w, None, Utc::now()),
            Err(AppError::NotEligible(_))
        ));
    }
}
