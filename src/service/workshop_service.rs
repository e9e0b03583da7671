use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;

use crate::{
    clock::Clock,
    config::WorkshopConfig,
    domain::*,
    error::{AppError, Result},
    notifications::{Notification, NotificationManager, NotificationTemplate},
    repository::{
        capacity, registration_repository, workshop_repository, RegistrationRepository,
        WorkshopRepository,
    },
    service::{
        invitation_service::{Invitation, InvitationService},
        payment_session_service::PaymentSessionCache,
        refund_service::RefundService,
    },
};

#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub workshop: Workshop,
    pub invitations: Vec<Invitation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub workshop: Workshop,
    pub cancelled_registrations: usize,
    pub refunds: Vec<Refund>,
    pub refund_failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinishOutcome {
    pub workshop: Workshop,
    pub no_shows: usize,
    pub lapsed_invitations: usize,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct FinalizeReport {
    pub finished: usize,
    pub no_shows: usize,
    pub failures: usize,
}

pub struct WorkshopService {
    repo: Arc<dyn WorkshopRepository>,
    registration_repo: Arc<dyn RegistrationRepository>,
    invitations: Arc<InvitationService>,
    refunds: Arc<RefundService>,
    sessions: Arc<PaymentSessionCache>,
    notifications: Arc<NotificationManager>,
    clock: Arc<dyn Clock>,
    pool: SqlitePool,
    config: WorkshopConfig,
}

impl WorkshopService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<dyn WorkshopRepository>,
        registration_repo: Arc<dyn RegistrationRepository>,
        invitations: Arc<InvitationService>,
        refunds: Arc<RefundService>,
        sessions: Arc<PaymentSessionCache>,
        notifications: Arc<NotificationManager>,
        clock: Arc<dyn Clock>,
        pool: SqlitePool,
        config: WorkshopConfig,
    ) -> Self {
        Self {
            repo,
            registration_repo,
            invitations,
            refunds,
            sessions,
            notifications,
            clock,
            pool,
            config,
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Workshop> {
        self.repo.find_by_id(id).await?
            .ok_or_else(|| AppError::NotFound("Workshop not found".to_string()))
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Workshop>> {
        self.repo.list(limit, offset).await
    }

    pub async fn list_by_status(&self, status: WorkshopStatus) -> Result<Vec<Workshop>> {
        self.repo.list_by_status(status).await
    }

    /// Seats taken and seats left.
    pub async fn occupancy(&self, id: Uuid) -> Result<(i64, i64)> {
        let workshop = self.get(id).await?;
        let occupied = self.registration_repo.count_occupied(id).await?;
        Ok((occupied, capacity::remaining(workshop.capacity, occupied)))
    }

    pub async fn create(&self, request: CreateWorkshopRequest, created_by: Option<Uuid>) -> Result<Workshop> {
        request.validate()?;

        let now = self.clock.now();
        let workshop = Workshop {
            id: Uuid::new_v4(),
            title: request.title,
            description: request.description,
            location: request.location,
            status: WorkshopStatus::Draft,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            capacity: request.capacity,
            batch_size: request.batch_size.unwrap_or(request.capacity),
            cool_off_days: request.cool_off_days.unwrap_or(self.config.default_cool_off_days),
            refund_window_days: request.refund_window_days,
            price_cents: request.price_cents,
            currency: request.currency.unwrap_or_else(|| self.config.currency.clone()).to_lowercase(),
            last_batch_sent_at: None,
            published_at: None,
            finished_at: None,
            cancelled_at: None,
            created_by: created_by.unwrap_or_else(Uuid::nil),
            created_at: now,
            updated_at: now,
        };

        let workshop = self.repo.create(workshop).await?;
        tracing::info!("Workshop {} created: {}", workshop.id, workshop.title);
        Ok(workshop)
    }

    /// Edits a draft. Published workshops only accept `raise_capacity`.
    pub async fn update(&self, id: Uuid, request: UpdateWorkshopRequest) -> Result<Workshop> {
        request.validate()?;

        let mut workshop = self.get(id).await?;
        if workshop.status != WorkshopStatus::Draft {
            return Err(AppError::Conflict(format!(
                "Only draft workshops can be edited (this one is {})",
                workshop.status
            )));
        }

        if let Some(title) = request.title {
            workshop.title = title;
        }
        if let Some(description) = request.description {
            workshop.description = description;
        }
        if let Some(location) = request.location {
            workshop.location = Some(location);
        }
        if let Some(starts_at) = request.starts_at {
            workshop.starts_at = starts_at;
        }
        if let Some(ends_at) = request.ends_at {
            workshop.ends_at = ends_at;
        }
        if let Some(capacity) = request.capacity {
            workshop.capacity = capacity;
        }
        if let Some(batch_size) = request.batch_size {
            workshop.batch_size = batch_size;
        }
        if let Some(cool_off_days) = request.cool_off_days {
            workshop.cool_off_days = cool_off_days;
        }
        if let Some(refund_window_days) = request.refund_window_days {
            workshop.refund_window_days = Some(refund_window_days);
        }
        if let Some(price_cents) = request.price_cents {
            workshop.price_cents = price_cents;
        }

        if workshop.ends_at < workshop.starts_at {
            return Err(AppError::Validation("ends_at must not be before starts_at".to_string()));
        }

        self.repo.update(id, workshop).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let workshop = self.get(id).await?;
        if workshop.status != WorkshopStatus::Draft {
            return Err(AppError::Conflict("Only draft workshops can be deleted".to_string()));
        }
        if !self.registration_repo.list_by_workshop(id).await?.is_empty() {
            return Err(AppError::Conflict("Workshop has registrations".to_string()));
        }

        self.repo.delete(id).await?;
        tracing::info!("Workshop {} deleted", id);
        Ok(())
    }

    /// Adds seats. Capacity is never lowered once set; new seats are filled by
    /// the next top-up.
    pub async fn raise_capacity(&self, id: Uuid, new_capacity: i64, batch_size: Option<i64>) -> Result<Workshop> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        capacity::lock_workshop(&mut tx, id, now).await?;

        let workshop = workshop_repository::find_by_id(&mut *tx, id).await?
            .ok_or_else(|| AppError::NotFound("Workshop not found".to_string()))?;

        if workshop.status.is_terminal() {
            return Err(AppError::Conflict(format!("Workshop is {}", workshop.status)));
        }
        if new_capacity < workshop.capacity {
            return Err(AppError::Validation(format!(
                "Capacity can only be raised (currently {})",
                workshop.capacity
            )));
        }
        let batch_size = batch_size.unwrap_or(workshop.batch_size);
        if batch_size < 1 {
            return Err(AppError::Validation("batch_size must be at least 1".to_string()));
        }

        workshop_repository::set_capacity(&mut *tx, id, new_capacity, batch_size, now).await?;
        tx.commit().await?;

        tracing::info!("Workshop {} capacity raised {} -> {}", id, workshop.capacity, new_capacity);
        self.get(id).await
    }

    /// Publishes a draft and sends the first invitation batch.
    ///
    /// The status flip and the batch share one transaction: if inviting
    /// fails, the workshop stays a draft.
    pub async fn publish(&self, id: Uuid) -> Result<PublishOutcome> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        capacity::lock_workshop(&mut tx, id, now).await?;

        let workshop = workshop_repository::find_by_id(&mut *tx, id).await?
            .ok_or_else(|| AppError::NotFound("Workshop not found".to_string()))?;

        if !workshop.status.can_transition_to(WorkshopStatus::Published) {
            return Err(AppError::Conflict(format!("Workshop is already {}", workshop.status)));
        }
        if workshop.capacity <= 0 {
            return Err(AppError::Validation("Capacity must be positive".to_string()));
        }
        if workshop.starts_at <= now {
            return Err(AppError::Validation("Workshop must start in the future".to_string()));
        }

        if !workshop_repository::transition(&mut *tx, id, WorkshopStatus::Draft, WorkshopStatus::Published, now).await? {
            return Err(AppError::Conflict("Workshop changed while publishing".to_string()));
        }

        let published = Workshop {
            status: WorkshopStatus::Published,
            published_at: Some(now),
            ..workshop
        };
        let invitations = self.invitations.apply_batch(&mut tx, &published, now).await?;
        tx.commit().await?;

        tracing::info!("Workshop {} published with {} invitations", id, invitations.len());
        self.invitations.notify_invited(&published, &invitations).await;

        Ok(PublishOutcome {
            workshop: self.get(id).await?,
            invitations,
        })
    }

    /// Cancels a draft or published workshop.
    ///
    /// Open invitations are cancelled with the workshop. Paid attendees are
    /// refunded regardless of the refund window; unpaid confirmed ones are
    /// cancelled. Calling this again on a cancelled workshop re-drives any
    /// refunds that did not get opened the first time.
    pub async fn cancel(&self, id: Uuid, actor: Option<Uuid>) -> Result<CancelOutcome> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        capacity::lock_workshop(&mut tx, id, now).await?;

        let workshop = workshop_repository::find_by_id(&mut *tx, id).await?
            .ok_or_else(|| AppError::NotFound("Workshop not found".to_string()))?;

        let already_cancelled = workshop.status == WorkshopStatus::Cancelled;
        if !already_cancelled && !workshop.status.can_transition_to(WorkshopStatus::Cancelled) {
            return Err(AppError::Conflict(format!("Workshop is {}", workshop.status)));
        }
        if !already_cancelled
            && !workshop_repository::transition(&mut *tx, id, workshop.status, WorkshopStatus::Cancelled, now).await?
        {
            return Err(AppError::Conflict("Workshop changed while cancelling".to_string()));
        }

        let invited = registration_repository::list_by_workshop_and_status(
            &mut *tx,
            id,
            &[RegistrationStatus::Invited],
        )
        .await?;
        for registration in &invited {
            registration_repository::transition(
                &mut *tx,
                registration.id,
                &[RegistrationStatus::Invited],
                RegistrationStatus::Cancelled,
                now,
            )
            .await?;
        }

        let seated = registration_repository::list_by_workshop_and_status(
            &mut *tx,
            id,
            &[RegistrationStatus::Confirmed, RegistrationStatus::PreChecked],
        )
        .await?;
        let (paid, unpaid): (Vec<Registration>, Vec<Registration>) = seated
            .into_iter()
            .partition(|r| r.amount_paid_cents > 0);

        for registration in &unpaid {
            registration_repository::transition(
                &mut *tx,
                registration.id,
                &[RegistrationStatus::Confirmed, RegistrationStatus::PreChecked],
                RegistrationStatus::Cancelled,
                now,
            )
            .await?;
        }

        tx.commit().await?;

        let workshop = self.get(id).await?;
        tracing::info!(
            "Workshop {} cancelled by {:?}: {} invitations and {} unpaid seats cancelled, {} to refund",
            id,
            actor,
            invited.len(),
            unpaid.len(),
            paid.len()
        );

        let intent_key = IntentKey::workshop(id);
        for registration in &invited {
            if let Err(e) = self.sessions.retire(registration.attendee.user_id(), &intent_key).await {
                tracing::warn!("Open checkout for registration {} left for the sweep: {}", registration.id, e);
            }
        }

        let mut refunds = Vec::with_capacity(paid.len());
        let mut refund_failures = 0;
        for registration in &paid {
            match self.refunds.refund_for_cancelled_workshop(registration, &workshop, actor).await {
                Ok(refund) => refunds.push(refund),
                Err(e) => {
                    refund_failures += 1;
                    tracing::error!("Could not refund registration {}: {}", registration.id, e);
                }
            }
        }

        let notifications = invited
            .iter()
            .chain(unpaid.iter())
            .chain(paid.iter())
            .map(|registration| {
                Notification::new(NotificationTemplate::WorkshopCancelled, &registration.email)
                    .var("full_name", &registration.full_name)
                    .var("workshop_title", &workshop.title)
                    .var("refunded", registration.amount_paid_cents > 0)
            })
            .collect();
        self.notifications.send_all(notifications).await;

        Ok(CancelOutcome {
            workshop,
            cancelled_registrations: invited.len() + unpaid.len(),
            refunds,
            refund_failures,
        })
    }

    /// Closes a published workshop: confirmed and pre-checked attendees who
    /// never checked in become no-shows and open invitations lapse.
    ///
    /// Refuses before `ends_at` unless `force` is set.
    pub async fn finish(&self, id: Uuid, force: bool) -> Result<FinishOutcome> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        capacity::lock_workshop(&mut tx, id, now).await?;

        let workshop = workshop_repository::find_by_id(&mut *tx, id).await?
            .ok_or_else(|| AppError::NotFound("Workshop not found".to_string()))?;

        if !workshop.status.can_transition_to(WorkshopStatus::Finished) {
            return Err(AppError::Conflict(format!("Workshop is {}", workshop.status)));
        }
        if !force && now < workshop.ends_at {
            return Err(AppError::NotEligible("Workshop has not ended yet".to_string()));
        }

        if !workshop_repository::transition(&mut *tx, id, WorkshopStatus::Published, WorkshopStatus::Finished, now).await? {
            return Err(AppError::Conflict("Workshop changed while finishing".to_string()));
        }

        let absent = registration_repository::list_by_workshop_and_status(
            &mut *tx,
            id,
            &[RegistrationStatus::Confirmed, RegistrationStatus::PreChecked],
        )
        .await?;
        for registration in &absent {
            registration_repository::transition(
                &mut *tx,
                registration.id,
                &[RegistrationStatus::Confirmed, RegistrationStatus::PreChecked],
                RegistrationStatus::NoShow,
                now,
            )
            .await?;
        }

        let lapsed = registration_repository::list_by_workshop_and_status(
            &mut *tx,
            id,
            &[RegistrationStatus::Invited],
        )
        .await?;
        for registration in &lapsed {
            registration_repository::transition(
                &mut *tx,
                registration.id,
                &[RegistrationStatus::Invited],
                RegistrationStatus::Cancelled,
                now,
            )
            .await?;
        }

        tx.commit().await?;

        let intent_key = IntentKey::workshop(id);
        for registration in &lapsed {
            if let Err(e) = self.sessions.retire(registration.attendee.user_id(), &intent_key).await {
                tracing::warn!("Open checkout for registration {} left for the sweep: {}", registration.id, e);
            }
        }

        tracing::info!(
            "Workshop {} finished{}: {} no-shows, {} lapsed invitations",
            id,
            if force { " (forced)" } else { "" },
            absent.len(),
            lapsed.len()
        );

        Ok(FinishOutcome {
            workshop: self.get(id).await?,
            no_shows: absent.len(),
            lapsed_invitations: lapsed.len(),
        })
    }

    /// Finishes every published workshop whose end has passed.
    pub async fn finalize_attendance(&self) -> Result<FinalizeReport> {
        let now = self.clock.now();
        let mut report = FinalizeReport::default();

        for workshop in self.repo.list_by_status(WorkshopStatus::Published).await? {
            if workshop.ends_at > now {
                continue;
            }
            match self.finish(workshop.id, false).await {
                Ok(outcome) => {
                    report.finished += 1;
                    report.no_shows += outcome.no_shows;
                }
                Err(e) => {
                    report.failures += 1;
                    tracing::error!("Finalization failed for workshop {}: {}", workshop.id, e);
                }
            }
        }

        Ok(report)
    }
}

