use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::tokens::hash_token,
    clock::Clock,
    domain::*,
    error::{AppError, Result},
    notifications::{Notification, NotificationManager, NotificationTemplate},
    payments::ProcessorCallback,
    repository::{
        capacity, registration_repository, RegistrationRepository, WaitlistRepository,
        WorkshopRepository,
    },
    service::{
        invitation_service::{new_invitation, Invitation, InvitationService},
        payment_session_service::PaymentSessionCache,
        refund_service::RefundService,
    },
};

/// What the payment page needs after a payment link is opened.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentCheckout {
    pub registration: Registration,
    pub workshop_title: String,
    pub amount_cents: i64,
    pub currency: String,
    pub session_id: Option<Uuid>,
    pub artifact_id: Option<String>,
    pub client_secret: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct RegistrationService {
    registration_repo: Arc<dyn RegistrationRepository>,
    workshop_repo: Arc<dyn WorkshopRepository>,
    waitlist_repo: Arc<dyn WaitlistRepository>,
    sessions: Arc<PaymentSessionCache>,
    refunds: Arc<RefundService>,
    invitations: Arc<InvitationService>,
    notifications: Arc<NotificationManager>,
    clock: Arc<dyn Clock>,
    pool: SqlitePool,
}

impl RegistrationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registration_repo: Arc<dyn RegistrationRepository>,
        workshop_repo: Arc<dyn WorkshopRepository>,
        waitlist_repo: Arc<dyn WaitlistRepository>,
        sessions: Arc<PaymentSessionCache>,
        refunds: Arc<RefundService>,
        invitations: Arc<InvitationService>,
        notifications: Arc<NotificationManager>,
        clock: Arc<dyn Clock>,
        pool: SqlitePool,
    ) -> Self {
        Self {
            registration_repo,
            workshop_repo,
            waitlist_repo,
            sessions,
            refunds,
            invitations,
            notifications,
            clock,
            pool,
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Registration> {
        self.registration_repo.find_by_id(id).await?
            .ok_or_else(|| AppError::NotFound("Registration not found".to_string()))
    }

    pub async fn list_for_workshop(&self, workshop_id: Uuid) -> Result<Vec<Registration>> {
        self.registration_repo.list_by_workshop(workshop_id).await
    }

    /// Resolves a payment link and returns a checkout for it.
    ///
    /// Paid workshops get a cached payment session whose artifact is bound
    /// to the registration; free workshops are confirmed on the spot.
    pub async fn begin_payment(&self, token: &str) -> Result<PaymentCheckout> {
        let registration = self.find_by_payment_token(token).await?;
        let now = self.clock.now();

        match registration.status {
            RegistrationStatus::Invited => {}
            RegistrationStatus::Confirmed
            | RegistrationStatus::PreChecked
            | RegistrationStatus::Attended => {
                return Err(AppError::Conflict("This registration is already paid".to_string()));
            }
            _ => {
                return Err(AppError::Conflict("This payment link is no longer valid".to_string()));
            }
        }

        let link_valid = registration.payment_token_expires_at
            .map(|expires| now < expires)
            .unwrap_or(false);
        if !link_valid {
            return Err(AppError::Conflict("This payment link has expired".to_string()));
        }

        let workshop = self.load_workshop(registration.workshop_id).await?;
        if workshop.status != WorkshopStatus::Published {
            return Err(AppError::Conflict(format!("Workshop is {}", workshop.status)));
        }

        if workshop.is_free() {
            if !registration_repository::confirm_payment(&self.pool, registration.id, None, 0, now).await? {
                return Err(AppError::Conflict("Registration changed while confirming".to_string()));
            }
            tracing::info!("Registration {} confirmed for free workshop {}", registration.id, workshop.id);

            let registration = self.get(registration.id).await?;
            self.notify(NotificationTemplate::PaymentReceived, &registration, &workshop).await;

            return Ok(PaymentCheckout {
                registration,
                workshop_title: workshop.title,
                amount_cents: 0,
                currency: workshop.currency,
                session_id: None,
                artifact_id: None,
                client_secret: None,
                expires_at: None,
            });
        }

        let intent_key = IntentKey::workshop(workshop.id);
        let mut metadata = HashMap::new();
        metadata.insert("registration_id".to_string(), registration.id.to_string());
        metadata.insert("workshop_id".to_string(), workshop.id.to_string());

        let items = [PaymentItem {
            description: workshop.title.clone(),
            amount_cents: workshop.price_cents,
        }];
        let session = self
            .sessions
            .get_or_create_session(
                registration.attendee.user_id(),
                &intent_key,
                &items,
                &workshop.currency,
                metadata,
            )
            .await?;

        if let Some(artifact_id) = session.primary_artifact() {
            let bound = registration_repository::set_payment_artifact(&self.pool, registration.id, artifact_id, now).await?;
            if !bound {
                if let Err(e) = self.sessions.retire(registration.attendee.user_id(), &intent_key).await {
                    tracing::warn!("Could not retire session {} after lost race: {}", session.id, e);
                }
                return Err(AppError::Conflict("Registration changed while preparing payment".to_string()));
            }
        }

        let registration = self.get(registration.id).await?;
        Ok(PaymentCheckout {
            registration,
            workshop_title: workshop.title,
            amount_cents: session.total_cents(),
            currency: session.currency.clone(),
            session_id: Some(session.id),
            artifact_id: session.primary_artifact().map(str::to_string),
            client_secret: session.client_secrets.first().cloned(),
            expires_at: Some(session.expires_at),
        })
    }

    /// Lets an invitee turn the invitation down through their payment link.
    pub async fn decline(&self, token: &str) -> Result<Registration> {
        let registration = self.find_by_payment_token(token).await?;
        self.cancel_registration(registration.id, None).await
    }

    /// Admits someone directly, bypassing the waitlist.
    ///
    /// The seat check and insert are a single statement, so this cannot
    /// overfill the workshop even when racing a batch or another admission.
    pub async fn register_direct(
        &self,
        workshop_id: Uuid,
        request: DirectRegistrationRequest,
        actor: Option<Uuid>,
    ) -> Result<Invitation> {
        request.validate()?;

        let workshop = self.load_workshop(workshop_id).await?;
        let now = self.clock.now();

        if workshop.status != WorkshopStatus::Published {
            return Err(AppError::NotEligible(format!("Workshop is {}", workshop.status)));
        }
        if now >= workshop.payment_deadline() {
            return Err(AppError::NotEligible("Registration for this workshop has closed".to_string()));
        }

        let waitlist_entry = match request.member_id {
            Some(member_id) => self.waitlist_repo.find_active_by_member(member_id).await?,
            None => self.waitlist_repo.find_active_by_email(&request.email).await?,
        };
        let attendee = match (request.member_id, waitlist_entry.as_ref()) {
            (Some(member_id), _) => Attendee::Member(member_id),
            (None, Some(entry)) => entry.attendee,
            (None, None) => match self.registration_repo.find_external_person_by_email(&request.email).await? {
                Some(person_id) => Attendee::External(person_id),
                None => Attendee::External(Uuid::new_v4()),
            },
        };

        if let Some(existing) = self.registration_repo.find_for_attendee(workshop.id, &attendee).await? {
            if existing.status.is_active() {
                return Err(AppError::Conflict("Already registered for this workshop".to_string()));
            }
        }
        if self.registration_repo.find_active_by_email(workshop.id, &request.email).await?.is_some() {
            return Err(AppError::Conflict("Already registered for this workshop".to_string()));
        }

        let invitation = new_invitation(
            &workshop,
            attendee,
            &request.full_name,
            &request.email,
            request.priority,
            waitlist_entry.map(|entry| entry.id),
            now,
        );

        if !capacity::admit(&self.pool, &invitation.registration).await? {
            if self.registration_repo.find_active_by_email(workshop.id, &request.email).await?.is_some() {
                return Err(AppError::Conflict("Already registered for this workshop".to_string()));
            }
            return Err(AppError::CapacityExceeded(format!("Workshop {} is full", workshop.title)));
        }

        tracing::info!(
            "Registration {} admitted directly to workshop {} by {:?}",
            invitation.registration.id,
            workshop.id,
            actor
        );
        self.invitations.notify_invited(&workshop, std::slice::from_ref(&invitation)).await;

        Ok(invitation)
    }

    /// Cancels an invited or confirmed registration and frees its seat.
    ///
    /// A paid registration goes through the refund engine instead and ends
    /// up refunded; outside the refund window it cannot be cancelled.
    /// Cancelling twice is a no-op. Pre-checked and later registrations
    /// can only leave through a refund or finalization.
    pub async fn cancel_registration(&self, id: Uuid, actor: Option<Uuid>) -> Result<Registration> {
        let registration = self.get(id).await?;

        match registration.status {
            RegistrationStatus::Cancelled => return Ok(registration),
            RegistrationStatus::Confirmed if registration.amount_paid_cents > 0 => {
                return self.cancel_paid(&registration, actor).await;
            }
            RegistrationStatus::Invited | RegistrationStatus::Confirmed => {}
            other => {
                return Err(AppError::Conflict(format!(
                    "Registrations in status {} cannot be cancelled",
                    other
                )));
            }
        }

        let now = self.clock.now();
        let cancelled = registration_repository::transition(
            &self.pool,
            id,
            &[RegistrationStatus::Invited, RegistrationStatus::Confirmed],
            RegistrationStatus::Cancelled,
            now,
        )
        .await?;

        if !cancelled {
            let current = self.get(id).await?;
            if current.status == RegistrationStatus::Cancelled {
                return Ok(current);
            }
            return Err(AppError::Conflict(format!(
                "Registration moved to {} while cancelling",
                current.status
            )));
        }

        if capacity::releases_seat(registration.status, RegistrationStatus::Cancelled) {
            tracing::info!(
                "Registration {} cancelled from {} by {:?}; seat released",
                id,
                registration.status,
                actor
            );
        }
        if registration.status == RegistrationStatus::Invited {
            let intent_key = IntentKey::workshop(registration.workshop_id);
            if let Err(e) = self.sessions.retire(registration.attendee.user_id(), &intent_key).await {
                tracing::warn!("Open checkout for registration {} left for the sweep: {}", id, e);
            }
        }

        let workshop = self.load_workshop(registration.workshop_id).await?;
        let registration = self.get(id).await?;
        self.notify(NotificationTemplate::RegistrationCancelled, &registration, &workshop).await;

        Ok(registration)
    }

    async fn cancel_paid(&self, registration: &Registration, actor: Option<Uuid>) -> Result<Registration> {
        if let Err(e) = self.refunds.check_eligibility(registration.id).await {
            return Err(match e {
                AppError::NotEligible(reason) => AppError::NotEligible(format!(
                    "Paid registrations can only be cancelled through a refund: {}",
                    reason
                )),
                other => other,
            });
        }

        let request = RefundRequest {
            reason: "Cancelled by attendee".to_string(),
            amount_cents: None,
        };
        let refund = self.refunds.request_refund(registration.id, request, actor).await?;
        tracing::info!(
            "Paid registration {} cancelled through refund {} by {:?}",
            registration.id,
            refund.id,
            actor
        );

        self.get(registration.id).await
    }

    /// Applies a successful payment. Redelivery is harmless.
    pub async fn handle_payment_succeeded(&self, callback: &ProcessorCallback) -> Result<()> {
        let session = self.sessions.mark_used_by_artifact(&callback.artifact_id).await?;

        let mut registration = self.registration_repo.find_by_artifact(&callback.artifact_id).await?;
        if registration.is_none() {
            if let Some(session) = session.as_ref() {
                registration = self.find_by_session(session).await?;
            }
        }

        let Some(registration) = registration else {
            tracing::warn!("Payment {} does not match any registration", callback.artifact_id);
            return Ok(());
        };

        if registration.status == RegistrationStatus::Invited {
            let workshop = self.load_workshop(registration.workshop_id).await?;
            let expected = session
                .as_ref()
                .map(PaymentSession::total_cents)
                .unwrap_or(workshop.price_cents);
            if callback.amount_cents < expected {
                tracing::error!(
                    "Payment {} for registration {} is {} cents, {} expected; left invited for manual reconciliation",
                    callback.artifact_id,
                    registration.id,
                    callback.amount_cents,
                    expected
                );
                return Ok(());
            }

            let now = self.clock.now();
            let confirmed = registration_repository::confirm_payment(
                &self.pool,
                registration.id,
                Some(&callback.artifact_id),
                callback.amount_cents,
                now,
            )
            .await?;

            if confirmed {
                tracing::info!(
                    "Registration {} confirmed by payment {} ({} cents)",
                    registration.id,
                    callback.artifact_id,
                    callback.amount_cents
                );
                let registration = self.get(registration.id).await?;
                self.notify(NotificationTemplate::PaymentReceived, &registration, &workshop).await;
                return Ok(());
            }

            let current = self.get(registration.id).await?;
            return self.apply_settled_payment(&current, callback).await;
        }

        self.apply_settled_payment(&registration, callback).await
    }

    /// Tells the invitee the payment did not go through. The invitation stays open.
    pub async fn handle_payment_failed(&self, callback: &ProcessorCallback) -> Result<()> {
        let Some(registration) = self.registration_repo.find_by_artifact(&callback.artifact_id).await? else {
            tracing::debug!("Failed payment {} has no registration", callback.artifact_id);
            return Ok(());
        };

        if registration.status != RegistrationStatus::Invited {
            return Ok(());
        }

        tracing::info!("Payment {} failed for registration {}", callback.artifact_id, registration.id);
        let workshop = self.load_workshop(registration.workshop_id).await?;
        self.notify(NotificationTemplate::PaymentFailed, &registration, &workshop).await;
        Ok(())
    }

    /// A payment arrived for a registration that is no longer invited.
    async fn apply_settled_payment(&self, registration: &Registration, callback: &ProcessorCallback) -> Result<()> {
        match registration.status {
            RegistrationStatus::Confirmed
            | RegistrationStatus::PreChecked
            | RegistrationStatus::Attended
                if registration.payment_artifact_id.as_deref() == Some(callback.artifact_id.as_str()) =>
            {
                tracing::debug!("Payment {} already applied to {}", callback.artifact_id, registration.id);
                Ok(())
            }
            RegistrationStatus::Cancelled => {
                tracing::warn!(
                    "Late payment {} for cancelled registration {}; refunding",
                    callback.artifact_id,
                    registration.id
                );
                self.refunds
                    .refund_unclaimed_payment(registration, &callback.artifact_id, callback.amount_cents)
                    .await?;
                Ok(())
            }
            status => {
                tracing::error!(
                    "Payment {} for registration {} in status {} needs manual reconciliation",
                    callback.artifact_id,
                    registration.id,
                    status
                );
                Ok(())
            }
        }
    }

    async fn find_by_session(&self, session: &PaymentSession) -> Result<Option<Registration>> {
        let Some(workshop_id) = session.intent_key.workshop_id() else {
            return Ok(None);
        };

        for attendee in [Attendee::Member(session.user_id), Attendee::External(session.user_id)] {
            if let Some(registration) = self.registration_repo.find_for_attendee(workshop_id, &attendee).await? {
                return Ok(Some(registration));
            }
        }
        Ok(None)
    }

    async fn find_by_payment_token(&self, token: &str) -> Result<Registration> {
        self.registration_repo.find_by_payment_token(&hash_token(token)).await?
            .ok_or_else(|| AppError::NotFound("Payment link not found".to_string()))
    }

    async fn load_workshop(&self, id: Uuid) -> Result<Workshop> {
        self.workshop_repo.find_by_id(id).await?
            .ok_or_else(|| AppError::NotFound("Workshop not found".to_string()))
    }

    async fn notify(&self, template: NotificationTemplate, registration: &Registration, workshop: &Workshop) {
        let notification = Notification::new(template, &registration.email)
            .var("full_name", &registration.full_name)
            .var("workshop_title", &workshop.title)
            .var("starts_at", workshop.starts_at.to_rfc3339());
        self.notifications.send(notification).await;
    }
}
