use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    auth::tokens::{generate_token, hash_token},
    clock::{self, Clock},
    config::InvitationConfig,
    domain::*,
    error::{AppError, Result},
    notifications::{Notification, NotificationManager, NotificationTemplate},
    repository::{
        capacity, registration_repository, waitlist_repository, workshop_repository,
        WorkshopRepository,
    },
    service::waitlist_selector::{batch_size_for, select_candidates},
};

/// A freshly invited registration together with the raw payment token.
///
/// Only the token's hash is stored, so this is the one moment the token
/// can be handed to the notifier.
#[derive(Debug, Clone, Serialize)]
pub struct Invitation {
    pub registration: Registration,
    #[serde(skip_serializing)]
    pub payment_token: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct TopUpReport {
    pub workshops_checked: usize,
    pub invitations_sent: usize,
    pub failures: usize,
}

/// Builds an `invited` registration whose payment link expires one day
/// before the workshop starts.
pub(crate) fn new_invitation(
    workshop: &Workshop,
    attendee: Attendee,
    full_name: &str,
    email: &str,
    priority: i64,
    waitlist_entry_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Invitation {
    let payment_token = generate_token();
    let registration = Registration {
        id: Uuid::new_v4(),
        workshop_id: workshop.id,
        waitlist_entry_id,
        attendee,
        full_name: full_name.to_string(),
        email: email.to_string(),
        status: RegistrationStatus::Invited,
        priority,
        invited_at: now,
        payment_token_hash: Some(hash_token(&payment_token)),
        payment_token_expires_at: Some(workshop.payment_deadline()),
        payment_artifact_id: None,
        amount_paid_cents: 0,
        confirmed_at: None,
        onboarding_token_hash: None,
        onboarding_token_issued_at: None,
        onboarding_token_used_at: None,
        onboarding_completed_at: None,
        insurance_confirmed_at: None,
        media_consent_at: None,
        signature: None,
        checked_in_at: None,
        cancelled_at: None,
        follow_up_sent_at: None,
        created_at: now,
        updated_at: now,
    };

    Invitation { registration, payment_token }
}

pub struct InvitationService {
    workshop_repo: Arc<dyn WorkshopRepository>,
    notifications: Arc<NotificationManager>,
    clock: Arc<dyn Clock>,
    pool: SqlitePool,
    config: InvitationConfig,
    base_url: String,
}

impl InvitationService {
    pub fn new(
        workshop_repo: Arc<dyn WorkshopRepository>,
        notifications: Arc<NotificationManager>,
        clock: Arc<dyn Clock>,
        pool: SqlitePool,
        config: InvitationConfig,
        base_url: String,
    ) -> Self {
        Self {
            workshop_repo,
            notifications,
            clock,
            pool,
            config,
            base_url,
        }
    }

    /// Invites the next batch for `workshop` on the caller's connection.
    ///
    /// The caller must already hold the workshop lock (see
    /// `capacity::lock_workshop`) so the occupied count read here cannot go
    /// stale before the inserts land. Commits nothing itself.
    pub(crate) async fn apply_batch(
        &self,
        conn: &mut SqliteConnection,
        workshop: &Workshop,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invitation>> {
        let occupied = capacity::occupied(&mut *conn, workshop.id).await?;
        let slots = batch_size_for(workshop.batch_size, workshop.capacity, occupied);
        if slots == 0 {
            tracing::debug!("Workshop {} has no free seats ({} occupied)", workshop.id, occupied);
            return Ok(Vec::new());
        }

        let no_show_cutoff = clock::saturating_sub(now, clock::days(self.config.no_show_exclusion_days));
        let pool = waitlist_repository::eligible_candidates(
            &mut *conn,
            workshop.id,
            self.config.reinvite_cancelled,
            no_show_cutoff,
        )
        .await?;

        let selected = select_candidates(&pool, slots);
        let mut invitations = Vec::with_capacity(selected.len());

        for entry in selected {
            let invitation = new_invitation(
                workshop,
                entry.attendee,
                &entry.full_name,
                &entry.email,
                entry.priority,
                Some(entry.id),
                now,
            );
            registration_repository::insert(&mut *conn, &invitation.registration).await?;
            invitations.push(invitation);
        }

        if !invitations.is_empty() {
            workshop_repository::set_last_batch_sent_at(&mut *conn, workshop.id, now).await?;
        }

        tracing::info!(
            "Invited {} of {} eligible candidates to workshop {} ({} seats free)",
            invitations.len(),
            pool.len(),
            workshop.id,
            capacity::remaining(workshop.capacity, occupied)
        );

        Ok(invitations)
    }

    /// Sends the next batch for one workshop if its cool-off has elapsed.
    pub async fn top_up(&self, workshop_id: Uuid) -> Result<Vec<Invitation>> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        capacity::lock_workshop(&mut tx, workshop_id, now).await?;
        let workshop = workshop_repository::find_by_id(&mut *tx, workshop_id).await?
            .ok_or_else(|| AppError::NotFound("Workshop not found".to_string()))?;

        if workshop.status != WorkshopStatus::Published {
            return Ok(Vec::new());
        }
        if !workshop.cool_off_elapsed(now) {
            tracing::debug!("Workshop {} is still in its cool-off period", workshop.id);
            return Ok(Vec::new());
        }
        if now >= workshop.payment_deadline() {
            tracing::debug!("Workshop {} is too close to its start for new invitations", workshop.id);
            return Ok(Vec::new());
        }

        let invitations = self.apply_batch(&mut tx, &workshop, now).await?;
        tx.commit().await?;

        self.notify_invited(&workshop, &invitations).await;
        Ok(invitations)
    }

    /// Top-up pass over every published workshop.
    ///
    /// A failure on one workshop is logged and does not stop the others.
    pub async fn top_up_all(&self) -> Result<TopUpReport> {
        let workshops = self.workshop_repo.list_by_status(WorkshopStatus::Published).await?;
        let mut report = TopUpReport::default();

        for workshop in workshops {
            report.workshops_checked += 1;
            match self.top_up(workshop.id).await {
                Ok(invitations) => report.invitations_sent += invitations.len(),
                Err(e) => {
                    report.failures += 1;
                    tracing::error!("Top-up failed for workshop {}: {}", workshop.id, e);
                }
            }
        }

        Ok(report)
    }

    pub(crate) fn payment_link(&self, token: &str) -> String {
        format!("{}/pay/{}", self.base_url.trim_end_matches('/'), token)
    }

    pub(crate) async fn notify_invited(&self, workshop: &Workshop, invitations: &[Invitation]) {
        let notifications = invitations
            .iter()
            .map(|invitation| {
                Notification::new(NotificationTemplate::Invitation, &invitation.registration.email)
                    .var("full_name", &invitation.registration.full_name)
                    .var("workshop_title", &workshop.title)
                    .var("starts_at", workshop.starts_at.to_rfc3339())
                    .var("payment_link", self.payment_link(&invitation.payment_token))
                    .var("pay_by", workshop.payment_deadline().to_rfc3339())
            })
            .collect();

        self.notifications.send_all(notifications).await;
    }
}
