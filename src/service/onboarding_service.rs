use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    auth::tokens::{generate_token, hash_token},
    clock::{self, Clock},
    config::WorkshopConfig,
    domain::*,
    error::{AppError, Result},
    notifications::{Notification, NotificationManager, NotificationTemplate},
    repository::{
        registration_repository, waitlist_repository, RegistrationRepository, WorkshopRepository,
    },
};

/// One line of the check-in roster. Emails are masked because the roster is
/// shown on a shared device at the door.
#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry {
    pub registration_id: Uuid,
    pub full_name: String,
    pub email_hint: String,
    pub status: RegistrationStatus,
    pub needs_onboarding: bool,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct IssueReport {
    pub issued: usize,
    pub failures: usize,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct FollowUpReport {
    pub sent: usize,
    pub failures: usize,
}

/// `jane.doe@example.com` -> `j***@example.com`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}

pub struct OnboardingService {
    registration_repo: Arc<dyn RegistrationRepository>,
    workshop_repo: Arc<dyn WorkshopRepository>,
    notifications: Arc<NotificationManager>,
    clock: Arc<dyn Clock>,
    pool: SqlitePool,
    config: WorkshopConfig,
    base_url: String,
}

impl OnboardingService {
    pub fn new(
        registration_repo: Arc<dyn RegistrationRepository>,
        workshop_repo: Arc<dyn WorkshopRepository>,
        notifications: Arc<NotificationManager>,
        clock: Arc<dyn Clock>,
        pool: SqlitePool,
        config: WorkshopConfig,
        base_url: String,
    ) -> Self {
        Self {
            registration_repo,
            workshop_repo,
            notifications,
            clock,
            pool,
            config,
            base_url,
        }
    }

    /// Sends onboarding links to confirmed attendees of workshops starting
    /// within the lead time. Each registration gets at most one token.
    pub async fn issue_tokens(&self) -> Result<IssueReport> {
        let now = self.clock.now();
        let lead = clock::days(self.config.onboarding_lead_days);
        let mut report = IssueReport::default();

        for workshop in self.workshop_repo.list_by_status(WorkshopStatus::Published).await? {
            if now >= workshop.starts_at || now < clock::saturating_sub(workshop.starts_at, lead) {
                continue;
            }

            let confirmed = self
                .registration_repo
                .list_by_workshop_and_status(workshop.id, &[RegistrationStatus::Confirmed])
                .await?;

            for registration in confirmed {
                if registration.onboarding_token_hash.is_some() {
                    continue;
                }
                match self.issue_token(&registration, &workshop, now).await {
                    Ok(true) => report.issued += 1,
                    Ok(false) => {}
                    Err(e) => {
                        report.failures += 1;
                        tracing::error!("Could not issue onboarding token for {}: {}", registration.id, e);
                    }
                }
            }
        }

        if report.issued > 0 {
            tracing::info!("Issued {} onboarding tokens", report.issued);
        }
        Ok(report)
    }

    async fn issue_token(&self, registration: &Registration, workshop: &Workshop, now: DateTime<Utc>) -> Result<bool> {
        let token = generate_token();
        if !registration_repository::issue_onboarding_token(&self.pool, registration.id, &hash_token(&token), now).await? {
            return Ok(false);
        }

        let notification = Notification::new(NotificationTemplate::OnboardingInvite, &registration.email)
            .var("full_name", &registration.full_name)
            .var("workshop_title", &workshop.title)
            .var("starts_at", workshop.starts_at.to_rfc3339())
            .var("onboarding_link", format!("{}/onboarding/{}", self.base_url.trim_end_matches('/'), token));
        self.notifications.send(notification).await;

        Ok(true)
    }

    /// Records the onboarding form. The token works once and only until the
    /// workshop starts.
    pub async fn submit(&self, token: &str, submission: OnboardingSubmission) -> Result<Registration> {
        if !submission.insurance_confirmed {
            return Err(AppError::Validation("Insurance confirmation is required".to_string()));
        }

        let registration = self.registration_repo.find_by_onboarding_token(&hash_token(token)).await?
            .ok_or_else(|| AppError::NotFound("Onboarding link not found".to_string()))?;

        if registration.onboarding_token_used_at.is_some() {
            return Err(AppError::Conflict("This onboarding link has already been used".to_string()));
        }

        let workshop = self.load_workshop(registration.workshop_id).await?;
        let now = self.clock.now();
        if now >= workshop.starts_at {
            return Err(AppError::Conflict("This onboarding link has expired".to_string()));
        }
        if registration.status != RegistrationStatus::Confirmed {
            return Err(AppError::Conflict(format!(
                "Registration is {} and cannot be onboarded",
                registration.status
            )));
        }

        if !registration_repository::complete_onboarding(&self.pool, registration.id, &submission, now).await? {
            return Err(AppError::Conflict("This onboarding link has already been used".to_string()));
        }

        tracing::info!("Registration {} completed onboarding", registration.id);
        self.get(registration.id).await
    }

    /// Everyone who may check in, for self-identification at the door.
    pub async fn roster(&self, workshop_id: Uuid) -> Result<Vec<RosterEntry>> {
        let workshop = self.load_workshop(workshop_id).await?;
        self.ensure_check_in_open(&workshop)?;

        let registrations = self
            .registration_repo
            .list_by_workshop_and_status(
                workshop_id,
                &[
                    RegistrationStatus::Confirmed,
                    RegistrationStatus::PreChecked,
                    RegistrationStatus::Attended,
                ],
            )
            .await?;

        let mut roster: Vec<RosterEntry> = registrations
            .into_iter()
            .map(|r| RosterEntry {
                registration_id: r.id,
                needs_onboarding: r.needs_onboarding(),
                email_hint: mask_email(&r.email),
                full_name: r.full_name,
                status: r.status,
            })
            .collect();
        roster.sort_by(|a, b| a.full_name.to_lowercase().cmp(&b.full_name.to_lowercase()));

        Ok(roster)
    }

    /// Marks an attendee present.
    ///
    /// A confirmed attendee who skipped onboarding must send the form along
    /// (`backup`), otherwise `OnboardingRequired` is returned. Checking in
    /// twice returns the registration unchanged.
    pub async fn check_in(
        &self,
        workshop_id: Uuid,
        registration_id: Uuid,
        backup: Option<OnboardingSubmission>,
    ) -> Result<Registration> {
        let workshop = self.load_workshop(workshop_id).await?;
        self.ensure_check_in_open(&workshop)?;

        let registration = self.get(registration_id).await?;
        if registration.workshop_id != workshop_id {
            return Err(AppError::NotFound("Registration not found for this workshop".to_string()));
        }

        match registration.status {
            RegistrationStatus::Attended => return Ok(registration),
            RegistrationStatus::Confirmed | RegistrationStatus::PreChecked => {}
            other => {
                return Err(AppError::Conflict(format!("Registration is {} and cannot check in", other)));
            }
        }

        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        if registration.status == RegistrationStatus::Confirmed && registration.needs_onboarding() {
            let submission = backup.ok_or(AppError::OnboardingRequired(registration.id))?;
            if !submission.insurance_confirmed {
                return Err(AppError::Validation("Insurance confirmation is required".to_string()));
            }
            if !registration_repository::complete_onboarding(&mut *tx, registration.id, &submission, now).await? {
                return Err(AppError::Conflict("Registration changed during check-in".to_string()));
            }
            tracing::info!("Registration {} completed onboarding at the door", registration.id);
        }

        let checked_in = registration_repository::transition(
            &mut *tx,
            registration.id,
            &[RegistrationStatus::Confirmed, RegistrationStatus::PreChecked],
            RegistrationStatus::Attended,
            now,
        )
        .await?;
        if !checked_in {
            drop(tx);
            let current = self.get(registration.id).await?;
            if current.status == RegistrationStatus::Attended {
                return Ok(current);
            }
            return Err(AppError::Conflict(format!("Registration moved to {} during check-in", current.status)));
        }

        waitlist_repository::fulfil_for_attendee(&mut *tx, &registration.attendee, now).await?;
        tx.commit().await?;

        tracing::info!("Registration {} checked in to workshop {}", registration.id, workshop_id);

        let registration = self.get(registration.id).await?;
        let notification = Notification::new(NotificationTemplate::CheckedIn, &registration.email)
            .var("full_name", &registration.full_name)
            .var("workshop_title", &workshop.title);
        self.notifications.send(notification).await;

        Ok(registration)
    }

    /// Thanks attendees and nudges no-shows of recently finished workshops.
    /// Each registration is followed up at most once.
    pub async fn send_follow_ups(&self) -> Result<FollowUpReport> {
        let now = self.clock.now();
        let window_start = clock::saturating_sub(now, clock::days(self.config.follow_up_window_days));
        let mut report = FollowUpReport::default();

        for workshop in self.workshop_repo.list_by_status(WorkshopStatus::Finished).await? {
            let recent = workshop.finished_at.map(|at| at >= window_start).unwrap_or(false);
            if !recent {
                continue;
            }

            let registrations = self
                .registration_repo
                .list_by_workshop_and_status(
                    workshop.id,
                    &[RegistrationStatus::Attended, RegistrationStatus::NoShow],
                )
                .await?;

            for registration in registrations {
                if registration.follow_up_sent_at.is_some() {
                    continue;
                }
                match registration_repository::mark_follow_up_sent(&self.pool, registration.id, now).await {
                    Ok(true) => {
                        let template = if registration.status == RegistrationStatus::Attended {
                            NotificationTemplate::FollowUpAttended
                        } else {
                            NotificationTemplate::FollowUpNoShow
                        };
                        let notification = Notification::new(template, &registration.email)
                            .var("full_name", &registration.full_name)
                            .var("workshop_title", &workshop.title);
                        self.notifications.send(notification).await;
                        report.sent += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        report.failures += 1;
                        tracing::error!("Could not record follow-up for {}: {}", registration.id, e);
                    }
                }
            }
        }

        Ok(report)
    }

    fn ensure_check_in_open(&self, workshop: &Workshop) -> Result<()> {
        let now = self.clock.now();
        let opens = clock::saturating_sub(workshop.starts_at, clock::hours(self.config.checkin_window_hours));

        if workshop.status != WorkshopStatus::Published {
            return Err(AppError::NotEligible(format!("Workshop is {}", workshop.status)));
        }
        if now < opens || now > workshop.ends_at {
            return Err(AppError::NotEligible("Check-in is not open".to_string()));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Registration> {
        self.registration_repo.find_by_id(id).await?
            .ok_or_else(|| AppError::NotFound("Registration not found".to_string()))
    }

    async fn load_workshop(&self, id: Uuid) -> Result<Workshop> {
        self.workshop_repo.find_by_id(id).await?
            .ok_or_else(|| AppError::NotFound("Workshop not found".to_string()))
    }
}
