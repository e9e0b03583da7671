mod common;

use chrono::Duration;
use common::TestApp;
use workshops::domain::{OnboardingSubmission, RegistrationStatus, Workshop, WorkshopStatus};
use workshops::notifications::NotificationTemplate;

fn form() -> OnboardingSubmission {
    OnboardingSubmission {
        insurance_confirmed: true,
        media_consent: true,
        signature: Some("A. Person".to_string()),
    }
}

/// Free workshop with `confirmed` attendees, clock moved to one day before the start.
async fn confirmed_attendees(confirmed: usize, waiting: usize) -> (TestApp, Workshop) {
    let app = TestApp::new().await;
    app.fill_waitlist(confirmed + waiting).await;
    let workshop = app.draft(confirmed as i64, confirmed as i64, 0).await;
    let workshop = app.ctx.workshop_service.publish(workshop.id).await.unwrap().workshop;

    for i in 0..confirmed {
        app.ctx
            .registration_service
            .begin_payment(&app.payment_token(&format!("person{}@example.com", i)))
            .await
            .unwrap();
    }

    app.clock.set(workshop.starts_at - Duration::days(1));
    (app, workshop)
}

#[tokio::test]
async fn test_tokens_issued_once_within_lead_time() -> anyhow::Result<()> {
    let app = TestApp::new().await;
    app.fill_waitlist(1).await;
    let workshop = app.draft(1, 1, 0).await;
    let workshop = app.ctx.workshop_service.publish(workshop.id).await?.workshop;
    app.ctx
        .registration_service
        .begin_payment(&app.payment_token("person0@example.com"))
        .await?;

    // Too early
    let report = app.ctx.onboarding_service.issue_tokens().await?;
    assert_eq!(report.issued, 0);

    app.clock.set(workshop.starts_at - Duration::days(1));
    let first = app.ctx.onboarding_service.issue_tokens().await?;
    let second = app.ctx.onboarding_service.issue_tokens().await?;

    assert_eq!(first.issued, 1);
    assert_eq!(second.issued, 0);
    assert_eq!(app.notifier.count(NotificationTemplate::OnboardingInvite), 1);

    Ok(())
}

#[tokio::test]
async fn test_onboarding_token_works_once() -> anyhow::Result<()> {
    let (app, _) = confirmed_attendees(1, 0).await;
    app.ctx.onboarding_service.issue_tokens().await?;
    let token = app.onboarding_token("person0@example.com");

    let registration = app.ctx.onboarding_service.submit(&token, form()).await?;
    assert_eq!(registration.status, RegistrationStatus::PreChecked);
    assert!(registration.insurance_confirmed_at.is_some());
    assert!(registration.media_consent_at.is_some());

    let err = app.ctx.onboarding_service.submit(&token, form()).await.unwrap_err();
    assert_eq!(err.kind(), "conflict");

    Ok(())
}

#[tokio::test]
async fn test_onboarding_token_expires_at_start() -> anyhow::Result<()> {
    let (app, workshop) = confirmed_attendees(1, 0).await;
    app.ctx.onboarding_service.issue_tokens().await?;
    let token = app.onboarding_token("person0@example.com");

    app.clock.set(workshop.starts_at + Duration::minutes(1));
    let err = app.ctx.onboarding_service.submit(&token, form()).await.unwrap_err();
    assert_eq!(err.kind(), "conflict");

    Ok(())
}

#[tokio::test]
async fn test_onboarding_requires_insurance() -> anyhow::Result<()> {
    let (app, _) = confirmed_attendees(1, 0).await;
    app.ctx.onboarding_service.issue_tokens().await?;
    let token = app.onboarding_token("person0@example.com");

    let err = app
        .ctx
        .onboarding_service
        .submit(&token, OnboardingSubmission::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    // The token is still good after a rejected submission
    app.ctx.onboarding_service.submit(&token, form()).await?;

    Ok(())
}

#[tokio::test]
async fn test_check_in_window() -> anyhow::Result<()> {
    let (app, workshop) = confirmed_attendees(1, 0).await;

    let err = app.ctx.onboarding_service.roster(workshop.id).await.unwrap_err();
    assert_eq!(err.kind(), "not_eligible");

    app.clock.set(workshop.starts_at - Duration::hours(1));
    let roster = app.ctx.onboarding_service.roster(workshop.id).await?;
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].email_hint, "p***@example.com");
    assert!(roster[0].needs_onboarding);

    Ok(())
}

#[tokio::test]
async fn test_check_in_routes_missing_onboarding_through_backup() -> anyhow::Result<()> {
    let (app, workshop) = confirmed_attendees(1, 0).await;
    app.clock.set(workshop.starts_at);
    let registration_id = app.ctx.onboarding_service.roster(workshop.id).await?[0].registration_id;

    let err = app
        .ctx
        .onboarding_service
        .check_in(workshop.id, registration_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "onboarding_required");

    let attended = app
        .ctx
        .onboarding_service
        .check_in(workshop.id, registration_id, Some(form()))
        .await?;
    assert_eq!(attended.status, RegistrationStatus::Attended);
    assert!(attended.checked_in_at.is_some());
    assert!(attended.insurance_confirmed_at.is_some());

    // Second check-in is a no-op
    let again = app
        .ctx
        .onboarding_service
        .check_in(workshop.id, registration_id, None)
        .await?;
    assert_eq!(again.status, RegistrationStatus::Attended);
    assert_eq!(app.notifier.count(NotificationTemplate::CheckedIn), 1);

    // Attending takes the person off the waitlist
    assert!(app.ctx.waitlist_service.list().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_pre_checked_attendee_checks_in_directly() -> anyhow::Result<()> {
    let (app, workshop) = confirmed_attendees(1, 0).await;
    app.ctx.onboarding_service.issue_tokens().await?;
    let token = app.onboarding_token("person0@example.com");
    let registration = app.ctx.onboarding_service.submit(&token, form()).await?;

    app.clock.set(workshop.starts_at + Duration::minutes(15));
    let attended = app
        .ctx
        .onboarding_service
        .check_in(workshop.id, registration.id, None)
        .await?;
    assert_eq!(attended.status, RegistrationStatus::Attended);

    Ok(())
}

#[tokio::test]
async fn test_invited_attendee_cannot_check_in() -> anyhow::Result<()> {
    let app = TestApp::new().await;
    app.fill_waitlist(1).await;
    let workshop = app.draft(1, 1, 4500).await;
    let outcome = app.ctx.workshop_service.publish(workshop.id).await?;
    app.clock.set(outcome.workshop.starts_at);

    let err = app
        .ctx
        .onboarding_service
        .check_in(workshop.id, outcome.invitations[0].registration.id, Some(form()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");

    Ok(())
}

#[tokio::test]
async fn test_finish_marks_no_shows_and_lapses_invitations() -> anyhow::Result<()> {
    let app = TestApp::new().await;
    app.fill_waitlist(3).await;
    let workshop = app.draft(3, 3, 0).await;
    let workshop = app.ctx.workshop_service.publish(workshop.id).await?.workshop;
    for email in ["person0@example.com", "person1@example.com"] {
        app.ctx
            .registration_service
            .begin_payment(&app.payment_token(email))
            .await?;
    }

    app.clock.set(workshop.starts_at);
    let registrations = app.ctx.registration_service.list_for_workshop(workshop.id).await?;
    let present = registrations.iter().find(|r| r.email == "person0@example.com").unwrap();
    app.ctx
        .onboarding_service
        .check_in(workshop.id, present.id, Some(form()))
        .await?;

    let err = app.ctx.workshop_service.finish(workshop.id, false).await.unwrap_err();
    assert_eq!(err.kind(), "not_eligible");

    app.clock.set(workshop.ends_at + Duration::minutes(30));
    let report = app.ctx.workshop_service.finalize_attendance().await?;
    assert_eq!((report.finished, report.no_shows, report.failures), (1, 1, 0));

    let workshop = app.ctx.workshop_service.get(workshop.id).await?;
    assert_eq!(workshop.status, WorkshopStatus::Finished);

    let by_email = |email: &str, registrations: &[workshops::domain::Registration]| {
        registrations.iter().find(|r| r.email == email).map(|r| r.status)
    };
    let registrations = app.ctx.registration_service.list_for_workshop(workshop.id).await?;
    assert_eq!(by_email("person0@example.com", &registrations), Some(RegistrationStatus::Attended));
    assert_eq!(by_email("person1@example.com", &registrations), Some(RegistrationStatus::NoShow));
    assert_eq!(by_email("person2@example.com", &registrations), Some(RegistrationStatus::Cancelled));

    // Running the job again finds nothing to do
    let again = app.ctx.workshop_service.finalize_attendance().await?;
    assert_eq!(again.finished, 0);

    Ok(())
}

#[tokio::test]
async fn test_follow_ups_sent_once() -> anyhow::Result<()> {
    let (app, workshop) = confirmed_attendees(2, 0).await;
    app.clock.set(workshop.starts_at);
    let roster = app.ctx.onboarding_service.roster(workshop.id).await?;
    app.ctx
        .onboarding_service
        .check_in(workshop.id, roster[0].registration_id, Some(form()))
        .await?;

    app.ctx.workshop_service.finish(workshop.id, true).await?;

    let first = app.ctx.onboarding_service.send_follow_ups().await?;
    let second = app.ctx.onboarding_service.send_follow_ups().await?;

    assert_eq!(first.sent, 2);
    assert_eq!(second.sent, 0);
    assert_eq!(app.notifier.count(NotificationTemplate::FollowUpAttended), 1);
    assert_eq!(app.notifier.count(NotificationTemplate::FollowUpNoShow), 1);

    Ok(())
}
