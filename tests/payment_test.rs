mod common;

use std::collections::HashMap;

use chrono::Duration;
use common::TestApp;
use uuid::Uuid;
use workshops::domain::{IntentKey, PaymentItem, RefundStatus, RegistrationStatus};
use workshops::notifications::NotificationTemplate;
use workshops::payments::{ArtifactState, CallbackOutcome, ProcessorCallback};
use workshops::service::payment_callbacks::CallbackDisposition;

fn items() -> Vec<PaymentItem> {
    vec![PaymentItem {
        description: "Intro to Welding".to_string(),
        amount_cents: 4500,
    }]
}

#[tokio::test]
async fn test_get_or_create_returns_same_artifact() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let key = IntentKey::new("workshop:demo");
    let sessions = &app.ctx.payment_sessions;

    let first = sessions.get_or_create_session(user, &key, &items(), "usd", HashMap::new()).await.unwrap();
    let second = sessions.get_or_create_session(user, &key, &items(), "usd", HashMap::new()).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.artifact_ids, second.artifact_ids);
    assert_eq!(app.processor.artifact_count(), 1);
}

#[tokio::test]
async fn test_concurrent_get_or_create_converges() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let key = IntentKey::new("workshop:demo");
    let sessions = &app.ctx.payment_sessions;

    let (items_a, items_b) = (items(), items());
    let (a, b) = tokio::join!(
        sessions.get_or_create_session(user, &key, &items_a, "usd", HashMap::new()),
        sessions.get_or_create_session(user, &key, &items_b, "usd", HashMap::new()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.artifact_ids, b.artifact_ids);
    let live = a.artifact_ids[0].as_str();
    assert_eq!(app.processor.state_of(live), Some(ArtifactState::Payable));
}

#[tokio::test]
async fn test_dead_artifact_is_replaced() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let key = IntentKey::new("workshop:demo");
    let sessions = &app.ctx.payment_sessions;

    let first = sessions.get_or_create_session(user, &key, &items(), "usd", HashMap::new()).await.unwrap();
    app.processor.set_state(&first.artifact_ids[0], ArtifactState::Cancelled);

    let second = sessions.get_or_create_session(user, &key, &items(), "usd", HashMap::new()).await.unwrap();
    assert_ne!(first.id, second.id);
    assert_ne!(first.artifact_ids, second.artifact_ids);
}

#[tokio::test]
async fn test_processing_artifact_is_not_handed_out_again() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let key = IntentKey::new("workshop:demo");
    let sessions = &app.ctx.payment_sessions;

    let first = sessions.get_or_create_session(user, &key, &items(), "usd", HashMap::new()).await.unwrap();
    app.processor.set_state(&first.artifact_ids[0], ArtifactState::Processing);

    let err = sessions
        .get_or_create_session(user, &key, &items(), "usd", HashMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
    assert_eq!(app.processor.artifact_count(), 1);
}

#[tokio::test]
async fn test_reloading_payment_page_reuses_checkout() {
    let app = TestApp::new().await;
    app.fill_waitlist(1).await;
    let workshop = app.draft(2, 2, 4500).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();
    let token = app.payment_token("person0@example.com");

    let first = app.ctx.registration_service.begin_payment(&token).await.unwrap();
    let second = app.ctx.registration_service.begin_payment(&token).await.unwrap();

    assert_eq!(first.artifact_id, second.artifact_id);
    assert_eq!(first.amount_cents, 4500);
    assert_eq!(second.registration.payment_artifact_id, first.artifact_id);
}

#[tokio::test]
async fn test_free_workshop_confirms_on_link_open() {
    let app = TestApp::new().await;
    app.fill_waitlist(1).await;
    let workshop = app.draft(2, 2, 0).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();

    let checkout = app
        .ctx
        .registration_service
        .begin_payment(&app.payment_token("person0@example.com"))
        .await
        .unwrap();

    assert_eq!(checkout.registration.status, RegistrationStatus::Confirmed);
    assert!(checkout.artifact_id.is_none());
    assert_eq!(app.processor.artifact_count(), 0);
}

#[tokio::test]
async fn test_expired_payment_link_is_rejected() {
    let app = TestApp::new().await;
    app.fill_waitlist(1).await;
    let workshop = app.draft(2, 2, 4500).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();

    app.clock.set(workshop.starts_at - Duration::hours(2));
    let err = app
        .ctx
        .registration_service
        .begin_payment(&app.payment_token("person0@example.com"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
}

#[tokio::test]
async fn test_unknown_payment_link_is_not_found() {
    let app = TestApp::new().await;
    let err = app.ctx.registration_service.begin_payment("nope").await.unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn test_redelivered_callback_is_applied_once() {
    let app = TestApp::new().await;
    app.fill_waitlist(1).await;
    let workshop = app.draft(2, 2, 4500).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();

    let checkout = app
        .ctx
        .registration_service
        .begin_payment(&app.payment_token("person0@example.com"))
        .await
        .unwrap();
    let callback = app.processor.complete_payment(checkout.artifact_id.as_deref().unwrap()).unwrap();

    let first = app.ctx.payment_callbacks.handle(&callback).await.unwrap();
    let second = app.ctx.payment_callbacks.handle(&callback).await.unwrap();

    assert_eq!(first, CallbackDisposition::Applied);
    assert_eq!(second, CallbackDisposition::Duplicate);
    assert_eq!(app.notifier.count(NotificationTemplate::PaymentReceived), 1);

    let registration = app.ctx.registration_service.get(checkout.registration.id).await.unwrap();
    assert_eq!(registration.status, RegistrationStatus::Confirmed);
    assert_eq!(registration.amount_paid_cents, 4500);
}

#[tokio::test]
async fn test_same_payment_under_new_event_id_is_harmless() {
    let app = TestApp::new().await;
    app.fill_waitlist(1).await;
    let workshop = app.draft(2, 2, 4500).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();
    let registration_id = app.pay("person0@example.com").await;
    let registration = app.ctx.registration_service.get(registration_id).await.unwrap();

    let replay = ProcessorCallback {
        event_id: "evt_replayed".to_string(),
        artifact_id: registration.payment_artifact_id.clone().unwrap(),
        outcome: CallbackOutcome::PaymentSucceeded,
        amount_cents: 4500,
    };
    let disposition = app.ctx.payment_callbacks.handle(&replay).await.unwrap();

    assert_eq!(disposition, CallbackDisposition::Applied);
    assert!(app.processor.refunds_issued().is_empty());
    let after = app.ctx.registration_service.get(registration_id).await.unwrap();
    assert_eq!(after.status, RegistrationStatus::Confirmed);
}

#[tokio::test]
async fn test_webhook_payload_is_parsed_and_applied() {
    let app = TestApp::new().await;
    app.fill_waitlist(1).await;
    let workshop = app.draft(2, 2, 4500).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();
    let checkout = app
        .ctx
        .registration_service
        .begin_payment(&app.payment_token("person0@example.com"))
        .await
        .unwrap();
    let callback = app.processor.complete_payment(checkout.artifact_id.as_deref().unwrap()).unwrap();
    let payload = serde_json::to_string(&callback).unwrap();

    let signature = app.processor.sign(&payload).unwrap();
    let disposition = app.ctx.payment_callbacks.handle_webhook(&payload, &signature).await.unwrap();
    assert_eq!(disposition, CallbackDisposition::Applied);

    let garbage = "not json";
    let err = app
        .ctx
        .payment_callbacks
        .handle_webhook(garbage, &app.processor.sign(garbage).unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "bad_request");
}

#[tokio::test]
async fn test_unsigned_or_tampered_webhook_changes_nothing() {
    let app = TestApp::new().await;
    app.fill_waitlist(1).await;
    let workshop = app.draft(2, 2, 4500).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();
    let checkout = app
        .ctx
        .registration_service
        .begin_payment(&app.payment_token("person0@example.com"))
        .await
        .unwrap();
    let callback = app.processor.complete_payment(checkout.artifact_id.as_deref().unwrap()).unwrap();
    let payload = serde_json::to_string(&callback).unwrap();
    let signature = app.processor.sign(&payload).unwrap();

    let err = app.ctx.payment_callbacks.handle_webhook(&payload, "unsigned").await.unwrap_err();
    assert_eq!(err.kind(), "unauthorized");

    let tampered = payload.replace("4500", "9999");
    let err = app.ctx.payment_callbacks.handle_webhook(&tampered, &signature).await.unwrap_err();
    assert_eq!(err.kind(), "unauthorized");

    let registration = app.ctx.registration_service.get(checkout.registration.id).await.unwrap();
    assert_eq!(registration.status, RegistrationStatus::Invited);
}

#[tokio::test]
async fn test_underpaid_callback_leaves_invitation_for_reconciliation() {
    let app = TestApp::new().await;
    app.fill_waitlist(1).await;
    let workshop = app.draft(2, 2, 4500).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();
    let checkout = app
        .ctx
        .registration_service
        .begin_payment(&app.payment_token("person0@example.com"))
        .await
        .unwrap();

    let underpaid = ProcessorCallback {
        event_id: "evt_underpaid".to_string(),
        artifact_id: checkout.artifact_id.clone().unwrap(),
        outcome: CallbackOutcome::PaymentSucceeded,
        amount_cents: 1,
    };
    app.ctx.payment_callbacks.handle(&underpaid).await.unwrap();

    let registration = app.ctx.registration_service.get(checkout.registration.id).await.unwrap();
    assert_eq!(registration.status, RegistrationStatus::Invited);
    assert_eq!(registration.amount_paid_cents, 0);
    assert_eq!(app.notifier.count(NotificationTemplate::PaymentReceived), 0);
}

#[tokio::test]
async fn test_failed_payment_keeps_invitation_open() {
    let app = TestApp::new().await;
    app.fill_waitlist(1).await;
    let workshop = app.draft(2, 2, 4500).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();
    let checkout = app
        .ctx
        .registration_service
        .begin_payment(&app.payment_token("person0@example.com"))
        .await
        .unwrap();

    let failure = ProcessorCallback {
        event_id: "evt_failed".to_string(),
        artifact_id: checkout.artifact_id.clone().unwrap(),
        outcome: CallbackOutcome::PaymentFailed,
        amount_cents: 4500,
    };
    app.ctx.payment_callbacks.handle(&failure).await.unwrap();

    let registration = app.ctx.registration_service.get(checkout.registration.id).await.unwrap();
    assert_eq!(registration.status, RegistrationStatus::Invited);
    assert_eq!(app.notifier.count(NotificationTemplate::PaymentFailed), 1);
}

#[tokio::test]
async fn test_late_payment_on_cancelled_registration_is_refunded() {
    let app = TestApp::new().await;
    app.fill_waitlist(1).await;
    let workshop = app.draft(2, 2, 4500).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();
    let checkout = app
        .ctx
        .registration_service
        .begin_payment(&app.payment_token("person0@example.com"))
        .await
        .unwrap();
    let artifact = checkout.artifact_id.clone().unwrap();

    let cancelled = app
        .ctx
        .registration_service
        .cancel_registration(checkout.registration.id, None)
        .await
        .unwrap();
    assert_eq!(cancelled.status, RegistrationStatus::Cancelled);

    // The customer had already submitted; the money lands anyway
    let callback = app.processor.complete_payment(&artifact).unwrap();
    app.ctx.payment_callbacks.handle(&callback).await.unwrap();

    let registration = app.ctx.registration_service.get(checkout.registration.id).await.unwrap();
    assert_eq!(registration.status, RegistrationStatus::Cancelled);
    assert_eq!(app.processor.refunds_issued(), vec![(artifact, 4500)]);

    let refunds = app.ctx.refund_service.list_by_status(RefundStatus::Processing).await.unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].registration_id, registration.id);
}

#[tokio::test]
async fn test_cancelling_twice_is_a_noop() {
    let app = TestApp::new().await;
    app.fill_waitlist(1).await;
    let workshop = app.draft(2, 2, 4500).await;
    let outcome = app.ctx.workshop_service.publish(workshop.id).await.unwrap();
    let id = outcome.invitations[0].registration.id;

    let first = app.ctx.registration_service.cancel_registration(id, None).await.unwrap();
    let second = app.ctx.registration_service.cancel_registration(id, None).await.unwrap();

    assert_eq!(first.status, RegistrationStatus::Cancelled);
    assert_eq!(second.status, RegistrationStatus::Cancelled);
    assert_eq!(app.notifier.count(NotificationTemplate::RegistrationCancelled), 1);
}

#[tokio::test]
async fn test_sweep_cancels_expired_checkouts() {
    let app = TestApp::new().await;
    app.fill_waitlist(1).await;
    let workshop = app.draft(2, 2, 4500).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();
    let checkout = app
        .ctx
        .registration_service
        .begin_payment(&app.payment_token("person0@example.com"))
        .await
        .unwrap();
    let artifact = checkout.artifact_id.unwrap();

    let early = app.ctx.payment_sessions.sweep_expired().await.unwrap();
    assert_eq!(early.retired, 0);

    app.clock.advance(Duration::hours(25));
    app.processor.set_fail_cancellations(true);
    let failed = app.ctx.payment_sessions.sweep_expired().await.unwrap();
    assert_eq!((failed.retired, failed.failures), (0, 1));

    app.processor.set_fail_cancellations(false);
    let swept = app.ctx.payment_sessions.sweep_expired().await.unwrap();
    assert_eq!((swept.retired, swept.failures), (1, 0));
    assert_eq!(app.processor.state_of(&artifact), Some(ArtifactState::Cancelled));

    let again = app.ctx.payment_sessions.sweep_expired().await.unwrap();
    assert_eq!(again.retired, 0);
}

#[tokio::test]
async fn test_stuck_sessions_do_not_starve_the_sweep() {
    let app = TestApp::new().await;
    let key = IntentKey::new("workshop:demo");
    let sessions = &app.ctx.payment_sessions;

    for _ in 0..100 {
        let stuck = sessions
            .get_or_create_session(Uuid::new_v4(), &key, &items(), "usd", HashMap::new())
            .await
            .unwrap();
        app.processor.fail_cancellation_of(stuck.primary_artifact().unwrap());
    }
    app.clock.advance(Duration::hours(1));
    let fresh = sessions
        .get_or_create_session(Uuid::new_v4(), &key, &items(), "usd", HashMap::new())
        .await
        .unwrap();
    let fresh_artifact = fresh.primary_artifact().unwrap().to_string();

    app.clock.advance(Duration::hours(25));
    let first = sessions.sweep_expired().await.unwrap();
    assert_eq!((first.retired, first.failures), (0, 100));

    let second = sessions.sweep_expired().await.unwrap();
    assert_eq!(second.retired, 1);
    assert_eq!(app.processor.state_of(&fresh_artifact), Some(ArtifactState::Cancelled));
}

#[tokio::test]
async fn test_sweep_retires_sessions_the_processor_forgot() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let key = IntentKey::new("workshop:demo");
    let sessions = &app.ctx.payment_sessions;

    let session = sessions.get_or_create_session(user, &key, &items(), "usd", HashMap::new()).await.unwrap();
    app.processor.forget(session.primary_artifact().unwrap());

    let replaced = sessions.get_or_create_session(user, &key, &items(), "usd", HashMap::new()).await.unwrap();
    assert_ne!(replaced.id, session.id);

    app.processor.forget(replaced.primary_artifact().unwrap());
    app.clock.advance(Duration::hours(25));
    let swept = sessions.sweep_expired().await.unwrap();
    assert_eq!((swept.retired, swept.failures), (1, 0));
}
