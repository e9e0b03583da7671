mod common;

use std::sync::Arc;

use chrono::Duration;
use common::TestApp;
use proptest::prelude::*;
use tokio::task::JoinSet;
use workshops::domain::DirectRegistrationRequest;
use workshops::service::ServiceContext;

fn walk_in(i: usize) -> DirectRegistrationRequest {
    DirectRegistrationRequest {
        member_id: None,
        full_name: format!("Walk-in {}", i),
        email: format!("walkin{}@example.com", i),
        priority: 0,
    }
}

/// Fires `attempts` direct admissions at once and returns how many got in.
async fn admit_concurrently(ctx: Arc<ServiceContext>, workshop_id: uuid::Uuid, attempts: usize) -> (usize, usize) {
    let mut set = JoinSet::new();
    for i in 0..attempts {
        let ctx = ctx.clone();
        set.spawn(async move {
            ctx.registration_service
                .register_direct(workshop_id, walk_in(i), None)
                .await
        });
    }

    let (mut admitted, mut full) = (0, 0);
    while let Some(result) = set.join_next().await {
        match result.expect("task panicked") {
            Ok(_) => admitted += 1,
            Err(e) if e.kind() == "capacity_exceeded" => full += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    (admitted, full)
}

fn same_walk_in(email: &str) -> DirectRegistrationRequest {
    DirectRegistrationRequest {
        member_id: None,
        full_name: "Sam".to_string(),
        email: email.to_string(),
        priority: 0,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admissions_stop_at_capacity() {
    let app = TestApp::on_disk().await;
    app.fill_waitlist(1).await;
    let workshop = app.draft(3, 3, 4500).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();
    assert_eq!(app.ctx.workshop_service.occupancy(workshop.id).await.unwrap(), (1, 2));

    let (admitted, full) = admit_concurrently(app.ctx.clone(), workshop.id, 10).await;

    assert_eq!(admitted, 2);
    assert_eq!(full, 8);
    assert_eq!(app.ctx.workshop_service.occupancy(workshop.id).await.unwrap(), (3, 0));
}

#[tokio::test]
async fn test_direct_registration_requires_published_workshop() {
    let app = TestApp::new().await;
    let workshop = app.draft(3, 3, 0).await;

    let err = app
        .ctx
        .registration_service
        .register_direct(workshop.id, walk_in(0), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_eligible");
}

#[tokio::test]
async fn test_direct_registration_reuses_waitlist_identity() {
    let app = TestApp::new().await;
    let workshop = app.draft(2, 1, 0).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();

    let again = app.join_waitlist("Dana", "dana@example.com", 0).await;
    let invitation = app
        .ctx
        .registration_service
        .register_direct(
            workshop.id,
            DirectRegistrationRequest {
                member_id: None,
                full_name: "Dana".to_string(),
                email: "DANA@example.com".to_string(),
                priority: 0,
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(invitation.registration.attendee, again.attendee);
    assert_eq!(invitation.registration.waitlist_entry_id, Some(again.id));

    let err = app
        .ctx
        .registration_service
        .register_direct(
            workshop.id,
            DirectRegistrationRequest {
                member_id: None,
                full_name: "Dana".to_string(),
                email: "dana@example.com".to_string(),
                priority: 0,
            },
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
}

#[tokio::test]
async fn test_walk_in_cannot_take_two_seats_with_one_email() {
    let app = TestApp::new().await;
    let workshop = app.draft(5, 1, 0).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();

    let first = app
        .ctx
        .registration_service
        .register_direct(workshop.id, same_walk_in("sam@example.com"), None)
        .await
        .unwrap();

    let err = app
        .ctx
        .registration_service
        .register_direct(workshop.id, same_walk_in(" Sam@Example.com "), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
    assert_eq!(app.ctx.workshop_service.occupancy(workshop.id).await.unwrap(), (1, 4));

    // Cancelling frees the address for a fresh admission under the same identity
    app.ctx.registration_service.cancel_registration(first.registration.id, None).await.unwrap();
    let again = app
        .ctx
        .registration_service
        .register_direct(workshop.id, same_walk_in("sam@example.com"), None)
        .await
        .unwrap();
    assert_eq!(again.registration.attendee, first.registration.attendee);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_walk_ins_with_one_email_get_one_seat() {
    let app = TestApp::on_disk().await;
    let workshop = app.draft(5, 1, 0).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();

    let mut set = JoinSet::new();
    for _ in 0..6 {
        let ctx = app.ctx.clone();
        let workshop_id = workshop.id;
        set.spawn(async move {
            ctx.registration_service
                .register_direct(workshop_id, same_walk_in("sam@example.com"), None)
                .await
        });
    }

    let (mut admitted, mut conflicts) = (0, 0);
    while let Some(result) = set.join_next().await {
        match result.expect("task panicked") {
            Ok(_) => admitted += 1,
            Err(e) if e.kind() == "conflict" => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!((admitted, conflicts), (1, 5));
    assert_eq!(app.ctx.workshop_service.occupancy(workshop.id).await.unwrap(), (1, 4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_top_ups_send_one_batch() {
    let app = TestApp::on_disk().await;
    app.fill_waitlist(6).await;
    let workshop = app.draft(4, 2, 0).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();
    assert_eq!(app.ctx.workshop_service.occupancy(workshop.id).await.unwrap(), (2, 2));

    app.clock.advance(Duration::days(5));
    let invitations = &app.ctx.invitation_service;
    let (a, b) = tokio::join!(invitations.top_up(workshop.id), invitations.top_up(workshop.id));
    let (a, b) = (a.unwrap(), b.unwrap());

    let mut sizes = [a.len(), b.len()];
    sizes.sort();
    assert_eq!(sizes, [0, 2]);
    assert_eq!(app.ctx.workshop_service.occupancy(workshop.id).await.unwrap(), (4, 0));
}

#[tokio::test]
async fn test_raise_capacity_opens_seats_for_top_up() {
    let app = TestApp::new().await;
    app.fill_waitlist(4).await;
    let workshop = app.draft(2, 2, 0).await;
    app.ctx.workshop_service.publish(workshop.id).await.unwrap();

    let err = app.ctx.workshop_service.raise_capacity(workshop.id, 1, None).await.unwrap_err();
    assert_eq!(err.kind(), "validation");

    let raised = app.ctx.workshop_service.raise_capacity(workshop.id, 4, None).await.unwrap();
    assert_eq!(raised.capacity, 4);

    app.clock.advance(Duration::days(5));
    let invited = app.ctx.invitation_service.top_up(workshop.id).await.unwrap();
    assert_eq!(invited.len(), 2);
    assert_eq!(app.ctx.workshop_service.occupancy(workshop.id).await.unwrap(), (4, 0));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_occupied_never_exceeds_capacity(capacity in 1i64..5, queued in 0usize..4, attempts in 1usize..10) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let app = TestApp::on_disk().await;
            app.fill_waitlist(queued).await;
            let workshop = app.draft(capacity, capacity, 0).await;
            app.ctx.workshop_service.publish(workshop.id).await.unwrap();

            let (_, seats_left) = app.ctx.workshop_service.occupancy(workshop.id).await.unwrap();
            let (admitted, _) = admit_concurrently(app.ctx.clone(), workshop.id, attempts).await;
            let (occupied, _) = app.ctx.workshop_service.occupancy(workshop.id).await.unwrap();

            assert!(occupied <= capacity);
            assert_eq!(admitted as i64, seats_left.min(attempts as i64));
        });
    }
}
