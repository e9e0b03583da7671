#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tempfile::TempDir;
use uuid::Uuid;

use workshops::{
    clock::FixedClock,
    config::Settings,
    domain::{CreateWorkshopRequest, JoinWaitlistRequest, WaitlistEntry, Workshop},
    error::Result,
    notifications::{Notification, NotificationManager, NotificationTemplate, Notifier},
    payments::InMemoryProcessor,
    service::ServiceContext,
};

/// Captures every notification instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn count(&self, template: NotificationTemplate) -> usize {
        self.sent().iter().filter(|n| n.template == template).count()
    }

    /// The raw token at the end of the last link of `template` sent to `recipient`.
    pub fn last_token(&self, template: NotificationTemplate, recipient: &str, var: &str) -> Option<String> {
        self.sent()
            .iter()
            .rev()
            .find(|n| n.template == template && n.recipient == recipient)
            .and_then(|n| n.variables.get(var))
            .and_then(|link| link.rsplit('/').next().map(str::to_string))
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        Ok(())
    }
}

pub struct TestApp {
    pub ctx: Arc<ServiceContext>,
    pub clock: Arc<FixedClock>,
    pub processor: Arc<InMemoryProcessor>,
    pub notifier: Arc<RecordingNotifier>,
    pub settings: Settings,
    pub pool: SqlitePool,
    // Holds the on-disk database open for the life of the app
    _dir: Option<TempDir>,
}

pub const WEBHOOK_SECRET: &str = "whsec_test";

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 3, 1, 12, 0, 0).single().expect("valid date")
}

pub async fn test_pool() -> SqlitePool {
    // One connection keeps the in-memory database alive and shared
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");

    pool
}

/// A WAL database file served by several connections, like production.
pub async fn file_pool(dir: &TempDir) -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("workshops.db"))
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .expect("file database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");

    pool
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_settings(Settings::default()).await
    }

    pub async fn with_settings(settings: Settings) -> Self {
        let pool = test_pool().await;
        Self::assemble(pool, settings, None).await
    }

    /// Backed by a multi-connection pool so concurrent calls really overlap.
    pub async fn on_disk() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let pool = file_pool(&dir).await;
        Self::assemble(pool, Settings::default(), Some(dir)).await
    }

    async fn assemble(pool: SqlitePool, settings: Settings, dir: Option<TempDir>) -> Self {
        let clock = Arc::new(FixedClock::new(epoch()));
        let processor = Arc::new(InMemoryProcessor::with_webhook_secret(WEBHOOK_SECRET));
        let notifier = Arc::new(RecordingNotifier::default());

        let notifications = Arc::new(NotificationManager::new());
        notifications.register(notifier.clone()).await;

        let ctx = Arc::new(ServiceContext::new(
            pool.clone(),
            processor.clone(),
            notifications,
            clock.clone(),
            &settings,
        ));

        Self {
            ctx,
            clock,
            processor,
            notifier,
            settings,
            pool,
            _dir: dir,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use workshops::clock::Clock;
        self.clock.now()
    }

    /// A draft starting ten days from now, 3 hours long, 3-day refund window.
    pub fn workshop_request(&self, capacity: i64, batch_size: i64, price_cents: i64) -> CreateWorkshopRequest {
        let starts_at = self.now() + Duration::days(10);
        CreateWorkshopRequest {
            title: "Intro to Welding".to_string(),
            description: "Bring closed-toe shoes".to_string(),
            location: Some("Metal shop".to_string()),
            starts_at,
            ends_at: starts_at + Duration::hours(3),
            capacity,
            batch_size: Some(batch_size),
            cool_off_days: Some(5),
            refund_window_days: Some(3),
            price_cents,
            currency: None,
        }
    }

    pub async fn draft(&self, capacity: i64, batch_size: i64, price_cents: i64) -> Workshop {
        self.ctx
            .workshop_service
            .create(self.workshop_request(capacity, batch_size, price_cents), None)
            .await
            .expect("create workshop")
    }

    /// Adds `n` external people to the waitlist, one minute apart.
    pub async fn fill_waitlist(&self, n: usize) -> Vec<WaitlistEntry> {
        let mut entries = Vec::with_capacity(n);
        for i in 0..n {
            let entry = self
                .join_waitlist(&format!("Person {}", i), &format!("person{}@example.com", i), 0)
                .await;
            entries.push(entry);
            self.clock.advance(Duration::minutes(1));
        }
        entries
    }

    pub async fn join_waitlist(&self, name: &str, email: &str, priority: i64) -> WaitlistEntry {
        self.ctx
            .waitlist_service
            .join(JoinWaitlistRequest {
                member_id: None,
                full_name: name.to_string(),
                email: email.to_string(),
                priority,
            })
            .await
            .expect("join waitlist")
    }

    pub async fn join_as_member(&self, member_id: Uuid, name: &str, email: &str) -> WaitlistEntry {
        self.ctx
            .waitlist_service
            .join(JoinWaitlistRequest {
                member_id: Some(member_id),
                full_name: name.to_string(),
                email: email.to_string(),
                priority: 0,
            })
            .await
            .expect("join waitlist")
    }

    pub fn payment_token(&self, email: &str) -> String {
        self.notifier
            .last_token(NotificationTemplate::Invitation, email, "payment_link")
            .expect("invitation sent")
    }

    pub fn onboarding_token(&self, email: &str) -> String {
        self.notifier
            .last_token(NotificationTemplate::OnboardingInvite, email, "onboarding_link")
            .expect("onboarding link sent")
    }

    /// Opens the invitee's payment link and pays it; returns the registration id.
    pub async fn pay(&self, email: &str) -> Uuid {
        let checkout = self
            .ctx
            .registration_service
            .begin_payment(&self.payment_token(email))
            .await
            .expect("begin payment");
        let artifact = checkout.artifact_id.expect("paid workshop has an artifact");
        let callback = self.processor.complete_payment(&artifact).expect("artifact exists");
        self.ctx.payment_callbacks.handle(&callback).await.expect("apply callback");
        checkout.registration.id
    }
}
