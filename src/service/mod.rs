pub mod waitlist_selector;
pub mod invitation_service;
pub mod payment_session_service;
pub mod refund_service;
pub mod registration_service;
pub mod waitlist_service;
pub mod workshop_service;
pub mod onboarding_service;
pub mod payment_callbacks;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::config::Settings;
use crate::notifications::NotificationManager;
use crate::payments::PaymentProcessor;
use crate::repository::*;

use invitation_service::InvitationService;
use onboarding_service::OnboardingService;
use payment_callbacks::PaymentCallbackHandler;
use payment_session_service::PaymentSessionCache;
use refund_service::RefundService;
use registration_service::RegistrationService;
use waitlist_service::WaitlistService;
use workshop_service::WorkshopService;

pub struct ServiceContext {
    pub workshop_repo: Arc<dyn WorkshopRepository>,
    pub registration_repo: Arc<dyn RegistrationRepository>,
    pub waitlist_repo: Arc<dyn WaitlistRepository>,
    pub payment_session_repo: Arc<dyn PaymentSessionRepository>,
    pub refund_repo: Arc<dyn RefundRepository>,
    pub processor: Arc<dyn PaymentProcessor>,
    pub notifications: Arc<NotificationManager>,
    pub clock: Arc<dyn Clock>,
    pub workshop_service: Arc<WorkshopService>,
    pub invitation_service: Arc<InvitationService>,
    pub registration_service: Arc<RegistrationService>,
    pub waitlist_service: Arc<WaitlistService>,
    pub payment_sessions: Arc<PaymentSessionCache>,
    pub refund_service: Arc<RefundService>,
    pub onboarding_service: Arc<OnboardingService>,
    pub payment_callbacks: Arc<PaymentCallbackHandler>,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    pub fn new(
        db_pool: SqlitePool,
        processor: Arc<dyn PaymentProcessor>,
        notifications: Arc<NotificationManager>,
        clock: Arc<dyn Clock>,
        settings: &Settings,
    ) -> Self {
        let workshop_repo: Arc<dyn WorkshopRepository> =
            Arc::new(SqliteWorkshopRepository::new(db_pool.clone()));
        let registration_repo: Arc<dyn RegistrationRepository> =
            Arc::new(SqliteRegistrationRepository::new(db_pool.clone()));
        let waitlist_repo: Arc<dyn WaitlistRepository> =
            Arc::new(SqliteWaitlistRepository::new(db_pool.clone()));
        let payment_session_repo: Arc<dyn PaymentSessionRepository> =
            Arc::new(SqlitePaymentSessionRepository::new(db_pool.clone()));
        let refund_repo: Arc<dyn RefundRepository> =
            Arc::new(SqliteRefundRepository::new(db_pool.clone()));

        let base_url = settings.server.base_url.clone();

        let invitation_service = Arc::new(InvitationService::new(
            workshop_repo.clone(),
            notifications.clone(),
            clock.clone(),
            db_pool.clone(),
            settings.invitations.clone(),
            base_url.clone(),
        ));

        let payment_sessions = Arc::new(PaymentSessionCache::new(
            payment_session_repo.clone(),
            processor.clone(),
            clock.clone(),
            crate::clock::hours(settings.workshops.session_ttl_hours),
        ));

        let refund_service = Arc::new(RefundService::new(
            refund_repo.clone(),
            registration_repo.clone(),
            workshop_repo.clone(),
            processor.clone(),
            notifications.clone(),
            clock.clone(),
            db_pool.clone(),
            settings.refunds.clone(),
        ));

        let registration_service = Arc::new(RegistrationService::new(
            registration_repo.clone(),
            workshop_repo.clone(),
            waitlist_repo.clone(),
            payment_sessions.clone(),
            refund_service.clone(),
            invitation_service.clone(),
            notifications.clone(),
            clock.clone(),
            db_pool.clone(),
        ));

        let workshop_service = Arc::new(WorkshopService::new(
            workshop_repo.clone(),
            registration_repo.clone(),
            invitation_service.clone(),
            refund_service.clone(),
            payment_sessions.clone(),
            notifications.clone(),
            clock.clone(),
            db_pool.clone(),
            settings.workshops.clone(),
        ));

        let waitlist_service = Arc::new(WaitlistService::new(waitlist_repo.clone(), clock.clone()));

        let onboarding_service = Arc::new(OnboardingService::new(
            registration_repo.clone(),
            workshop_repo.clone(),
            notifications.clone(),
            clock.clone(),
            db_pool.clone(),
            settings.workshops.clone(),
            base_url,
        ));

        let payment_callbacks = Arc::new(PaymentCallbackHandler::new(
            processor.clone(),
            registration_service.clone(),
            refund_service.clone(),
            clock.clone(),
            db_pool.clone(),
        ));

        Self {
            workshop_repo,
            registration_repo,
            waitlist_repo,
            payment_session_repo,
            refund_repo,
            processor,
            notifications,
            clock,
            workshop_service,
            invitation_service,
            registration_service,
            waitlist_service,
            payment_sessions,
            refund_service,
            onboarding_service,
            payment_callbacks,
            db_pool,
        }
    }
}
