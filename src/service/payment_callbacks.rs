use std::sync::Arc;

use sqlx::SqlitePool;

use crate::{
    clock::Clock,
    error::Result,
    payments::{CallbackOutcome, PaymentProcessor, ProcessorCallback},
    repository::processor_event_repository,
    service::{refund_service::RefundService, registration_service::RegistrationService},
};

/// Whether a webhook delivery did anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackDisposition {
    Applied,
    Duplicate,
    Ignored,
}

/// Routes verified processor callbacks to the registration and refund flows.
///
/// Each event id is applied once. The event is only recorded after its
/// handler succeeds, so a delivery that failed halfway is retried in full
/// by the processor's redelivery; the handlers themselves are conditional
/// updates and tolerate that.
pub struct PaymentCallbackHandler {
    processor: Arc<dyn PaymentProcessor>,
    registrations: Arc<RegistrationService>,
    refunds: Arc<RefundService>,
    clock: Arc<dyn Clock>,
    pool: SqlitePool,
}

impl PaymentCallbackHandler {
    pub fn new(
        processor: Arc<dyn PaymentProcessor>,
        registrations: Arc<RegistrationService>,
        refunds: Arc<RefundService>,
        clock: Arc<dyn Clock>,
        pool: SqlitePool,
    ) -> Self {
        Self {
            processor,
            registrations,
            refunds,
            clock,
            pool,
        }
    }

    /// Verifies and applies a raw webhook body.
    pub async fn handle_webhook(&self, payload: &str, signature: &str) -> Result<CallbackDisposition> {
        match self.processor.parse_callback(payload, signature)? {
            Some(callback) => self.handle(&callback).await,
            None => Ok(CallbackDisposition::Ignored),
        }
    }

    pub async fn handle(&self, callback: &ProcessorCallback) -> Result<CallbackDisposition> {
        if processor_event_repository::was_applied(&self.pool, &callback.event_id).await? {
            tracing::debug!("Processor event {} already applied", callback.event_id);
            return Ok(CallbackDisposition::Duplicate);
        }

        tracing::info!(
            "Processor event {}: {} for {}",
            callback.event_id,
            callback.outcome.as_str(),
            callback.artifact_id
        );

        match callback.outcome {
            CallbackOutcome::PaymentSucceeded => self.registrations.handle_payment_succeeded(callback).await?,
            CallbackOutcome::PaymentFailed => self.registrations.handle_payment_failed(callback).await?,
            CallbackOutcome::RefundCompleted => self.refunds.handle_refund_completed(callback).await?,
            CallbackOutcome::RefundFailed => self.refunds.handle_refund_failed(callback).await?,
        }

        processor_event_repository::record(
            &self.pool,
            &callback.event_id,
            callback.outcome.as_str(),
            &callback.artifact_id,
            self.clock.now(),
        )
        .await?;

        Ok(CallbackDisposition::Applied)
    }
}
