use async_trait::async_trait;
use stripe::{
    CancelPaymentIntent, Client, CreatePaymentIntent, CreateRefund, Currency, EventObject,
    EventType, PaymentIntent, PaymentIntentId, PaymentIntentStatus, Refund, StripeError,
    Webhook, WebhookError,
};

use crate::{
    error::{AppError, Result},
    payments::{
        ArtifactRequest, ArtifactState, CallbackOutcome, CreatedArtifact, PaymentProcessor,
        ProcessorCallback,
    },
};

/// Stripe-backed processor. Artifacts are payment intents.
pub struct StripeClient {
    client: Client,
    webhook_secret: String,
}

impl StripeClient {
    pub fn new(api_key: String, webhook_secret: String) -> Self {
        let client = Client::new(api_key);
        Self {
            client,
            webhook_secret,
        }
    }

    fn parse_intent_id(artifact_id: &str) -> Result<PaymentIntentId> {
        artifact_id
            .parse::<PaymentIntentId>()
            .map_err(|e| AppError::BadRequest(format!("Invalid payment intent id {}: {}", artifact_id, e)))
    }

    fn parse_currency(currency: &str) -> Result<Currency> {
        serde_json::from_value(serde_json::Value::String(currency.to_lowercase()))
            .map_err(|_| AppError::Validation(format!("Unsupported currency: {}", currency)))
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    fn name(&self) -> &str {
        "stripe"
    }

    async fn create_artifact(&self, request: &ArtifactRequest) -> Result<CreatedArtifact> {
        let currency = Self::parse_currency(&request.currency)?;

        let mut params = CreatePaymentIntent::new(request.amount_cents, currency);
        params.description = Some(&request.description);

        let mut metadata = request.metadata.clone();
        metadata.insert("user_id".to_string(), request.user_id.to_string());
        params.metadata = Some(metadata);

        let intent = PaymentIntent::create(&self.client, params)
            .await
            .map_err(|e| AppError::External(format!("Stripe error: {}", e)))?;

        let client_secret = intent
            .client_secret
            .clone()
            .ok_or_else(|| AppError::External("No client secret returned".to_string()))?;

        Ok(CreatedArtifact {
            id: intent.id.to_string(),
            client_secret,
            amount_cents: intent.amount,
        })
    }

    async fn artifact_state(&self, artifact_id: &str) -> Result<ArtifactState> {
        let Ok(id) = Self::parse_intent_id(artifact_id) else {
            return Ok(ArtifactState::Missing);
        };
        let intent = match PaymentIntent::retrieve(&self.client, &id, &[]).await {
            Ok(intent) => intent,
            Err(StripeError::Stripe(error)) if error.http_status == 404 => {
                tracing::warn!("Stripe has no payment intent {}", artifact_id);
                return Ok(ArtifactState::Missing);
            }
            Err(e) => return Err(AppError::External(format!("Stripe error: {}", e))),
        };

        let state = match intent.status {
            PaymentIntentStatus::RequiresPaymentMethod
            | PaymentIntentStatus::RequiresConfirmation
            | PaymentIntentStatus::RequiresAction => ArtifactState::Payable,
            PaymentIntentStatus::Processing | PaymentIntentStatus::RequiresCapture => {
                ArtifactState::Processing
            }
            PaymentIntentStatus::Succeeded => ArtifactState::Succeeded,
            PaymentIntentStatus::Canceled => ArtifactState::Cancelled,
        };
        Ok(state)
    }

    async fn cancel_artifact(&self, artifact_id: &str) -> Result<()> {
        PaymentIntent::cancel(
            &self.client,
            artifact_id,
            CancelPaymentIntent {
                cancellation_reason: None,
            },
        )
        .await
        .map_err(|e| AppError::External(format!("Stripe error: {}", e)))?;

        tracing::info!("Cancelled Stripe payment intent {}", artifact_id);
        Ok(())
    }

    async fn create_refund(&self, artifact_id: &str, amount_cents: i64) -> Result<String> {
        let mut params = CreateRefund::new();
        params.payment_intent = Some(Self::parse_intent_id(artifact_id)?);
        params.amount = Some(amount_cents);

        let refund = Refund::create(&self.client, params)
            .await
            .map_err(|e| AppError::External(format!("Stripe error: {}", e)))?;

        Ok(refund.id.to_string())
    }

    fn parse_callback(&self, payload: &str, signature: &str) -> Result<Option<ProcessorCallback>> {
        // Verify webhook signature and construct event
        let event = Webhook::construct_event(payload, signature, &self.webhook_secret)
            .map_err(|e| match e {
                WebhookError::BadSignature => AppError::BadRequest("Invalid signature".to_string()),
                _ => AppError::External(format!("Webhook error: {}", e)),
            })?;

        let event_id = event.id.to_string();

        let callback = match (event.type_, event.data.object) {
            (EventType::PaymentIntentSucceeded, EventObject::PaymentIntent(intent)) => {
                Some(ProcessorCallback {
                    event_id,
                    artifact_id: intent.id.to_string(),
                    outcome: CallbackOutcome::PaymentSucceeded,
                    amount_cents: intent.amount_received,
                })
            }
            (EventType::PaymentIntentPaymentFailed, EventObject::PaymentIntent(intent)) => {
                Some(ProcessorCallback {
                    event_id,
                    artifact_id: intent.id.to_string(),
                    outcome: CallbackOutcome::PaymentFailed,
                    amount_cents: intent.amount,
                })
            }
            (EventType::ChargeRefunded, EventObject::Charge(charge)) => {
                match charge.payment_intent {
                    Some(intent) => Some(ProcessorCallback {
                        event_id,
                        artifact_id: intent.id().to_string(),
                        outcome: CallbackOutcome::RefundCompleted,
                        amount_cents: charge.amount_refunded,
                    }),
                    None => {
                        tracing::warn!("Refunded charge {} has no payment intent", charge.id);
                        None
                    }
                }
            }
            (other, _) => {
                tracing::debug!("Unhandled webhook event type: {:?}", other);
                None
            }
        };

        Ok(callback)
    }
}
