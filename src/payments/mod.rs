use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

pub mod memory;
pub mod stripe_client;

pub use memory::InMemoryProcessor;
pub use stripe_client::StripeClient;

/// Parameters for one payment artifact (a payment intent at the processor).
#[derive(Debug, Clone)]
pub struct ArtifactRequest {
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CreatedArtifact {
    pub id: String,
    pub client_secret: String,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    /// Still waiting for the customer; safe to hand out again
    Payable,
    Processing,
    Succeeded,
    Cancelled,
    /// The processor has no record of the artifact
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    PaymentSucceeded,
    PaymentFailed,
    RefundCompleted,
    RefundFailed,
}

impl CallbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackOutcome::PaymentSucceeded => "payment_succeeded",
            CallbackOutcome::PaymentFailed => "payment_failed",
            CallbackOutcome::RefundCompleted => "refund_completed",
            CallbackOutcome::RefundFailed => "refund_failed",
        }
    }
}

/// An asynchronous notification from the processor, already verified.
///
/// Delivery order is not guaranteed and the same event may arrive twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorCallback {
    pub event_id: String,
    pub artifact_id: String,
    pub outcome: CallbackOutcome,
    pub amount_cents: i64,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    fn name(&self) -> &str;
    async fn create_artifact(&self, request: &ArtifactRequest) -> Result<CreatedArtifact>;
    async fn artifact_state(&self, artifact_id: &str) -> Result<ArtifactState>;
    async fn cancel_artifact(&self, artifact_id: &str) -> Result<()>;
    /// Returns the processor's refund id.
    async fn create_refund(&self, artifact_id: &str, amount_cents: i64) -> Result<String>;
    /// Verifies and decodes a webhook body. `Ok(None)` for events we ignore.
    fn parse_callback(&self, payload: &str, signature: &str) -> Result<Option<ProcessorCallback>>;
}
