use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{
    error::{AppError, Result},
    payments::{
        ArtifactRequest, ArtifactState, CallbackOutcome, CreatedArtifact, PaymentProcessor,
        ProcessorCallback,
    },
};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
struct StoredArtifact {
    state: ArtifactState,
    amount_cents: i64,
}

/// Processor that keeps artifacts in memory.
///
/// Used when Stripe is disabled and by the test suite, which flips the
/// failure switches to exercise compensation paths.
///
/// Webhooks are JSON `ProcessorCallback`s signed with a hex HMAC-SHA256 of
/// the body. Without a webhook secret every webhook is rejected.
#[derive(Default)]
pub struct InMemoryProcessor {
    artifacts: Mutex<HashMap<String, StoredArtifact>>,
    refunds: Mutex<Vec<(String, i64)>>,
    next_id: AtomicU64,
    fail_refunds: AtomicBool,
    fail_cancellations: AtomicBool,
    failing_cancellations: Mutex<HashSet<String>>,
    webhook_secret: Option<String>,
}

impl InMemoryProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_webhook_secret(secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: Some(secret.into()),
            ..Self::default()
        }
    }

    /// The signature header value a webhook with this body must carry.
    pub fn sign(&self, payload: &str) -> Option<String> {
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    fn mac(&self) -> Option<HmacSha256> {
        let secret = self.webhook_secret.as_deref()?;
        HmacSha256::new_from_slice(secret.as_bytes()).ok()
    }

    pub fn set_fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_cancellations(&self, fail: bool) {
        self.fail_cancellations.store(fail, Ordering::SeqCst);
    }

    /// Makes cancelling this one artifact fail until further notice.
    pub fn fail_cancellation_of(&self, artifact_id: &str) {
        if let Ok(mut failing) = self.failing_cancellations.lock() {
            failing.insert(artifact_id.to_string());
        }
    }

    /// Drops an artifact, as if it were deleted at the processor.
    pub fn forget(&self, artifact_id: &str) {
        if let Ok(mut artifacts) = self.artifacts.lock() {
            artifacts.remove(artifact_id);
        }
    }

    /// Moves an artifact to `state`, as the customer or the processor would.
    pub fn set_state(&self, artifact_id: &str, state: ArtifactState) {
        if let Ok(mut artifacts) = self.artifacts.lock() {
            if let Some(artifact) = artifacts.get_mut(artifact_id) {
                artifact.state = state;
            }
        }
    }

    pub fn state_of(&self, artifact_id: &str) -> Option<ArtifactState> {
        self.artifacts
            .lock()
            .ok()
            .and_then(|artifacts| artifacts.get(artifact_id).map(|a| a.state))
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn refunds_issued(&self) -> Vec<(String, i64)> {
        self.refunds.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Simulates the customer paying and returns the webhook that would follow.
    pub fn complete_payment(&self, artifact_id: &str) -> Option<ProcessorCallback> {
        let mut artifacts = self.artifacts.lock().ok()?;
        let artifact = artifacts.get_mut(artifact_id)?;
        artifact.state = ArtifactState::Succeeded;
        Some(ProcessorCallback {
            event_id: format!("evt_{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            artifact_id: artifact_id.to_string(),
            outcome: CallbackOutcome::PaymentSucceeded,
            amount_cents: artifact.amount_cents,
        })
    }

    fn next(&self, prefix: &str) -> String {
        format!("{}_{:08}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl PaymentProcessor for InMemoryProcessor {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn create_artifact(&self, request: &ArtifactRequest) -> Result<CreatedArtifact> {
        let id = self.next("pi");
        let mut artifacts = self
            .artifacts
            .lock()
            .map_err(|_| AppError::Internal("processor state poisoned".to_string()))?;
        artifacts.insert(
            id.clone(),
            StoredArtifact {
                state: ArtifactState::Payable,
                amount_cents: request.amount_cents,
            },
        );

        Ok(CreatedArtifact {
            client_secret: format!("{}_secret", id),
            id,
            amount_cents: request.amount_cents,
        })
    }

    async fn artifact_state(&self, artifact_id: &str) -> Result<ArtifactState> {
        Ok(self.state_of(artifact_id).unwrap_or(ArtifactState::Missing))
    }

    async fn cancel_artifact(&self, artifact_id: &str) -> Result<()> {
        let failing = self
            .failing_cancellations
            .lock()
            .map(|failing| failing.contains(artifact_id))
            .unwrap_or(false);
        if failing || self.fail_cancellations.load(Ordering::SeqCst) {
            return Err(AppError::External("processor unavailable".to_string()));
        }
        self.set_state(artifact_id, ArtifactState::Cancelled);
        Ok(())
    }

    async fn create_refund(&self, artifact_id: &str, amount_cents: i64) -> Result<String> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(AppError::External("refund declined by processor".to_string()));
        }
        let mut refunds = self
            .refunds
            .lock()
            .map_err(|_| AppError::Internal("processor state poisoned".to_string()))?;
        refunds.push((artifact_id.to_string(), amount_cents));
        Ok(self.next("re"))
    }

    fn parse_callback(&self, payload: &str, signature: &str) -> Result<Option<ProcessorCallback>> {
        let Some(mut mac) = self.mac() else {
            tracing::warn!("Rejected webhook: no webhook secret configured for the in-memory processor");
            return Err(AppError::Unauthorized);
        };
        mac.update(payload.as_bytes());
        let presented = hex::decode(signature.trim()).map_err(|_| AppError::Unauthorized)?;
        if mac.verify_slice(&presented).is_err() {
            tracing::warn!("Rejected webhook with a bad signature");
            return Err(AppError::Unauthorized);
        }

        serde_json::from_str(payload)
            .map(Some)
            .map_err(|e| AppError::BadRequest(format!("Invalid callback payload: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{"event_id":"evt_1","artifact_id":"pi_1","outcome":"payment_succeeded","amount_cents":4500}"#;

    #[test]
    fn test_unsigned_processor_rejects_every_webhook() {
        let processor = InMemoryProcessor::new();
        assert!(processor.sign(PAYLOAD).is_none());
        let err = processor.parse_callback(PAYLOAD, "anything").unwrap_err();
        assert_eq!(err.kind(), "unauthorized");
    }

    #[test]
    fn test_signed_webhook_round_trip() {
        let processor = InMemoryProcessor::with_webhook_secret("whsec_local");
        let signature = processor.sign(PAYLOAD).unwrap();

        let callback = processor.parse_callback(PAYLOAD, &signature).unwrap().unwrap();
        assert_eq!(callback.amount_cents, 4500);

        let tampered = PAYLOAD.replace("4500", "1");
        assert!(processor.parse_callback(&tampered, &signature).is_err());
        assert!(processor.parse_callback(PAYLOAD, "not-hex").is_err());
    }

    #[tokio::test]
    async fn test_forgotten_artifact_is_missing() {
        let processor = InMemoryProcessor::new();
        processor.forget("pi_unknown");
        assert_eq!(processor.artifact_state("pi_unknown").await.unwrap(), ArtifactState::Missing);
    }
}
