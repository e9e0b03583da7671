use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    clock::{self, Clock},
    domain::{IntentKey, PaymentItem, PaymentSession},
    error::{AppError, Result},
    payments::{ArtifactRequest, ArtifactState, CreatedArtifact, PaymentProcessor},
    repository::PaymentSessionRepository,
};

/// How many expired sessions one sweep pass handles.
const SWEEP_BATCH: i64 = 100;

#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepReport {
    pub retired: usize,
    pub failures: usize,
}

/// What the processor says about a cached session's artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionHealth {
    /// Every artifact still accepts payment
    Payable,
    /// Money is moving or has moved; the callback will settle it
    InFlight,
    Paid,
    /// At least one artifact was cancelled or expired at the processor
    Dead,
}

/// Caches one reusable checkout per (user, intent).
///
/// Reusing the artifact is what keeps a user from ending up with two
/// payable checkouts for the same thing.
pub struct PaymentSessionCache {
    repo: Arc<dyn PaymentSessionRepository>,
    processor: Arc<dyn PaymentProcessor>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl PaymentSessionCache {
    pub fn new(
        repo: Arc<dyn PaymentSessionRepository>,
        processor: Arc<dyn PaymentProcessor>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self { repo, processor, clock, ttl }
    }

    /// Returns the live session for (user, intent), creating one if needed.
    ///
    /// A cached session is only reused after the processor confirms its
    /// artifacts are still payable. An expired or dead one is retired and
    /// replaced.
    pub async fn get_or_create_session(
        &self,
        user_id: Uuid,
        intent_key: &IntentKey,
        items: &[PaymentItem],
        currency: &str,
        metadata: HashMap<String, String>,
    ) -> Result<PaymentSession> {
        if items.is_empty() {
            return Err(AppError::BadRequest("A payment session needs at least one item".to_string()));
        }

        let now = self.clock.now();

        if let Some(existing) = self.repo.find_unused(user_id, intent_key).await? {
            let health = self.health(&existing).await?;

            match health {
                SessionHealth::Payable if existing.is_live(now) => {
                    tracing::debug!("Reusing payment session {} for {}", existing.id, intent_key);
                    return Ok(existing);
                }
                SessionHealth::InFlight => {
                    return Err(AppError::Conflict("A payment for this checkout is already processing".to_string()));
                }
                SessionHealth::Paid => {
                    self.repo.mark_used(existing.id, now).await?;
                    return Err(AppError::Conflict("This checkout has already been paid".to_string()));
                }
                SessionHealth::Payable | SessionHealth::Dead => {
                    self.cancel_artifacts(&existing).await?;
                    self.repo.mark_used(existing.id, now).await?;
                    tracing::info!("Retired payment session {} for {}", existing.id, intent_key);
                }
            }
        }

        let created = self.create_artifacts(user_id, intent_key, items, currency, &metadata).await?;

        let session = PaymentSession {
            id: Uuid::new_v4(),
            user_id,
            intent_key: intent_key.clone(),
            artifact_ids: created.iter().map(|a| a.id.clone()).collect(),
            client_secrets: created.iter().map(|a| a.client_secret.clone()).collect(),
            amounts_cents: created.iter().map(|a| a.amount_cents).collect(),
            currency: currency.to_string(),
            created_at: now,
            expires_at: clock::saturating_add(now, self.ttl),
            is_used: false,
            used_at: None,
        };

        match self.repo.create(session.clone()).await {
            Ok(stored) => {
                tracing::info!(
                    "Created payment session {} for {} ({} artifacts)",
                    stored.id,
                    intent_key,
                    stored.artifact_ids.len()
                );
                Ok(stored)
            }
            Err(AppError::Conflict(_)) => {
                // A concurrent call for the same key won the insert; hand out
                // its session and drop ours.
                self.release_artifacts(&session.artifact_ids).await;
                self.repo.find_unused(user_id, intent_key).await?
                    .ok_or_else(|| AppError::Conflict("Payment session changed concurrently".to_string()))
            }
            Err(e) => {
                self.release_artifacts(&session.artifact_ids).await;
                Err(e)
            }
        }
    }

    /// Marks a session used. Safe to call more than once.
    pub async fn mark_used(&self, session_id: Uuid) -> Result<bool> {
        self.repo.mark_used(session_id, self.clock.now()).await
    }

    /// Retires the session a paying callback came through, if any.
    pub async fn mark_used_by_artifact(&self, artifact_id: &str) -> Result<Option<PaymentSession>> {
        let Some(session) = self.repo.find_by_artifact(artifact_id).await? else {
            return Ok(None);
        };
        if self.repo.mark_used(session.id, self.clock.now()).await? {
            tracing::debug!("Payment session {} used by artifact {}", session.id, artifact_id);
        }
        Ok(Some(session))
    }

    pub async fn find_by_artifact(&self, artifact_id: &str) -> Result<Option<PaymentSession>> {
        self.repo.find_by_artifact(artifact_id).await
    }

    /// Cancels the open checkout for (user, intent) after its purpose went away.
    ///
    /// If the processor refuses, the session stays unused so the sweep tries
    /// again once it expires.
    pub async fn retire(&self, user_id: Uuid, intent_key: &IntentKey) -> Result<()> {
        let Some(session) = self.repo.find_unused(user_id, intent_key).await? else {
            return Ok(());
        };

        self.cancel_artifacts(&session).await?;
        self.repo.mark_used(session.id, self.clock.now()).await?;
        tracing::info!("Retired payment session {} for {}", session.id, intent_key);
        Ok(())
    }

    /// Cancels payable artifacts of expired, unused sessions and retires them.
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let expired = self.repo.list_expired_unused(now, SWEEP_BATCH).await?;
        let mut report = SweepReport::default();

        for session in expired {
            match self.cancel_artifacts(&session).await {
                Ok(()) => {
                    if self.repo.mark_used(session.id, now).await? {
                        report.retired += 1;
                    }
                }
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!("Could not retire expired payment session {}: {}", session.id, e);
                    self.repo.record_sweep_failure(session.id, now).await?;
                }
            }
        }

        if report.retired > 0 || report.failures > 0 {
            tracing::info!(
                "Swept expired payment sessions: {} retired, {} failed",
                report.retired,
                report.failures
            );
        }
        Ok(report)
    }

    async fn health(&self, session: &PaymentSession) -> Result<SessionHealth> {
        let mut health = SessionHealth::Payable;

        for artifact_id in &session.artifact_ids {
            match self.processor.artifact_state(artifact_id).await? {
                ArtifactState::Payable => {}
                ArtifactState::Processing => return Ok(SessionHealth::InFlight),
                ArtifactState::Succeeded => health = SessionHealth::Paid,
                ArtifactState::Cancelled | ArtifactState::Missing => {
                    if health == SessionHealth::Payable {
                        health = SessionHealth::Dead;
                    }
                }
            }
        }

        Ok(health)
    }

    /// Cancels every artifact that is still payable. Paid, cancelled and
    /// missing ones are left alone.
    async fn cancel_artifacts(&self, session: &PaymentSession) -> Result<()> {
        for artifact_id in &session.artifact_ids {
            if self.processor.artifact_state(artifact_id).await? == ArtifactState::Payable {
                self.processor.cancel_artifact(artifact_id).await?;
            }
        }
        Ok(())
    }

    async fn create_artifacts(
        &self,
        user_id: Uuid,
        intent_key: &IntentKey,
        items: &[PaymentItem],
        currency: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<Vec<CreatedArtifact>> {
        let mut created: Vec<CreatedArtifact> = Vec::with_capacity(items.len());

        for item in items {
            let mut item_metadata = metadata.clone();
            item_metadata.insert("intent_key".to_string(), intent_key.to_string());

            let request = ArtifactRequest {
                user_id,
                amount_cents: item.amount_cents,
                currency: currency.to_string(),
                description: item.description.clone(),
                metadata: item_metadata,
            };

            match self.processor.create_artifact(&request).await {
                Ok(artifact) => created.push(artifact),
                Err(e) => {
                    let ids: Vec<String> = created.iter().map(|a| a.id.clone()).collect();
                    self.release_artifacts(&ids).await;
                    return Err(e);
                }
            }
        }

        Ok(created)
    }

    /// Best-effort cancel for artifacts that never made it into a session.
    async fn release_artifacts(&self, artifact_ids: &[String]) {
        for artifact_id in artifact_ids {
            if let Err(e) = self.processor.cancel_artifact(artifact_id).await {
                tracing::warn!("Failed to cancel orphaned artifact {}: {}", artifact_id, e);
            }
        }
    }
}
