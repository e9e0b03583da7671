use std::sync::Arc;

use uuid::Uuid;
use validator::Validate;

use crate::{
    clock::Clock,
    domain::*,
    error::{AppError, Result},
    repository::WaitlistRepository,
};

pub struct WaitlistService {
    repo: Arc<dyn WaitlistRepository>,
    clock: Arc<dyn Clock>,
}

impl WaitlistService {
    pub fn new(repo: Arc<dyn WaitlistRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    pub async fn join(&self, request: JoinWaitlistRequest) -> Result<WaitlistEntry> {
        request.validate()?;

        let existing = match request.member_id {
            Some(member_id) => self.repo.find_active_by_member(member_id).await?,
            None => self.repo.find_active_by_email(&request.email).await?,
        };
        if existing.is_some() {
            return Err(AppError::Conflict("Already on the waitlist".to_string()));
        }

        let attendee = match request.member_id {
            Some(member_id) => Attendee::Member(member_id),
            None => Attendee::External(Uuid::new_v4()),
        };

        let entry = WaitlistEntry {
            id: Uuid::new_v4(),
            attendee,
            full_name: request.full_name,
            email: request.email,
            priority: request.priority,
            joined_at: self.clock.now(),
            fulfilled_at: None,
            removed_at: None,
        };

        let entry = self.repo.create(entry).await?;
        tracing::info!("Waitlist entry {} joined with priority {}", entry.id, entry.priority);
        Ok(entry)
    }

    /// Active entries in the order the inviter would pick them.
    pub async fn list(&self) -> Result<Vec<WaitlistEntry>> {
        self.repo.list_active().await
    }

    pub async fn get(&self, id: Uuid) -> Result<WaitlistEntry> {
        self.repo.find_by_id(id).await?
            .ok_or_else(|| AppError::NotFound("Waitlist entry not found".to_string()))
    }

    /// Negative priorities jump the queue.
    pub async fn set_priority(&self, id: Uuid, priority: i64) -> Result<WaitlistEntry> {
        let entry = self.repo.set_priority(id, priority).await?;
        tracing::info!("Waitlist entry {} priority set to {}", id, priority);
        Ok(entry)
    }

    pub async fn remove(&self, id: Uuid) -> Result<()> {
        self.get(id).await?;
        self.repo.remove(id, self.clock.now()).await?;
        tracing::info!("Waitlist entry {} removed", id);
        Ok(())
    }
}
