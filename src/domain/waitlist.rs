use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::Attendee;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub attendee: Attendee,
    pub full_name: String,
    pub email: String,
    /// Lower sorts first; manual overrides use negative values
    pub priority: i64,
    pub joined_at: DateTime<Utc>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub removed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JoinWaitlistRequest {
    /// Set for club members; omitted for external people, who get a fresh id
    pub member_id: Option<Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
    #[validate(email)]
    pub email: String,
    #[serde(default)]
    pub priority: i64,
}

/// Self-service waitlist signup. Member identity and priority are only set
/// by coordinators, so unknown fields are rejected rather than ignored.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PublicWaitlistRequest {
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
    #[validate(email)]
    pub email: String,
}

impl From<PublicWaitlistRequest> for JoinWaitlistRequest {
    fn from(request: PublicWaitlistRequest) -> Self {
        Self {
            member_id: None,
            full_name: request.full_name,
            email: request.email,
            priority: 0,
        }
    }
}
