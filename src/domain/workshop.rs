use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::clock::{days, saturating_add, saturating_sub};

/// Upper bound for the day-valued scheduling settings of a workshop.
pub const MAX_SCHEDULE_DAYS: i64 = 365;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workshop {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    pub status: WorkshopStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub capacity: i64,
    pub batch_size: i64,
    pub cool_off_days: i64,
    /// `None` means refunds are never granted for this workshop
    pub refund_window_days: Option<i64>,
    pub price_cents: i64,
    pub currency: String,
    pub last_batch_sent_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workshop {
    /// Invitation payment links stop working one day before the start.
    pub fn payment_deadline(&self) -> DateTime<Utc> {
        saturating_sub(self.starts_at, days(1))
    }

    /// Last moment a refund may be requested, if refunds are allowed at all.
    pub fn refund_deadline(&self) -> Option<DateTime<Utc>> {
        self.refund_window_days
            .map(|window| saturating_sub(self.starts_at, days(window)))
    }

    /// Whether the cool-off since the previous batch has elapsed.
    pub fn cool_off_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.last_batch_sent_at {
            Some(sent) => now >= saturating_add(sent, days(self.cool_off_days)),
            None => true,
        }
    }

    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkshopStatus {
    Draft,
    Published,
    Finished,
    Cancelled,
}

impl WorkshopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkshopStatus::Draft => "draft",
            WorkshopStatus::Published => "published",
            WorkshopStatus::Finished => "finished",
            WorkshopStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(WorkshopStatus::Draft),
            "published" => Some(WorkshopStatus::Published),
            "finished" => Some(WorkshopStatus::Finished),
            "cancelled" => Some(WorkshopStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkshopStatus::Finished | WorkshopStatus::Cancelled)
    }

    /// Transitions are monotonic; cancellation is reachable from any
    /// non-terminal state.
    pub fn can_transition_to(&self, next: WorkshopStatus) -> bool {
        matches!(
            (self, next),
            (WorkshopStatus::Draft, WorkshopStatus::Published)
                | (WorkshopStatus::Published, WorkshopStatus::Finished)
                | (WorkshopStatus::Draft, WorkshopStatus::Cancelled)
                | (WorkshopStatus::Published, WorkshopStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for WorkshopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_schedule"))]
pub struct CreateWorkshopRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[validate(range(min = 1))]
    pub capacity: i64,
    /// Defaults to the capacity
    #[validate(range(min = 1))]
    pub batch_size: Option<i64>,
    #[validate(range(min = 0, max = MAX_SCHEDULE_DAYS))]
    pub cool_off_days: Option<i64>,
    #[validate(range(min = 0, max = MAX_SCHEDULE_DAYS))]
    pub refund_window_days: Option<i64>,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub price_cents: i64,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, Validate)]
pub struct UpdateWorkshopRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    #[validate(range(min = 1))]
    pub capacity: Option<i64>,
    #[validate(range(min = 1))]
    pub batch_size: Option<i64>,
    #[validate(range(min = 0, max = MAX_SCHEDULE_DAYS))]
    pub cool_off_days: Option<i64>,
    #[validate(range(min = 0, max = MAX_SCHEDULE_DAYS))]
    pub refund_window_days: Option<i64>,
    #[validate(range(min = 0))]
    pub price_cents: Option<i64>,
}

fn validate_schedule(request: &CreateWorkshopRequest) -> Result<(), ValidationError> {
    if request.ends_at < request.starts_at {
        return Err(ValidationError::new("ends_before_start"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_transitions() {
        use WorkshopStatus::*;
        assert!(Draft.can_transition_to(Published));
        assert!(Draft.can_transition_to(Cancelled));
        assert!(Published.can_transition_to(Finished));
        assert!(Published.can_transition_to(Cancelled));
        assert!(!Published.can_transition_to(Draft));
        assert!(!Draft.can_transition_to(Finished));
        assert!(!Finished.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Published));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            WorkshopStatus::Draft,
            WorkshopStatus::Published,
            WorkshopStatus::Finished,
            WorkshopStatus::Cancelled,
        ] {
            assert_eq!(WorkshopStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(WorkshopStatus::from_str("archived"), None);
    }

    #[test]
    fn test_create_request_rejects_inverted_schedule() {
        let now = Utc::now();
        let request = CreateWorkshopRequest {
            title: "Intro to Lockpicking".to_string(),
            description: String::new(),
            location: None,
            starts_at: now + Duration::days(10),
            ends_at: now + Duration::days(9),
            capacity: 8,
            batch_size: None,
            cool_off_days: None,
            refund_window_days: Some(3),
            price_cents: 2500,
            currency: None,
        };
        assert!(request.validate().is_err());

        let fixed = CreateWorkshopRequest {
            ends_at: now + Duration::days(10) + Duration::hours(3),
            ..request
        };
        assert!(fixed.validate().is_ok());
    }

    #[test]
    fn test_create_request_caps_day_settings() {
        let now = Utc::now();
        let request = CreateWorkshopRequest {
            title: "Intro to Forging".to_string(),
            description: String::new(),
            location: None,
            starts_at: now + Duration::days(10),
            ends_at: now + Duration::days(10) + Duration::hours(3),
            capacity: 8,
            batch_size: None,
            cool_off_days: Some(200_000_000_000_000),
            refund_window_days: Some(3),
            price_cents: 2500,
            currency: None,
        };
        assert!(request.validate().is_err());

        let request = CreateWorkshopRequest {
            cool_off_days: Some(MAX_SCHEDULE_DAYS),
            refund_window_days: Some(i64::MAX / 2),
            ..request
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_deadlines_do_not_overflow_on_stored_extremes() {
        let now = Utc::now();
        let workshop = Workshop {
            id: Uuid::new_v4(),
            title: "Legacy row".to_string(),
            description: String::new(),
            location: None,
            status: WorkshopStatus::Published,
            starts_at: now + Duration::days(10),
            ends_at: now + Duration::days(10) + Duration::hours(3),
            capacity: 4,
            batch_size: 4,
            cool_off_days: 200_000_000_000_000,
            refund_window_days: Some(i64::MAX / 2),
            price_cents: 0,
            currency: "usd".to_string(),
            last_batch_sent_at: Some(now),
            published_at: Some(now),
            finished_at: None,
            cancelled_at: None,
            created_by: Uuid::nil(),
            created_at: now,
            updated_at: now,
        };

        assert!(!workshop.cool_off_elapsed(now + Duration::days(3650)));
        assert_eq!(workshop.refund_deadline(), Some(DateTime::<Utc>::MIN_UTC));
        assert_eq!(workshop.payment_deadline(), workshop.starts_at - Duration::days(1));
    }
}
