use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Who a registration or waitlist entry belongs to.
///
/// A club member or an externally-identified person, never both.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Attendee {
    Member(Uuid),
    External(Uuid),
}

impl Attendee {
    /// Rebuilds the attendee from the two nullable storage columns.
    pub fn from_columns(member_id: Option<Uuid>, external_person_id: Option<Uuid>) -> Option<Self> {
        match (member_id, external_person_id) {
            (Some(id), None) => Some(Attendee::Member(id)),
            (None, Some(id)) => Some(Attendee::External(id)),
            _ => None,
        }
    }

    pub fn member_id(&self) -> Option<Uuid> {
        match self {
            Attendee::Member(id) => Some(*id),
            Attendee::External(_) => None,
        }
    }

    pub fn external_person_id(&self) -> Option<Uuid> {
        match self {
            Attendee::External(id) => Some(*id),
            Attendee::Member(_) => None,
        }
    }

    /// The identity payment sessions are cached under.
    pub fn user_id(&self) -> Uuid {
        match self {
            Attendee::Member(id) | Attendee::External(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub id: Uuid,
    pub workshop_id: Uuid,
    pub waitlist_entry_id: Option<Uuid>,
    pub attendee: Attendee,
    pub full_name: String,
    pub email: String,
    pub status: RegistrationStatus,
    pub priority: i64,
    pub invited_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub payment_token_hash: Option<String>,
    pub payment_token_expires_at: Option<DateTime<Utc>>,
    pub payment_artifact_id: Option<String>,
    pub amount_paid_cents: i64,
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub onboarding_token_hash: Option<String>,
    pub onboarding_token_issued_at: Option<DateTime<Utc>>,
    pub onboarding_token_used_at: Option<DateTime<Utc>>,
    pub onboarding_completed_at: Option<DateTime<Utc>>,
    pub insurance_confirmed_at: Option<DateTime<Utc>>,
    pub media_consent_at: Option<DateTime<Utc>>,
    pub signature: Option<String>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub follow_up_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    pub fn needs_onboarding(&self) -> bool {
        self.insurance_confirmed_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Invited,
    Confirmed,
    PreChecked,
    Attended,
    NoShow,
    Cancelled,
    Refunded,
}

impl RegistrationStatus {
    /// Statuses that hold a seat against capacity.
    pub const OCCUPYING: [RegistrationStatus; 4] = [
        RegistrationStatus::Invited,
        RegistrationStatus::Confirmed,
        RegistrationStatus::PreChecked,
        RegistrationStatus::Attended,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Invited => "invited",
            RegistrationStatus::Confirmed => "confirmed",
            RegistrationStatus::PreChecked => "pre_checked",
            RegistrationStatus::Attended => "attended",
            RegistrationStatus::NoShow => "no_show",
            RegistrationStatus::Cancelled => "cancelled",
            RegistrationStatus::Refunded => "refunded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "invited" => Some(RegistrationStatus::Invited),
            "confirmed" => Some(RegistrationStatus::Confirmed),
            "pre_checked" => Some(RegistrationStatus::PreChecked),
            "attended" => Some(RegistrationStatus::Attended),
            "no_show" => Some(RegistrationStatus::NoShow),
            "cancelled" => Some(RegistrationStatus::Cancelled),
            "refunded" => Some(RegistrationStatus::Refunded),
            _ => None,
        }
    }

    /// Invited, confirmed and pre-checked registrations are still in flight.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RegistrationStatus::Invited
                | RegistrationStatus::Confirmed
                | RegistrationStatus::PreChecked
        )
    }

    pub fn occupies_seat(&self) -> bool {
        Self::OCCUPYING.contains(self)
    }

    pub fn can_transition_to(&self, next: RegistrationStatus) -> bool {
        use RegistrationStatus::*;
        matches!(
            (self, next),
            (Invited, Confirmed)
                | (Confirmed, PreChecked)
                | (Confirmed, Attended)
                | (PreChecked, Attended)
                | (Invited, Cancelled)
                | (Confirmed, Cancelled)
                | (PreChecked, Cancelled)
                | (Confirmed, Refunded)
                | (PreChecked, Refunded)
                | (Confirmed, NoShow)
                | (PreChecked, NoShow)
        )
    }
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields an attendee submits through the onboarding link (or the backup
/// step at check-in).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OnboardingSubmission {
    pub insurance_confirmed: bool,
    #[serde(default)]
    pub media_consent: bool,
    pub signature: Option<String>,
}

/// A coordinator placing someone directly, outside the batch inviter.
///
/// Without `member_id` the person is matched to an active waitlist entry by
/// email, or gets a fresh external identity.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DirectRegistrationRequest {
    pub member_id: Option<Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
    #[validate(email)]
    pub email: String,
    #[serde(default)]
    pub priority: i64,
}
