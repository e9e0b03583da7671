use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Names what a payment session is for, e.g. `workshop:<id>` or `signup`.
///
/// Sessions are cached per (user, intent), so two different purchases by the
/// same user never share a checkout artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntentKey(String);

impl IntentKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn workshop(workshop_id: Uuid) -> Self {
        Self(format!("workshop:{}", workshop_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The workshop a `workshop:<id>` key refers to.
    pub fn workshop_id(&self) -> Option<Uuid> {
        self.0
            .strip_prefix("workshop:")
            .and_then(|id| Uuid::parse_str(id).ok())
    }
}

impl std::fmt::Display for IntentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One line of a checkout; multi-item checkouts create one artifact each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentItem {
    pub description: String,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub intent_key: IntentKey,
    pub artifact_ids: Vec<String>,
    #[serde(skip_serializing)]
    pub client_secrets: Vec<String>,
    pub amounts_cents: Vec<i64>,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

impl PaymentSession {
    pub fn total_cents(&self) -> i64 {
        self.amounts_cents.iter().sum()
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_used && self.expires_at > now
    }

    /// The artifact a single-item checkout is paid through.
    pub fn primary_artifact(&self) -> Option<&str> {
        self.artifact_ids.first().map(String::as_str)
    }
}
