use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub payment_artifact_id: Option<String>,
    pub amount_cents: i64,
    pub reason: String,
    pub status: RefundStatus,
    pub processor_refund_id: Option<String>,
    pub failure_reason: Option<String>,
    pub requested_by: Option<Uuid>,
    pub processed_by: Option<Uuid>,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Processing => "processing",
            RefundStatus::Completed => "completed",
            RefundStatus::Failed => "failed",
            RefundStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RefundStatus::Pending),
            "processing" => Some(RefundStatus::Processing),
            "completed" => Some(RefundStatus::Completed),
            "failed" => Some(RefundStatus::Failed),
            "cancelled" => Some(RefundStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub reason: String,
    /// Only honoured when partial refunds are enabled
    pub amount_cents: Option<i64>,
}
