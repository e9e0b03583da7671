use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::Result;

pub mod log;

pub use self::log::LogNotifier;

/// Template keys understood by the (external) email renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    Invitation,
    PaymentReceived,
    PaymentFailed,
    RegistrationCancelled,
    WorkshopCancelled,
    RefundRequested,
    RefundCompleted,
    OnboardingInvite,
    CheckedIn,
    FollowUpAttended,
    FollowUpNoShow,
}

impl NotificationTemplate {
    pub fn key(&self) -> &'static str {
        match self {
            NotificationTemplate::Invitation => "workshop_invitation",
            NotificationTemplate::PaymentReceived => "workshop_payment_received",
            NotificationTemplate::PaymentFailed => "workshop_payment_failed",
            NotificationTemplate::RegistrationCancelled => "workshop_registration_cancelled",
            NotificationTemplate::WorkshopCancelled => "workshop_cancelled",
            NotificationTemplate::RefundRequested => "workshop_refund_requested",
            NotificationTemplate::RefundCompleted => "workshop_refund_completed",
            NotificationTemplate::OnboardingInvite => "workshop_onboarding",
            NotificationTemplate::CheckedIn => "workshop_checked_in",
            NotificationTemplate::FollowUpAttended => "workshop_follow_up",
            NotificationTemplate::FollowUpNoShow => "workshop_no_show",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub template: NotificationTemplate,
    pub recipient: String,
    pub variables: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(template: NotificationTemplate, recipient: impl Into<String>) -> Self {
        Self {
            template,
            recipient: recipient.into(),
            variables: BTreeMap::new(),
        }
    }

    pub fn var(mut self, key: &str, value: impl ToString) -> Self {
        self.variables.insert(key.to_string(), value.to_string());
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Fans a notification out to every registered sender.
///
/// Sending never fails from the caller's point of view: errors are logged
/// and the state transition that triggered the send stands.
pub struct NotificationManager {
    notifiers: RwLock<Vec<Arc<dyn Notifier>>>,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self {
            notifiers: RwLock::new(Vec::new()),
        }
    }

    pub async fn register(&self, notifier: Arc<dyn Notifier>) {
        tracing::info!("Registered notifier: {}", notifier.name());
        self.notifiers.write().await.push(notifier);
    }

    pub async fn send(&self, notification: Notification) {
        let notifiers = self.notifiers.read().await;

        for notifier in notifiers.iter() {
            match notifier.send(&notification).await {
                Ok(_) => {
                    tracing::debug!(
                        "Notifier {} sent {} to {}",
                        notifier.name(),
                        notification.template.key(),
                        notification.recipient
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Notifier {} failed to send {} to {}: {:?}",
                        notifier.name(),
                        notification.template.key(),
                        notification.recipient,
                        e
                    );
                }
            }
        }
    }

    pub async fn send_all(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            self.send(notification).await;
        }
    }
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}
