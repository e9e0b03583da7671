use async_trait::async_trait;

use crate::{
    error::Result,
    notifications::{Notification, Notifier},
};

/// Writes notifications to the log instead of delivering them.
///
/// Stands in for the mail relay until one is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            template = notification.template.key(),
            recipient = %notification.recipient,
            variables = ?notification.variables,
            "Would send notification"
        );
        Ok(())
    }
}
