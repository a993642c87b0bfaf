//! Outbound user notifications.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::aggregates::User;

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait WelcomeNotifier: Send + Sync {
    async fn send_welcome(&self, user: &User) -> Result<(), NotifyError>;
}
