use async_trait::async_trait;
use tracing::info;

use crate::domain::aggregates::User;
use crate::ports::notify::{NotifyError, WelcomeNotifier};

/// Records welcome notifications in the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl WelcomeNotifier for LogNotifier {
    async fn send_welcome(&self, user: &User) -> Result<(), NotifyError> {
        info!(user_id = %user.id, email = %user.email, "Welcome notification sent");
        Ok(())
    }
}
