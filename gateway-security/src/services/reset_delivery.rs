use async_trait::async_trait;
use std::sync::Mutex;

use crate::models::User;

/// Hands a freshly minted reset token to its owner, typically by email.
#[async_trait]
pub trait ResetDelivery: Send + Sync {
    async fn send_password_reset(&self, user: &User, reset_token: &str)
        -> Result<(), anyhow::Error>;
}

/// Default delivery for deployments without a mailer: records that a reset
/// was issued. The token itself is never logged.
pub struct LogDelivery;

#[async_trait]
impl ResetDelivery for LogDelivery {
    async fn send_password_reset(
        &self,
        user: &User,
        _reset_token: &str,
    ) -> Result<(), anyhow::Error> {
        tracing::info!(user_id = user.id, "Password reset issued; no mailer configured");
        Ok(())
    }
}

/// Keeps every delivered `(user_id, token)` pair in memory.
#[derive(Default)]
pub struct CapturingDelivery {
    sent: Mutex<Vec<(i64, String)>>,
}

impl CapturingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent token delivered to `user_id`.
    pub fn last_token_for(&self, user_id: i64) -> Option<String> {
        self.sent.lock().ok().and_then(|sent| {
            sent.iter()
                .rev()
                .find(|(id, _)| *id == user_id)
                .map(|(_, token)| token.clone())
        })
    }

    pub fn count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ResetDelivery for CapturingDelivery {
    async fn send_password_reset(
        &self,
        user: &User,
        reset_token: &str,
    ) -> Result<(), anyhow::Error> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("delivery log mutex poisoned"))?
            .push((user.id, reset_token.to_string()));
        Ok(())
    }
}
