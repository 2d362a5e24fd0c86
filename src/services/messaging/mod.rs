pub mod twilio;

use async_trait::async_trait;

#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()>;
}

/// Used when no SMS account is configured; messages only reach the log.
pub struct LogOnlyMessaging;

#[async_trait]
impl MessagingProvider for LogOnlyMessaging {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()> {
        tracing::info!(to, body, "outbound message (no SMS provider configured)");
        Ok(())
    }
}
