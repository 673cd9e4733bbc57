use agent_protocol::{DocumentResult, FailureReason};
use async_trait::async_trait;

/// Outbound side of the management channel, as seen by the processor.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn acknowledge(&self, message_id: &str) -> anyhow::Result<()>;

    async fn fail_message(&self, message_id: &str, reason: FailureReason) -> anyhow::Result<()>;

    async fn delete_message(&self, message_id: &str) -> anyhow::Result<()>;

    async fn send_response(&self, result: &DocumentResult) -> anyhow::Result<()>;
}
