use async_trait::async_trait;
use campaign_delivery::{DeliveryReceipt, MessageSender, SendError};
use tracing::info;
use uuid::Uuid;

/// Sender that records the send in the log instead of contacting a vendor.
pub struct DryRunSender;

#[async_trait]
impl MessageSender for DryRunSender {
    async fn send(&self, customer_id: Uuid) -> Result<DeliveryReceipt, SendError> {
        info!(customer_id = %customer_id, "Dry run: message not sent");
        Ok(DeliveryReceipt {
            provider_message_id: Some(format!("dry-run-{}", customer_id)),
        })
    }
}
