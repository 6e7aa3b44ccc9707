//! The Sender capability: the vendor transport, injected by the host.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Acknowledgement returned by the transport for an accepted message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub provider_message_id: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Transient failure (timeout, throttling, connection reset). Retried.
    #[error("transport error: {0}")]
    Transport(String),

    /// The vendor will never accept this message (invalid recipient,
    /// unsubscribed). Not retried.
    #[error("permanent rejection: {0}")]
    PermanentRejection(String),
}

impl SendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Transport(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            SendError::Transport(r) | SendError::PermanentRejection(r) => r,
        }
    }
}

/// Sends one campaign message to one customer.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, customer_id: Uuid) -> Result<DeliveryReceipt, SendError>;
}
