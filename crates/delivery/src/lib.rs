//! Campaign delivery: per-member dispatch through an injected sender,
//! retry with exponential backoff, bounded concurrency, cancellation, and
//! an append-only delivery log.

pub mod log;
pub mod pipeline;
pub mod retry;
pub mod sender;

pub use log::{DeliveryLogStore, InMemoryDeliveryLog};
pub use pipeline::{DeliveryJob, DeliveryOutcome, DeliveryPipeline, DeliveryProgress, ProgressSnapshot};
pub use retry::RetryPolicy;
pub use sender::{DeliveryReceipt, MessageSender, SendError};
