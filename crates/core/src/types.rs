use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Customers & Orders ─────────────────────────────────────────────────────

/// A customer record as seen by segmentation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// Cumulative spend, never negative.
    pub spend: f64,
    pub visits: u32,
    pub status: CustomerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn is_active(&self) -> bool {
        self.status == CustomerStatus::Active
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CustomerStatus {
    Active,
    Inactive,
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerStatus::Active => "Active",
            CustomerStatus::Inactive => "Inactive",
        }
    }

    /// Case-insensitive lookup used by the rule parser and data loaders.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("active") {
            Some(CustomerStatus::Active)
        } else if name.eq_ignore_ascii_case("inactive") {
            Some(CustomerStatus::Inactive)
        } else {
            None
        }
    }
}

impl std::fmt::Display for CustomerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields supplied by ingestion when a customer is first seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCustomer {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub spend: f64,
    #[serde(default)]
    pub visits: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub order_id: String,
    pub customer_id: Uuid,
    pub amount: f64,
    pub status: OrderStatus,
    pub recorded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Recorded but not yet folded into the customer's spend.
    Pending,
    /// Aggregated into spend; immutable from here on.
    Processed,
}

// ─── Campaign lifecycle ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Created,
    Sending,
    Completed,
    PartiallyFailed,
    Failed,
    Cancelled,
}

impl CampaignStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed
                | CampaignStatus::PartiallyFailed
                | CampaignStatus::Failed
                | CampaignStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Created => "created",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Completed => "completed",
            CampaignStatus::PartiallyFailed => "partially_failed",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Delivery log ───────────────────────────────────────────────────────────

/// Outcome recorded for a single delivery attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Retrying,
}

/// One immutable row of the delivery audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryLogEntry {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub customer_id: Uuid,
    pub status: DeliveryStatus,
    /// 1-based, monotonic per (campaign, customer).
    pub attempt: u32,
    /// Transport or rejection reason for non-`Sent` attempts.
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// ─── Lifecycle events ───────────────────────────────────────────────────────

/// Event emitted to the event bus as campaigns move through their lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub campaign_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub status: Option<CampaignStatus>,
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CampaignCreated,
    AudienceResolved,
    DeliveryStarted,
    DeliveryAttempted,
    DeliveryFinished,
    DeliveryCancelled,
}
