//! Management domain types: campaigns and creation requests.

use std::collections::BTreeSet;

use campaign_core::types::CampaignStatus;
use campaign_delivery::DeliveryOutcome;
use campaign_segmentation::SegmentRule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messages::{CampaignObjective, MessageTemplate};

// ─── Campaign ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub rule: SegmentRule,
    /// Frozen at `Draft -> Created`; never re-evaluated.
    pub audience: BTreeSet<Uuid>,
    pub status: CampaignStatus,
    #[serde(default)]
    pub objective: Option<CampaignObjective>,
    /// Body sent to each member, personalized per customer.
    #[serde(default)]
    pub message: Option<MessageTemplate>,
    /// Set when the campaign reaches a terminal state.
    #[serde(default)]
    pub delivery: Option<DeliveryOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn audience_size(&self) -> usize {
        self.audience.len()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    /// Rule text in the segmentation grammar, e.g. `spend > 10000 AND visits < 3`.
    pub rule: String,
    #[serde(default)]
    pub objective: Option<CampaignObjective>,
    /// Message body; without one, the objective's first suggestion is used.
    #[serde(default)]
    pub message: Option<String>,
}
