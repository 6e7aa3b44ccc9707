use campaign_core::types::CampaignStatus;
use campaign_core::{CampaignError, CampaignResult};
use serde::Serialize;
use uuid::Uuid;

/// Describes a single valid state transition for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    pub from: CampaignStatus,
    pub to: CampaignStatus,
    pub trigger: &'static str,
}

const TRANSITIONS: &[StateTransition] = &[
    // Draft ->
    StateTransition {
        from: CampaignStatus::Draft,
        to: CampaignStatus::Created,
        trigger: "audience_resolved",
    },
    // Created ->
    StateTransition {
        from: CampaignStatus::Created,
        to: CampaignStatus::Sending,
        trigger: "delivery_started",
    },
    // Sending ->
    StateTransition {
        from: CampaignStatus::Sending,
        to: CampaignStatus::Completed,
        trigger: "all_delivered",
    },
    StateTransition {
        from: CampaignStatus::Sending,
        to: CampaignStatus::PartiallyFailed,
        trigger: "some_delivered",
    },
    StateTransition {
        from: CampaignStatus::Sending,
        to: CampaignStatus::Failed,
        trigger: "none_delivered",
    },
    StateTransition {
        from: CampaignStatus::Sending,
        to: CampaignStatus::Cancelled,
        trigger: "delivery_cancelled",
    },
];

/// Guards the campaign lifecycle by enforcing the finite set of valid
/// transitions. Stateless; the current state lives on the stored campaign.
#[derive(Debug, Clone, Copy, Default)]
pub struct CampaignStateMachine;

impl CampaignStateMachine {
    pub fn transitions() -> &'static [StateTransition] {
        TRANSITIONS
    }

    /// Returns `true` if the given transition is allowed.
    pub fn can_transition(from: CampaignStatus, to: CampaignStatus) -> bool {
        TRANSITIONS.iter().any(|t| t.from == from && t.to == to)
    }

    pub fn trigger(from: CampaignStatus, to: CampaignStatus) -> Option<&'static str> {
        TRANSITIONS
            .iter()
            .find(|t| t.from == from && t.to == to)
            .map(|t| t.trigger)
    }

    /// Checks `from -> to` against the table; an illegal pair yields
    /// `InvalidTransition` naming both states.
    pub fn validate(campaign_id: Uuid, from: CampaignStatus, to: CampaignStatus) -> CampaignResult<()> {
        if Self::can_transition(from, to) {
            return Ok(());
        }
        let reason = if from.is_terminal() {
            format!("campaign is already {}", from)
        } else {
            "transition not allowed".to_string()
        };
        Err(CampaignError::InvalidTransition {
            campaign_id,
            from,
            to,
            reason,
        })
    }
}
