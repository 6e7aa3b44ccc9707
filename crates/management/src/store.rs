//! In-memory campaign store backed by DashMap.
//!
//! Every state change goes through `get_mut` on the campaign's shard entry,
//! so the precondition check and the write happen under the same lock: a
//! compare-and-set on the lifecycle state.

use std::collections::BTreeSet;

use campaign_core::types::CampaignStatus;
use campaign_core::{CampaignError, CampaignResult};
use campaign_delivery::DeliveryOutcome;
use campaign_segmentation::SegmentRule;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::messages::{CampaignObjective, MessageTemplate};
use crate::models::Campaign;
use crate::state_machine::CampaignStateMachine;

/// Result of asking to start delivery.
#[derive(Debug, Clone)]
pub enum StartDecision {
    /// This call moved the campaign to `Sending`; the caller must dispatch.
    Started(Campaign),
    /// Already `Sending` or terminal; nothing to do.
    AlreadyStarted(Campaign),
}

impl StartDecision {
    pub fn campaign(&self) -> &Campaign {
        match self {
            StartDecision::Started(c) | StartDecision::AlreadyStarted(c) => c,
        }
    }
}

/// Thread-safe store for campaigns and their lifecycle state.
pub struct CampaignStore {
    campaigns: DashMap<Uuid, Campaign>,
}

impl CampaignStore {
    pub fn new() -> Self {
        info!("Campaign store initialized (in-memory)");
        Self {
            campaigns: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }

    pub fn insert_draft(
        &self,
        name: &str,
        rule: SegmentRule,
        objective: Option<CampaignObjective>,
        message: Option<MessageTemplate>,
    ) -> Campaign {
        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::new_v4(),
            name: name.to_string(),
            rule,
            audience: BTreeSet::new(),
            status: CampaignStatus::Draft,
            objective,
            message,
            delivery: None,
            created_at: now,
            updated_at: now,
        };
        info!(campaign_id = %campaign.id, name = %campaign.name, rule = %campaign.rule, "Campaign drafted");
        self.campaigns.insert(campaign.id, campaign.clone());
        campaign
    }

    pub fn get(&self, id: &Uuid) -> Option<Campaign> {
        self.campaigns.get(id).map(|r| r.value().clone())
    }

    /// All campaigns, newest first.
    pub fn list(&self) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> =
            self.campaigns.iter().map(|r| r.value().clone()).collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        campaigns
    }

    /// `Draft -> Created`, freezing the audience snapshot.
    pub fn attach_audience(&self, id: &Uuid, audience: BTreeSet<Uuid>) -> CampaignResult<Campaign> {
        let mut entry = self.campaigns.get_mut(id).ok_or(CampaignError::NotFound(*id))?;
        CampaignStateMachine::validate(*id, entry.status, CampaignStatus::Created)?;

        entry.audience = audience;
        entry.status = CampaignStatus::Created;
        entry.updated_at = Utc::now();
        record_transition(id, CampaignStatus::Draft, CampaignStatus::Created);
        info!(campaign_id = %id, audience = entry.audience.len(), "Audience snapshot frozen");
        Ok(entry.value().clone())
    }

    /// `Created -> Sending`. Idempotent: a campaign already sending or
    /// finished is returned as `AlreadyStarted` without changes.
    pub fn begin_sending(&self, id: &Uuid) -> CampaignResult<StartDecision> {
        let mut entry = self.campaigns.get_mut(id).ok_or(CampaignError::NotFound(*id))?;

        match entry.status {
            CampaignStatus::Sending => {
                debug!(campaign_id = %id, "Delivery already running");
                return Ok(StartDecision::AlreadyStarted(entry.value().clone()));
            }
            s if s.is_terminal() => {
                debug!(campaign_id = %id, status = %s, "Delivery already finished");
                return Ok(StartDecision::AlreadyStarted(entry.value().clone()));
            }
            CampaignStatus::Created if entry.audience.is_empty() => {
                return Err(CampaignError::InvalidTransition {
                    campaign_id: *id,
                    from: CampaignStatus::Created,
                    to: CampaignStatus::Sending,
                    reason: "audience snapshot is empty".into(),
                });
            }
            from => CampaignStateMachine::validate(*id, from, CampaignStatus::Sending)?,
        }

        entry.status = CampaignStatus::Sending;
        entry.updated_at = Utc::now();
        record_transition(id, CampaignStatus::Created, CampaignStatus::Sending);
        info!(campaign_id = %id, audience = entry.audience.len(), "Campaign sending");
        Ok(StartDecision::Started(entry.value().clone()))
    }

    /// `Sending -> terminal`, recording the delivery summary.
    pub fn finish_sending(
        &self,
        id: &Uuid,
        terminal: CampaignStatus,
        outcome: DeliveryOutcome,
    ) -> CampaignResult<Campaign> {
        let mut entry = self.campaigns.get_mut(id).ok_or(CampaignError::NotFound(*id))?;
        if entry.status != CampaignStatus::Sending {
            return Err(CampaignError::InvalidTransition {
                campaign_id: *id,
                from: entry.status,
                to: terminal,
                reason: "campaign is not sending".into(),
            });
        }
        CampaignStateMachine::validate(*id, CampaignStatus::Sending, terminal)?;

        entry.status = terminal;
        entry.delivery = Some(outcome);
        entry.updated_at = Utc::now();
        record_transition(id, CampaignStatus::Sending, terminal);
        info!(campaign_id = %id, status = %terminal, "Campaign finished");
        Ok(entry.value().clone())
    }
}

impl Default for CampaignStore {
    fn default() -> Self {
        Self::new()
    }
}

fn record_transition(id: &Uuid, from: CampaignStatus, to: CampaignStatus) -> &'static str {
    let trigger = CampaignStateMachine::trigger(from, to).unwrap_or("unlisted");
    debug!(campaign_id = %id, from = %from, to = %to, trigger, "Campaign transition");
    metrics::counter!("campaign.transitions", "to" => to.as_str(), "trigger" => trigger).increment(1);
    trigger
}
