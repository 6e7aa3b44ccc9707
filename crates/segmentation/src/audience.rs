//! Audience resolution: applies a rule across the customer store.
//!
//! Only `Active` customers are eligible, whatever the rule says; a rule of
//! `status == Inactive` therefore always resolves to an empty audience.

use std::collections::BTreeSet;

use campaign_core::store::CustomerSource;
use campaign_core::types::Customer;
use campaign_core::{CampaignError, CampaignResult};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::predicates::SegmentRule;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudienceResult {
    pub member_ids: BTreeSet<Uuid>,
    pub count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AudienceResolver;

impl AudienceResolver {
    pub fn new() -> Self {
        Self
    }

    /// Whether a single customer belongs to the rule's audience.
    pub fn is_member(rule: &SegmentRule, customer: &Customer) -> bool {
        customer.is_active() && rule.evaluate(customer)
    }

    pub fn resolve(
        &self,
        rule: &SegmentRule,
        source: &dyn CustomerSource,
    ) -> CampaignResult<AudienceResult> {
        let mut member_ids = BTreeSet::new();
        source
            .scan(&mut |customer| {
                if Self::is_member(rule, customer) {
                    member_ids.insert(customer.id);
                }
            })
            .map_err(into_resolution_error)?;

        let count = member_ids.len();
        debug!(rule = %rule, count, "Audience resolved");
        metrics::counter!("audience.resolved").increment(1);
        Ok(AudienceResult { member_ids, count })
    }

    /// Count-only variant of [`AudienceResolver::resolve`]; same predicate,
    /// no ID set is built.
    pub fn preview(&self, rule: &SegmentRule, source: &dyn CustomerSource) -> CampaignResult<usize> {
        let mut count = 0usize;
        source
            .scan(&mut |customer| {
                if Self::is_member(rule, customer) {
                    count += 1;
                }
            })
            .map_err(into_resolution_error)?;
        debug!(rule = %rule, count, "Audience previewed");
        Ok(count)
    }
}

fn into_resolution_error(err: CampaignError) -> CampaignError {
    match err {
        CampaignError::Resolution(_) => err,
        other => CampaignError::Resolution(other.to_string()),
    }
}
